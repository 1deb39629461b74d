//! Meeting experience detection and adaptive RTP throttling.
//!
//! [`MeetingExperienceDetector`] periodically samples packet loss of the
//! receiving transport, tracks quality scores reported by the SFU for local
//! producers and remote consumers, and decides whether the meeting experience
//! is [`MeetingExperience::Good`] or [`MeetingExperience::Bad`].
//!
//! [`RtpThrottleManager`] reacts on these decisions: it limits outbound
//! bitrate and framerate and pauses inbound video while the experience is
//! bad, and lifts the restrictions once it recovers.
//!
//! All the types here are single-threaded and spawn their timers with
//! [`tokio::task::spawn_local`], so they must be used inside a
//! [`tokio::task::LocalSet`].

#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod conf;
pub mod experience;
pub mod log;
pub mod manager;
pub mod media;
pub mod platform;
pub mod score;
pub mod signalling;
pub mod stats;
pub mod throttle;
pub mod utils;

#[doc(inline)]
pub use self::{
    conf::Conf,
    experience::{
        MeetingExperience, MeetingExperienceDetector, MeetingExperienceEvent,
    },
    manager::{RtcManagerEvent, RtpThrottleManager},
    throttle::ThrottleController,
};
