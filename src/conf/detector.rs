//! [`MeetingExperienceDetector`] configuration.
//!
//! [`MeetingExperienceDetector`]: crate::MeetingExperienceDetector

use std::{borrow::Cow, time::Duration};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Thresholds and timings of the meeting experience evaluation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Detector {
    /// Number of consecutive lossy polls which must be __exceeded__ before
    /// the experience may turn bad.
    #[default(2)]
    pub failure_interval: u32,

    /// Producer score below which the experience is considered failing.
    #[default(9.0)]
    pub failure_score: f64,

    /// How long a producer score must stay below
    /// [`Detector::failure_score`] before the experience may turn bad.
    #[default(Duration::from_secs(2))]
    #[serde(with = "humantime_serde")]
    pub failure_time: Duration,

    /// Number of consecutive polls without loss required before the
    /// experience may recover.
    #[default(10)]
    pub recovery_interval: u32,

    /// Producer score which must be reached for the experience to recover.
    #[default(10.0)]
    pub recovery_score: f64,

    /// How long a producer score must stay at [`Detector::recovery_score`]
    /// before the experience may recover.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub recovery_time: Duration,

    /// Packet loss ratio above which a poll is counted as lossy.
    #[default(0.03)]
    pub packet_loss_threshold: f64,

    /// Interval of receiving transport stats polling.
    #[default(Duration::from_secs(3))]
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Interval of the meeting experience evaluation.
    #[default(Duration::from_secs(2))]
    #[serde(with = "humantime_serde")]
    pub eval_interval: Duration,

    /// `mid` of the SFU probation stream which is excluded from packet loss
    /// calculation.
    #[default("probator")]
    pub probe_mid: Cow<'static, str>,
}
