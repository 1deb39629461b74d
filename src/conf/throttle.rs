//! RTP throttling configuration.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Encoding limits applied while RTP is throttled, and the ceilings they are
/// lifted to once the meeting experience recovers.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Throttle {
    /// Whether meeting experience detection and RTP throttling are enabled
    /// at all.
    #[default(true)]
    pub enabled: bool,

    /// Max bitrate (bps) of outbound audio while throttled.
    #[default(12_000)]
    pub audio_max_bitrate: u32,

    /// Max bitrate (bps) of outbound video while throttled.
    #[default(120_000)]
    pub video_max_bitrate: u32,

    /// Max framerate of outbound video while throttled.
    #[default(5)]
    pub video_max_framerate: u32,

    /// Max bitrate (bps) of outbound audio once throttling is lifted.
    #[default(100_000)]
    pub audio_restore_bitrate: u32,

    /// Max bitrate (bps) of outbound video once throttling is lifted.
    #[default(3_000_000)]
    pub video_restore_bitrate: u32,

    /// Max framerate of outbound video once throttling is lifted.
    #[default(60)]
    pub video_restore_framerate: u32,
}
