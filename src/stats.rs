//! DTOs of [RTCPeerConnection] metrics consumed by the packet loss sampler.
//!
//! Only the [RTCStats] types needed for packet loss calculation are
//! modelled, all the others are deserialized as [`RtcStatsType::Other`].
//!
//! [RTCPeerConnection]: https://w3.org/TR/webrtc/#dom-rtcpeerconnection
//! [RTCStats]: https://w3.org/TR/webrtc/#dom-rtcstats

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Unique ID that is associated with the object that was inspected to produce
/// [`RtcStat`] object.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
pub struct StatId(pub String);

/// Represents the [stats object] constructed by inspecting a specific
/// [monitored object].
///
/// [stats object]: https://w3.org/TR/webrtc-stats/#dfn-stats-object
/// [monitored object]: https://w3.org/TR/webrtc-stats/#dfn-monitored-object
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RtcStat {
    /// Unique ID of the inspected object.
    pub id: StatId,

    /// Timestamp associated with this object, in milliseconds relative to
    /// the UNIX epoch.
    #[serde(default)]
    pub timestamp: f64,

    /// Actual stats of this [`RtcStat`].
    #[serde(flatten)]
    pub stats: RtcStatsType,
}

/// Known types of [`RtcStat`]s.
///
/// [List of all RTCStats types on W3C][1].
///
/// [1]: https://w3.org/TR/webrtc-stats/#rtctatstype-%2A
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RtcStatsType {
    /// Statistics for an inbound [RTP] stream that is currently received.
    ///
    /// [RTP]: https://en.wikipedia.org/wiki/Real-time_Transport_Protocol
    InboundRtp(Box<RtcInboundRtpStreamStats>),

    /// Any other stats type, ignored.
    #[serde(other)]
    Other,
}

/// Statistics for an inbound [RTP] stream.
///
/// [RTP]: https://en.wikipedia.org/wiki/Real-time_Transport_Protocol
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcInboundRtpStreamStats {
    /// [`mid`] of the transceiver receiving this stream.
    ///
    /// [`mid`]: https://w3.org/TR/webrtc/#dom-rtptransceiver-mid
    #[serde(default)]
    pub mid: Option<String>,

    /// `audio` or `video`.
    #[serde(default)]
    pub kind: Option<String>,

    /// Total number of RTP data packets received for this SSRC.
    #[serde(default)]
    pub packets_received: u64,

    /// Total number of RTP data packets for this SSRC that have been lost
    /// since the beginning of reception.
    ///
    /// Packets that arrive late are not counted as lost, and the loss
    /// __may be negative__ if there are duplicates.
    #[serde(default)]
    pub packets_lost: Option<i64>,
}

/// Errors which may occur when fetching [`RtcStat`]s.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum StatsError {
    /// Underlying transport failed to provide stats.
    #[display(fmt = "Failed to get RTC stats: {}", _0)]
    GetStats(String),

    /// Underlying transport is already closed.
    #[display(fmt = "Transport is closed")]
    TransportClosed,
}
