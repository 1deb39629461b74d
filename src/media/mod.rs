//! Media collaborators of the meeting experience subsystem: outbound RTP
//! senders, inbound consumers and the receiving transport.
//!
//! Implementations live outside of this crate and wrap the actual WebRTC
//! objects.

use derive_more::{Display, From};
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use tracerr::Traced;

use crate::stats::{RtcStat, StatsError};

/// ID of a local producer (outbound media stream) known to the SFU.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
#[serde(transparent)]
pub struct ProducerId(pub String);

/// ID of a consumer (inbound media stream) known to the SFU.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
#[serde(transparent)]
pub struct ConsumerId(pub String);

/// Kind of media carried by a producer or consumer.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track.
    #[display(fmt = "audio")]
    Audio,

    /// Video track.
    #[display(fmt = "video")]
    Video,
}

/// Parameters of a single encoding (simulcast layer) of an RTP sender.
///
/// Mirrors [RTCRtpEncodingParameters][1].
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcrtpencodingparameters
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    /// RTP stream ID of this encoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,

    /// Max bitrate in bits per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,

    /// Max framerate in frames per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_framerate: Option<u32>,

    /// Factor the resolution is scaled down by.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
}

/// Spatial and temporal layer currently delivered to a consumer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayers {
    /// Index of the delivered spatial layer.
    pub spatial_layer: u8,

    /// Index of the delivered temporal layer, if the SFU reports one.
    #[serde(default)]
    pub temporal_layer: Option<u8>,
}

/// Errors of the media collaborators.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum MediaError {
    /// The underlying sender rejected new encoding parameters.
    #[display(fmt = "Failed to set RTP encoding parameters: {}", _0)]
    SetParameters(String),

    /// The underlying sender is already closed.
    #[display(fmt = "RTP sender is closed")]
    SenderClosed,
}

/// Receiving transport, the only source of packet loss stats.
#[cfg_attr(test, mockall::automock)]
pub trait RecvTransport {
    /// Returns ID of this transport.
    fn id(&self) -> String;

    /// Indicates whether this transport is closed.
    fn is_closed(&self) -> bool;

    /// Fetches current stats of this transport.
    fn get_stats(
        &self,
    ) -> LocalBoxFuture<'static, Result<Vec<RtcStat>, Traced<StatsError>>>;

    /// Returns [`Future`] resolving once this transport is closed.
    ///
    /// [`Future`]: std::future::Future
    fn on_close(&self) -> LocalBoxFuture<'static, ()>;
}

/// Outbound RTP sender of a local producer.
#[cfg_attr(test, mockall::automock)]
pub trait RtpSender {
    /// Returns ID of the producer this sender belongs to.
    fn producer_id(&self) -> ProducerId;

    /// Returns [`MediaKind`] of this sender.
    fn kind(&self) -> MediaKind;

    /// Returns current encodings of this sender.
    fn encodings(&self) -> Vec<RtpEncodingParameters>;

    /// Applies new encodings to this sender.
    fn set_encodings(
        &self,
        encodings: Vec<RtpEncodingParameters>,
    ) -> LocalBoxFuture<'static, Result<(), Traced<MediaError>>>;
}

/// Inbound consumer of a remote media stream.
///
/// [`InboundConsumer::pause`] and [`InboundConsumer::resume`] must be
/// idempotent.
#[cfg_attr(test, mockall::automock)]
pub trait InboundConsumer {
    /// Returns ID of this consumer.
    fn id(&self) -> ConsumerId;

    /// Returns [`MediaKind`] of this consumer.
    fn kind(&self) -> MediaKind;

    /// Pauses media receiving.
    fn pause(&self);

    /// Resumes media receiving.
    fn resume(&self);
}
