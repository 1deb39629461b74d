//! Notifications sent by the SFU over the signalling channel.
//!
//! Each notification is a JSON object of `{"method": ..., "data": ...}`
//! shape. Only the methods affecting meeting experience are modelled.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    media::{ConsumerId, ConsumerLayers, MediaKind, ProducerId},
    score::RawScore,
};

/// SFU notification.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum SfuMessage {
    /// Score of a local producer has changed.
    ProducerScore(ProducerScoreData),

    /// Score of a consumer has changed.
    ConsumerScore(ConsumerScoreData),

    /// Consumer was paused by the remote sender.
    ConsumerPaused(ConsumerData),

    /// Consumer was resumed by the remote sender.
    ConsumerResumed(ConsumerData),

    /// Consumer was closed by the SFU.
    ConsumerClosed(ConsumerClosedData),

    /// Layers delivered to a consumer have changed.
    ConsumerLayersChanged(ConsumerLayersData),
}

/// Payload of [`SfuMessage::ProducerScore`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerScoreData {
    pub producer_id: ProducerId,

    #[serde(default)]
    pub kind: Option<MediaKind>,

    /// Single score or per layer scores.
    #[serde(default)]
    pub score: Option<RawScore>,
}

/// Payload of [`SfuMessage::ConsumerScore`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScoreData {
    pub consumer_id: ConsumerId,

    #[serde(default)]
    pub kind: Option<MediaKind>,

    /// `{"score", "producerScore", "producerScores"}` report.
    #[serde(default)]
    pub score: Option<RawScore>,
}

/// Payload of [`SfuMessage::ConsumerPaused`] and
/// [`SfuMessage::ConsumerResumed`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerData {
    pub consumer_id: ConsumerId,
}

/// Payload of [`SfuMessage::ConsumerClosed`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerClosedData {
    pub consumer_id: ConsumerId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of [`SfuMessage::ConsumerLayersChanged`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayersData {
    pub consumer_id: ConsumerId,

    /// `None` if no layers are delivered at the moment.
    #[serde(default)]
    pub layers: Option<ConsumerLayers>,
}

/// Errors of [`SfuMessage`] parsing.
#[derive(Debug, Display, From)]
pub enum SfuMessageError {
    /// Message is not a valid JSON, or its `data` doesn't match its
    /// `method`.
    #[display(fmt = "Malformed SFU message: {}", _0)]
    Malformed(serde_json::Error),

    /// Message has a method which is not handled here.
    #[display(fmt = "Unknown SFU message method: {}", _0)]
    #[from(ignore)]
    UnknownMethod(String),
}

/// Raw `{"method", "data"}` envelope.
#[derive(Deserialize)]
struct Envelope {
    method: String,

    #[serde(default)]
    data: Value,
}

impl SfuMessage {
    /// Parses [`SfuMessage`] from the provided JSON.
    ///
    /// # Errors
    ///
    /// With [`SfuMessageError::UnknownMethod`] if the message is well-formed
    /// but its method is not modelled, and with [`SfuMessageError::Malformed`]
    /// otherwise.
    pub fn parse(json: &str) -> Result<Self, SfuMessageError> {
        let Envelope { method, data } = serde_json::from_str(json)?;
        Ok(match method.as_str() {
            "producerScore" => {
                Self::ProducerScore(serde_json::from_value(data)?)
            }
            "consumerScore" => {
                Self::ConsumerScore(serde_json::from_value(data)?)
            }
            "consumerPaused" => {
                Self::ConsumerPaused(serde_json::from_value(data)?)
            }
            "consumerResumed" => {
                Self::ConsumerResumed(serde_json::from_value(data)?)
            }
            "consumerClosed" => {
                Self::ConsumerClosed(serde_json::from_value(data)?)
            }
            "consumerLayersChanged" => {
                Self::ConsumerLayersChanged(serde_json::from_value(data)?)
            }
            _ => return Err(SfuMessageError::UnknownMethod(method)),
        })
    }
}
