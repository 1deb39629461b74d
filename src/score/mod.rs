//! Quality scores reported by the SFU for producers and consumers.
//!
//! Score is a number from `0` to `10`, where `10` means perfect quality. The
//! SFU reports either a single score, or one score per simulcast/SVC layer,
//! which is reduced to a single representative score (see
//! [`max_layer_score`]).

mod record;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[doc(inline)]
pub use self::record::{ConsumerScore, ProducerScore, ScoreRecord};

/// Score payload exactly as it was received from the SFU.
#[derive(Clone, Debug, Deserialize, From, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawScore(Value);

impl RawScore {
    /// Reduces this [`RawScore`] to a single representative score.
    ///
    /// Accepts a single number, or a non-empty array of layer scores (either
    /// numbers or `{"score": number}` objects). Malformed layers are skipped.
    ///
    /// # Errors
    ///
    /// Errors if this [`RawScore`] contains no usable score at all.
    pub fn representative(&self) -> Result<f64, ScoreError> {
        match &self.0 {
            Value::Array(layers) => max_layer_score(layers),
            other => layer_score(other).ok_or(ScoreError::NotANumber),
        }
    }

    /// Reduces a consumer score report to the quality of the remote side.
    ///
    /// mediasoup reports consumer scores as
    /// `{"score", "producerScore", "producerScores"}` objects. The best of
    /// `producerScores` is used, falling back to `producerScore` and then to
    /// treating this [`RawScore`] as a plain score.
    ///
    /// # Errors
    ///
    /// Errors if no usable score is found.
    pub fn remote_quality(&self) -> Result<f64, ScoreError> {
        if let Value::Object(report) = &self.0 {
            if let Some(Value::Array(scores)) = report.get("producerScores") {
                if !scores.is_empty() {
                    return max_layer_score(scores);
                }
            }
            if let Some(score) = report.get("producerScore") {
                return layer_score(score).ok_or(ScoreError::NotANumber);
            }
        }
        self.representative()
    }
}

impl From<f64> for RawScore {
    fn from(score: f64) -> Self {
        Self(Value::from(score))
    }
}

/// Errors of [`RawScore`] parsing.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ScoreError {
    /// Score is neither a number nor an array of layer scores.
    #[display(fmt = "Score is not a number")]
    NotANumber,

    /// Array of layer scores is empty.
    #[display(fmt = "No layer scores provided")]
    NoLayers,

    /// None of the provided layer scores is a number.
    #[display(fmt = "No valid layer score provided")]
    NoValidLayer,
}

/// Returns the best score among the provided layer scores, skipping
/// malformed ones.
///
/// # Errors
///
/// Errors if `layers` is empty or none of them is a valid score.
pub fn max_layer_score(layers: &[Value]) -> Result<f64, ScoreError> {
    if layers.is_empty() {
        return Err(ScoreError::NoLayers);
    }
    layers
        .iter()
        .filter_map(layer_score)
        .fold(None, |max: Option<f64>, score| {
            Some(max.map_or(score, |max| max.max(score)))
        })
        .ok_or(ScoreError::NoValidLayer)
}

/// Extracts score of a single layer, being either a number or a
/// `{"score": number}` object.
fn layer_score(layer: &Value) -> Option<f64> {
    match layer {
        Value::Number(n) => n.as_f64(),
        Value::Object(o) => o.get("score").and_then(Value::as_f64),
        _ => None,
    }
    .filter(|score| score.is_finite())
}
