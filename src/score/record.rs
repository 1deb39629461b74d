//! Latest scores of producers and consumers along with the moment they were
//! reported.

use std::time::Duration;

use crate::{
    media::{ConsumerId, ConsumerLayers, MediaKind, ProducerId},
    platform::Instant,
};

use super::{RawScore, ScoreError};

/// Most recently reported score and the moment it was reported.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreRecord {
    /// Representative score.
    score: f64,

    /// [`Instant`] when [`ScoreRecord::score`] was reported.
    updated_at: Instant,
}

impl ScoreRecord {
    /// Creates new [`ScoreRecord`] reported right now.
    pub fn new(score: f64) -> Self {
        Self {
            score,
            updated_at: Instant::now(),
        }
    }

    /// Stores the provided score, resetting its age.
    pub fn set(&mut self, score: f64) {
        self.score = score;
        self.updated_at = Instant::now();
    }

    /// Returns the stored score.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Returns [`Instant`] when the stored score was reported.
    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }

    /// Returns how long the stored score holds.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.updated_at)
    }

    /// Indicates whether the stored score is below `threshold` and has been
    /// holding for at least `min_age`.
    pub fn has_score_below(&self, threshold: f64, min_age: Duration) -> bool {
        self.score < threshold && self.age() >= min_age
    }

    /// Indicates whether the stored score is at or above `target` and has
    /// been holding for at least `min_age`.
    pub fn has_score_at_or_above(
        &self,
        target: f64,
        min_age: Duration,
    ) -> bool {
        self.score >= target && self.age() >= min_age
    }
}

/// Score of a local producer (outbound media stream) reported by the SFU.
#[derive(Clone, Debug)]
pub struct ProducerScore {
    id: ProducerId,
    kind: MediaKind,
    record: ScoreRecord,
}

impl ProducerScore {
    /// Creates new [`ProducerScore`] from the provided [`RawScore`].
    ///
    /// # Errors
    ///
    /// Errors if the provided [`RawScore`] is malformed.
    pub fn new(
        id: ProducerId,
        kind: MediaKind,
        raw: &RawScore,
    ) -> Result<Self, ScoreError> {
        Ok(Self {
            id,
            kind,
            record: ScoreRecord::new(raw.representative()?),
        })
    }

    /// Stores the representative score of the provided [`RawScore`].
    ///
    /// # Errors
    ///
    /// Errors if the provided [`RawScore`] is malformed. Previous score is
    /// left untouched in this case.
    pub fn set_score(&mut self, raw: &RawScore) -> Result<f64, ScoreError> {
        let score = raw.representative()?;
        self.record.set(score);
        Ok(score)
    }

    /// Returns [`ProducerId`] of this [`ProducerScore`].
    pub fn id(&self) -> &ProducerId {
        &self.id
    }

    /// Returns [`MediaKind`] of the producer.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Returns the current score.
    pub fn score(&self) -> f64 {
        self.record.score()
    }

    /// Returns underlying [`ScoreRecord`].
    pub fn record(&self) -> &ScoreRecord {
        &self.record
    }

    /// See [`ScoreRecord::has_score_below`].
    pub fn has_score_below(&self, threshold: f64, min_age: Duration) -> bool {
        self.record.has_score_below(threshold, min_age)
    }

    /// See [`ScoreRecord::has_score_at_or_above`].
    pub fn has_score_at_or_above(
        &self,
        target: f64,
        min_age: Duration,
    ) -> bool {
        self.record.has_score_at_or_above(target, min_age)
    }
}

/// Score of a consumer (inbound media stream) reported by the SFU.
#[derive(Clone, Debug)]
pub struct ConsumerScore {
    id: ConsumerId,
    kind: MediaKind,

    /// `None` until the first score is reported, since a consumer may become
    /// known from its layers update first.
    record: Option<ScoreRecord>,

    /// Layers currently delivered to the consumer.
    layers: Option<ConsumerLayers>,
}

impl ConsumerScore {
    /// Creates new [`ConsumerScore`] without score and layers.
    pub fn new(id: ConsumerId, kind: MediaKind) -> Self {
        Self {
            id,
            kind,
            record: None,
            layers: None,
        }
    }

    /// Stores the remote quality of the provided consumer [`RawScore`].
    ///
    /// # Errors
    ///
    /// Errors if the provided [`RawScore`] is malformed. Previous score is
    /// left untouched in this case.
    pub fn set_score(&mut self, raw: &RawScore) -> Result<f64, ScoreError> {
        let score = raw.remote_quality()?;
        match &mut self.record {
            Some(record) => record.set(score),
            None => self.record = Some(ScoreRecord::new(score)),
        }
        Ok(score)
    }

    /// Stores currently delivered [`ConsumerLayers`].
    pub fn set_layers(&mut self, layers: ConsumerLayers) {
        self.layers = Some(layers);
    }

    /// Returns [`ConsumerId`] of this [`ConsumerScore`].
    pub fn id(&self) -> &ConsumerId {
        &self.id
    }

    /// Returns [`MediaKind`] of the consumer.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Returns the current score, if any was reported.
    pub fn score(&self) -> Option<f64> {
        self.record.as_ref().map(ScoreRecord::score)
    }

    /// Returns currently delivered [`ConsumerLayers`], if known.
    pub fn layers(&self) -> Option<ConsumerLayers> {
        self.layers
    }

    /// See [`ScoreRecord::has_score_below`]. `false` if no score was
    /// reported yet.
    pub fn has_score_below(&self, threshold: f64, min_age: Duration) -> bool {
        self.record
            .as_ref()
            .map_or(false, |r| r.has_score_below(threshold, min_age))
    }

    /// See [`ScoreRecord::has_score_at_or_above`]. `false` if no score was
    /// reported yet.
    pub fn has_score_at_or_above(
        &self,
        target: f64,
        min_age: Duration,
    ) -> bool {
        self.record
            .as_ref()
            .map_or(false, |r| r.has_score_at_or_above(target, min_age))
    }
}
