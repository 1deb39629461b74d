//! Meeting experience evaluation.
//!
//! [`MeetingExperienceDetector`] combines packet loss of the receiving
//! transport with quality scores of local producers and decides, on a fixed
//! tick, whether the meeting experience is [`MeetingExperience::Good`] or
//! [`MeetingExperience::Bad`].

mod packet_loss;

use std::{
    cell::{Cell, RefCell},
    collections::{hash_map::Entry, HashMap},
    rc::{Rc, Weak},
    time::Duration,
};

use derive_more::Display;
use futures::stream::LocalBoxStream;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    conf,
    media::{ConsumerId, ConsumerLayers, MediaKind, ProducerId, RecvTransport},
    platform,
    score::{ConsumerScore, ProducerScore, RawScore},
    utils::{EventSender, TaskHandle},
};

#[doc(inline)]
pub use self::packet_loss::{
    packet_loss, PacketCounts, PacketLossSampler, PacketLossStreaks,
};

/// Evaluated experience of the meeting.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MeetingExperience {
    /// Media flows without noticeable degradation.
    #[display(fmt = "good")]
    Good,

    /// Media is degraded: packets are lost and local producers are reported
    /// with low scores.
    #[display(fmt = "bad")]
    Bad,
}

impl Default for MeetingExperience {
    fn default() -> Self {
        Self::Good
    }
}

/// Notification about [`MeetingExperience`] change.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MeetingExperienceEvent {
    /// New [`MeetingExperience`].
    pub state: MeetingExperience,
}

/// Detector of the [`MeetingExperience`].
///
/// Must be created inside a [`tokio::task::LocalSet`], as it spawns its
/// evaluation loop right away.
#[derive(Debug)]
pub struct MeetingExperienceDetector(Rc<Inner>);

#[derive(Debug)]
struct Inner {
    /// Thresholds and timings of the evaluation.
    conf: conf::Detector,

    /// Current [`MeetingExperience`].
    state: Cell<MeetingExperience>,

    /// Latest scores of the local producers.
    producers: RefCell<HashMap<ProducerId, ProducerScore>>,

    /// Latest scores of the consumers.
    ///
    /// They don't affect the evaluation.
    consumers: RefCell<HashMap<ConsumerId, ConsumerScore>>,

    /// Packet loss sampler of the receiving transport.
    sampler: PacketLossSampler,

    /// Sender of the [`MeetingExperienceEvent`]s.
    event_tx: EventSender<MeetingExperienceEvent>,

    /// Evaluation loop.
    eval_task: RefCell<Option<TaskHandle>>,

    /// Indicates whether this detector is closed.
    closed: Cell<bool>,
}

impl MeetingExperienceDetector {
    /// Creates new [`MeetingExperienceDetector`] in the
    /// [`MeetingExperience::Good`] state and starts its evaluation loop.
    pub fn new(conf: conf::Detector) -> Self {
        let inner = Rc::new(Inner {
            sampler: PacketLossSampler::new(&conf),
            conf,
            state: Cell::default(),
            producers: RefCell::default(),
            consumers: RefCell::default(),
            event_tx: EventSender::new(),
            eval_task: RefCell::default(),
            closed: Cell::new(false),
        });

        let task = TaskHandle::spawn(Self::eval_loop(
            Rc::downgrade(&inner),
            inner.conf.eval_interval,
        ));
        inner.eval_task.replace(Some(task));

        Self(inner)
    }

    /// Evaluates the [`MeetingExperience`] every `interval` until the
    /// detector is dropped.
    async fn eval_loop(inner: Weak<Inner>, interval: Duration) {
        loop {
            platform::delay_for(interval).await;
            match inner.upgrade() {
                Some(inner) => inner.evaluate(),
                None => break,
            }
        }
    }

    /// Returns stream of [`MeetingExperienceEvent`]s.
    ///
    /// Only the last subscription receives events. The stream ends once the
    /// detector is closed.
    pub fn subscribe(&self) -> LocalBoxStream<'static, MeetingExperienceEvent> {
        self.0.event_tx.subscribe()
    }

    /// Starts sampling packet loss of the provided [`RecvTransport`].
    ///
    /// Does nothing if some transport is sampled already.
    pub fn attach_transport(&self, transport: Rc<dyn RecvTransport>) {
        if self.0.closed.get() {
            debug!("MeetingExperienceDetector: attach after close is ignored");
            return;
        }
        self.0.sampler.attach(transport);
    }

    /// Stores score of the local producer, reported by the SFU.
    ///
    /// Malformed input is logged and dropped.
    pub fn add_producer_score(
        &self,
        id: ProducerId,
        kind: Option<MediaKind>,
        score: Option<&RawScore>,
    ) {
        debug!(
            "MeetingExperienceDetector: add_producer_score [id: {}, kind: \
             {:?}, score: {:?}]",
            id, kind, score,
        );
        if self.0.closed.get() {
            return;
        }
        let (kind, score) = match validate(id.0.as_str(), kind, score) {
            Some(valid) => valid,
            None => {
                warn!(
                    "MeetingExperienceDetector: dropping producer score \
                     [id: {:?}, kind: {:?}, score: {:?}]",
                    id.0, kind, score,
                );
                return;
            }
        };

        let result = match self.0.producers.borrow_mut().entry(id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().set_score(score).map(drop)
            }
            Entry::Vacant(entry) => {
                ProducerScore::new(entry.key().clone(), kind, score).map(
                    |producer| {
                        let _ = entry.insert(producer);
                    },
                )
            }
        };
        if let Err(e) = result {
            warn!(
                "MeetingExperienceDetector: malformed producer score \
                 {:?}: {}",
                score, e,
            );
        }
    }

    /// Stores score of the consumer, reported by the SFU.
    ///
    /// Malformed input is logged and dropped.
    pub fn add_consumer_score(
        &self,
        id: ConsumerId,
        kind: Option<MediaKind>,
        score: Option<&RawScore>,
    ) {
        debug!(
            "MeetingExperienceDetector: add_consumer_score [id: {}, kind: \
             {:?}, score: {:?}]",
            id, kind, score,
        );
        if self.0.closed.get() {
            return;
        }
        let (kind, score) = match validate(id.0.as_str(), kind, score) {
            Some(valid) => valid,
            None => {
                warn!(
                    "MeetingExperienceDetector: dropping consumer score \
                     [id: {:?}, kind: {:?}, score: {:?}]",
                    id.0, kind, score,
                );
                return;
            }
        };

        let result = match self.0.consumers.borrow_mut().entry(id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().set_score(score).map(drop)
            }
            Entry::Vacant(entry) => {
                let mut consumer =
                    ConsumerScore::new(entry.key().clone(), kind);
                consumer.set_score(score).map(|_| {
                    let _ = entry.insert(consumer);
                })
            }
        };
        if let Err(e) = result {
            warn!(
                "MeetingExperienceDetector: malformed consumer score {:?}: {}",
                score, e,
            );
        }
    }

    /// Stores [`ConsumerLayers`] currently delivered to the consumer.
    pub fn update_consumer_layers(
        &self,
        id: ConsumerId,
        layers: ConsumerLayers,
    ) {
        if self.0.closed.get() {
            return;
        }
        if id.0.is_empty() {
            warn!("MeetingExperienceDetector: layers of consumer without ID");
            return;
        }
        let mut consumers = self.0.consumers.borrow_mut();
        consumers
            .entry(id.clone())
            .or_insert_with(|| ConsumerScore::new(id, MediaKind::Video))
            .set_layers(layers);
    }

    /// Stops tracking the producer with the provided [`ProducerId`].
    pub fn remove_producer(&self, id: &ProducerId) {
        if self.0.producers.borrow_mut().remove(id).is_some() {
            debug!("MeetingExperienceDetector: removed producer {}", id);
        }
    }

    /// Stops tracking the consumer with the provided [`ConsumerId`].
    pub fn remove_consumer(&self, id: &ConsumerId) {
        if self.0.consumers.borrow_mut().remove(id).is_some() {
            debug!("MeetingExperienceDetector: removed consumer {}", id);
        }
    }

    /// Returns current [`MeetingExperience`].
    pub fn state(&self) -> MeetingExperience {
        self.0.state.get()
    }

    /// Returns current [`PacketLossStreaks`].
    pub fn packet_loss_streaks(&self) -> PacketLossStreaks {
        self.0.sampler.streaks()
    }

    /// Returns latest score of the producer with the provided [`ProducerId`].
    pub fn producer_score(&self, id: &ProducerId) -> Option<f64> {
        self.0.producers.borrow().get(id).map(ProducerScore::score)
    }

    /// Returns latest [`ConsumerScore`] of the consumer with the provided
    /// [`ConsumerId`].
    pub fn consumer(&self, id: &ConsumerId) -> Option<ConsumerScore> {
        self.0.consumers.borrow().get(id).cloned()
    }

    /// Returns number of tracked producers.
    pub fn producers_count(&self) -> usize {
        self.0.producers.borrow().len()
    }

    /// Returns number of tracked consumers.
    pub fn consumers_count(&self) -> usize {
        self.0.consumers.borrow().len()
    }

    /// Stops packet loss sampling and evaluation, and ends the
    /// [`MeetingExperienceEvent`]s stream.
    ///
    /// Closed detector never evaluates again.
    pub fn close(&self) {
        if self.0.closed.replace(true) {
            return;
        }
        debug!("MeetingExperienceDetector: close");
        drop(self.0.eval_task.borrow_mut().take());
        self.0.sampler.close();
        self.0.event_tx.close();
    }

    /// Indicates whether this detector is closed.
    pub fn is_closed(&self) -> bool {
        self.0.closed.get()
    }
}

impl Drop for MeetingExperienceDetector {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    /// Evaluates the [`MeetingExperience`], emitting
    /// [`MeetingExperienceEvent`] if it has changed.
    fn evaluate(&self) {
        if self.closed.get() {
            return;
        }
        let current = self.state.get();
        let next = match current {
            MeetingExperience::Good if self.is_failing() => {
                MeetingExperience::Bad
            }
            MeetingExperience::Bad if self.is_recovered() => {
                MeetingExperience::Good
            }
            _ => return,
        };

        info!(
            "MeetingExperienceDetector: experience changed [{} -> {}, \
             streaks: {:?}]",
            current,
            next,
            self.sampler.streaks(),
        );
        self.state.set(next);
        self.event_tx.send_event(MeetingExperienceEvent { state: next });
    }

    /// Indicates whether packets are being lost for too long while some
    /// producer holds a low score.
    fn is_failing(&self) -> bool {
        let conf = &self.conf;
        self.sampler.streaks().lossy > conf.failure_interval
            && self.any_producer(|p| {
                p.has_score_below(conf.failure_score, conf.failure_time)
            })
    }

    /// Indicates whether no packets are lost for long enough while some
    /// producer holds the top score.
    fn is_recovered(&self) -> bool {
        let conf = &self.conf;
        self.sampler.streaks().lossless >= conf.recovery_interval
            && self.any_producer(|p| {
                p.has_score_at_or_above(conf.recovery_score, conf.recovery_time)
            })
    }

    /// Checks the producers of each [`MediaKind`] with the provided
    /// predicate, returning `true` on the first matching one.
    fn any_producer<F>(&self, pred: F) -> bool
    where
        F: Fn(&ProducerScore) -> bool,
    {
        let producers = self.producers.borrow();
        [MediaKind::Audio, MediaKind::Video].iter().any(|kind| {
            producers
                .values()
                .filter(|p| p.kind() == *kind)
                .any(|p| pred(p))
        })
    }
}

/// Checks that the score notification carries an ID, a [`MediaKind`] and a
/// score.
fn validate<'a>(
    id: &str,
    kind: Option<MediaKind>,
    score: Option<&'a RawScore>,
) -> Option<(MediaKind, &'a RawScore)> {
    if id.is_empty() {
        return None;
    }
    Some((kind?, score?))
}
