//! Glue between the SFU notifications, [`MeetingExperienceDetector`] and
//! [`ThrottleController`].

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
};

use futures::{stream::LocalBoxStream, StreamExt as _};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    conf::Conf,
    experience::{MeetingExperience, MeetingExperienceDetector},
    media::{
        ConsumerId, InboundConsumer, MediaKind, ProducerId, RecvTransport,
        RtpSender,
    },
    score::RawScore,
    signalling::{SfuMessage, SfuMessageError},
    throttle::{InboundStream, ThrottleController},
    utils::{EventSender, TaskHandle},
};

/// Events emitted by [`RtpThrottleManager`] to the application.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RtcManagerEvent {
    /// [`MeetingExperience`] has changed.
    MeetingExperienceChanged { state: MeetingExperience },

    /// RTP throttling was applied or lifted.
    RtpThrottled {
        #[serde(rename = "rtpThrottled")]
        rtp_throttled: bool,
    },

    /// Quality of the local media sending has changed.
    LocalRtpConnectionQuality { quality: f64 },

    /// Quality of the media received by the consumer has changed.
    RemoteRtpConnectionQuality {
        #[serde(rename = "consumerId")]
        consumer_id: ConsumerId,
        quality: f64,
    },
}

/// Owner of the local senders and inbound streams, throttling them
/// according to the [`MeetingExperience`].
///
/// Must be created inside a [`tokio::task::LocalSet`].
#[derive(Debug)]
pub struct RtpThrottleManager(Rc<Inner>);

struct Inner {
    /// `None` if RTP throttling is disabled.
    detector: Option<MeetingExperienceDetector>,

    controller: ThrottleController,

    /// Local senders by their [`MediaKind`].
    senders: RefCell<HashMap<MediaKind, Rc<dyn RtpSender>>>,

    /// Last reported local quality by [`ProducerId`].
    local_quality: RefCell<HashMap<ProducerId, f64>>,

    /// Inbound streams by their [`ConsumerId`].
    streams: RefCell<HashMap<ConsumerId, InboundStream>>,

    /// Last reported remote quality by [`ConsumerId`].
    remote_quality: RefCell<HashMap<ConsumerId, f64>>,

    event_tx: EventSender<RtcManagerEvent>,

    /// Listener of the [`MeetingExperienceDetector`] events.
    experience_task: RefCell<Option<TaskHandle>>,

    /// Indicates whether the session is going to be shut down.
    shutting_down: Cell<bool>,

    closed: Cell<bool>,
}

impl RtpThrottleManager {
    /// Creates new [`RtpThrottleManager`].
    ///
    /// [`MeetingExperienceDetector`] is created only if throttling is
    /// enabled in the provided [`Conf`].
    pub fn new(conf: &Conf) -> Self {
        let detector = if conf.throttle.enabled {
            Some(MeetingExperienceDetector::new(conf.detector.clone()))
        } else {
            warn!(
                "RtpThrottleManager: refusing to init \
                 MeetingExperienceDetector, RTP throttling is disabled",
            );
            None
        };

        let inner = Rc::new(Inner {
            detector,
            controller: ThrottleController::new(conf.throttle.clone()),
            senders: RefCell::default(),
            local_quality: RefCell::default(),
            streams: RefCell::default(),
            remote_quality: RefCell::default(),
            event_tx: EventSender::new(),
            experience_task: RefCell::default(),
            shutting_down: Cell::new(false),
            closed: Cell::new(false),
        });

        if let Some(detector) = &inner.detector {
            let mut events = detector.subscribe();
            let weak = Rc::downgrade(&inner);
            let task = TaskHandle::spawn(async move {
                while let Some(event) = events.next().await {
                    match Weak::upgrade(&weak) {
                        Some(inner) => inner.on_meeting_experience(event.state),
                        None => break,
                    }
                }
            });
            inner.experience_task.replace(Some(task));
        }

        Self(inner)
    }

    /// Returns stream of [`RtcManagerEvent`]s.
    ///
    /// Only the last subscription receives events.
    pub fn subscribe(&self) -> LocalBoxStream<'static, RtcManagerEvent> {
        self.0.event_tx.subscribe()
    }

    /// Returns [`MeetingExperienceDetector`] if throttling is enabled.
    pub fn detector(&self) -> Option<&MeetingExperienceDetector> {
        self.0.detector.as_ref()
    }

    /// Starts packet loss sampling of the provided receiving transport.
    pub fn attach_recv_transport(&self, transport: Rc<dyn RecvTransport>) {
        if let Some(detector) = &self.0.detector {
            detector.attach_transport(transport);
        }
    }

    /// Sets the local sender of its [`MediaKind`], replacing the previous
    /// one.
    pub fn set_sender(&self, sender: Rc<dyn RtpSender>) {
        let kind = sender.kind();
        debug!(
            "RtpThrottleManager: set {} sender [producer: {}]",
            kind,
            sender.producer_id(),
        );
        if let Some(prev) = self.0.senders.borrow_mut().insert(kind, sender) {
            self.forget_producer(&prev.producer_id());
        }
    }

    /// Removes the local sender of the provided [`MediaKind`].
    pub fn remove_sender(&self, kind: MediaKind) {
        let removed = self.0.senders.borrow_mut().remove(&kind);
        if let Some(sender) = removed {
            debug!("RtpThrottleManager: removed {} sender", kind);
            self.forget_producer(&sender.producer_id());
        }
    }

    /// Starts managing the provided [`InboundConsumer`].
    ///
    /// Consumer is paused until `accepted` by the application. Video
    /// received while RTP is throttled is paused until throttling is lifted.
    pub fn add_consumer(
        &self,
        consumer: Rc<dyn InboundConsumer>,
        accepted: bool,
    ) {
        let stream = InboundStream::new(consumer, accepted);
        debug!("RtpThrottleManager: add consumer {}", stream.id());
        if self.0.controller.hold(&stream) {
            info!(
                "RtpThrottleManager: consumer {} is held, RTP is throttled",
                stream.id(),
            );
        }
        drop(self.0.streams.borrow_mut().insert(stream.id(), stream));
    }

    /// Pauses or resumes the consumer on behalf of the application.
    pub fn set_consumer_accepted(&self, id: &ConsumerId, accepted: bool) {
        let streams = self.0.streams.borrow();
        let stream = match streams.get(id) {
            Some(stream) => stream,
            None => {
                debug!("RtpThrottleManager: unknown consumer {}", id);
                return;
            }
        };
        if accepted {
            self.0.controller.hold(stream);
        }
        stream.set_locally_paused(!accepted);
    }

    /// Stops managing the consumer with the provided [`ConsumerId`].
    pub fn remove_consumer(&self, id: &ConsumerId) {
        drop(self.0.streams.borrow_mut().remove(id));
        let _ = self.0.remote_quality.borrow_mut().remove(id);
        if let Some(detector) = &self.0.detector {
            detector.remove_consumer(id);
        }
    }

    /// Returns number of managed consumers.
    pub fn consumers_count(&self) -> usize {
        self.0.streams.borrow().len()
    }

    /// Indicates whether the consumer with the provided [`ConsumerId`] is
    /// paused for any reason.
    pub fn is_consumer_paused(&self, id: &ConsumerId) -> Option<bool> {
        self.0.streams.borrow().get(id).map(InboundStream::is_paused)
    }

    /// Parses and handles the provided raw SFU notification.
    ///
    /// Malformed notifications are logged and dropped.
    pub fn on_sfu_message(&self, json: &str) {
        match SfuMessage::parse(json) {
            Ok(msg) => self.handle_sfu_message(msg),
            Err(SfuMessageError::UnknownMethod(method)) => {
                debug!(
                    "RtpThrottleManager: unknown message method {:?}",
                    method,
                );
            }
            Err(e) => warn!("RtpThrottleManager: {}", e),
        }
    }

    /// Handles the provided [`SfuMessage`].
    pub fn handle_sfu_message(&self, msg: SfuMessage) {
        match msg {
            SfuMessage::ProducerScore(data) => self.on_producer_score(
                data.producer_id,
                data.kind,
                data.score.as_ref(),
            ),
            SfuMessage::ConsumerScore(data) => self.on_consumer_score(
                data.consumer_id,
                data.kind,
                data.score.as_ref(),
            ),
            SfuMessage::ConsumerPaused(data) => {
                if let Some(stream) =
                    self.0.streams.borrow().get(&data.consumer_id)
                {
                    stream.set_remotely_paused(true);
                }
            }
            SfuMessage::ConsumerResumed(data) => {
                if let Some(stream) =
                    self.0.streams.borrow().get(&data.consumer_id)
                {
                    if self.0.controller.hold(stream) {
                        info!(
                            "RtpThrottleManager: consumer {} stays paused, \
                             RTP is throttled",
                            data.consumer_id,
                        );
                    }
                    stream.set_remotely_paused(false);
                }
            }
            SfuMessage::ConsumerClosed(data) => {
                debug!(
                    "RtpThrottleManager: consumer {} closed [reason: {:?}]",
                    data.consumer_id, data.reason,
                );
                self.remove_consumer(&data.consumer_id);
            }
            SfuMessage::ConsumerLayersChanged(data) => {
                if let (Some(detector), Some(layers)) =
                    (&self.0.detector, data.layers)
                {
                    detector.update_consumer_layers(data.consumer_id, layers);
                }
            }
        }
    }

    /// Handles score of the local producer.
    ///
    /// Emits [`RtcManagerEvent::LocalRtpConnectionQuality`] and forwards the
    /// score to the [`MeetingExperienceDetector`] only if the score has
    /// changed. Audio quality is not emitted while a video sender is set.
    pub fn on_producer_score(
        &self,
        producer_id: ProducerId,
        kind: Option<MediaKind>,
        score: Option<&RawScore>,
    ) {
        let (kind, score) = match (kind, score) {
            (Some(kind), Some(score)) => (kind, score),
            _ => {
                warn!(
                    "RtpThrottleManager: incomplete producer score \
                     [producer: {}, kind: {:?}, score: {:?}]",
                    producer_id, kind, score,
                );
                return;
            }
        };
        let quality = match score.representative() {
            Ok(quality) => quality,
            Err(e) => {
                warn!(
                    "RtpThrottleManager: producer {} score {:?}: {}",
                    producer_id, score, e,
                );
                return;
            }
        };

        #[allow(clippy::float_cmp)]
        let unchanged = self
            .0
            .local_quality
            .borrow_mut()
            .insert(producer_id.clone(), quality)
            == Some(quality);
        if unchanged {
            return;
        }

        let video_is_sent =
            self.0.senders.borrow().contains_key(&MediaKind::Video);
        if kind == MediaKind::Video || !video_is_sent {
            self.0
                .event_tx
                .send_event(RtcManagerEvent::LocalRtpConnectionQuality {
                    quality,
                });
        }
        if let Some(detector) = &self.0.detector {
            detector.add_producer_score(
                producer_id,
                Some(kind),
                Some(&RawScore::from(quality)),
            );
        }
    }

    /// Handles score of the consumer.
    ///
    /// Emits [`RtcManagerEvent::RemoteRtpConnectionQuality`] and forwards
    /// the score to the [`MeetingExperienceDetector`] only if the quality
    /// has changed. Scores of unknown consumers are ignored.
    pub fn on_consumer_score(
        &self,
        consumer_id: ConsumerId,
        kind: Option<MediaKind>,
        score: Option<&RawScore>,
    ) {
        if !self.0.streams.borrow().contains_key(&consumer_id) {
            debug!(
                "RtpThrottleManager: score of unknown consumer {}",
                consumer_id,
            );
            return;
        }
        let quality = match score.map(RawScore::remote_quality) {
            Some(Ok(quality)) => quality,
            Some(Err(e)) => {
                warn!(
                    "RtpThrottleManager: consumer {} score {:?}: {}",
                    consumer_id, score, e,
                );
                return;
            }
            None => {
                warn!(
                    "RtpThrottleManager: consumer {} score is missing",
                    consumer_id,
                );
                return;
            }
        };

        #[allow(clippy::float_cmp)]
        let unchanged = self
            .0
            .remote_quality
            .borrow_mut()
            .insert(consumer_id.clone(), quality)
            == Some(quality);
        if unchanged {
            return;
        }

        self.0
            .event_tx
            .send_event(RtcManagerEvent::RemoteRtpConnectionQuality {
                consumer_id: consumer_id.clone(),
                quality,
            });
        if let Some(detector) = &self.0.detector {
            detector.add_consumer_score(
                consumer_id,
                kind,
                Some(&RawScore::from(quality)),
            );
        }
    }

    /// Marks the session as going to be shut down, so that
    /// [`MeetingExperience`] changes are not acted on anymore.
    pub fn prepare_for_shutdown(&self) {
        info!("RtpThrottleManager: preparing for shutdown");
        self.0.shutting_down.set(true);
    }

    /// Indicates whether [`RtpThrottleManager::prepare_for_shutdown`] was
    /// called.
    pub fn is_shutting_down(&self) -> bool {
        self.0.shutting_down.get()
    }

    /// Indicates whether RTP is currently throttled.
    pub fn is_rtp_throttled(&self) -> bool {
        self.0.controller.is_throttled()
    }

    /// Returns current [`MeetingExperience`], if throttling is enabled.
    pub fn meeting_experience(&self) -> Option<MeetingExperience> {
        self.0.detector.as_ref().map(MeetingExperienceDetector::state)
    }

    /// Closes the [`MeetingExperienceDetector`] and ends the
    /// [`RtcManagerEvent`]s stream.
    pub fn close(&self) {
        if self.0.closed.replace(true) {
            return;
        }
        debug!("RtpThrottleManager: close");
        drop(self.0.experience_task.borrow_mut().take());
        if let Some(detector) = &self.0.detector {
            detector.close();
        }
        self.0.event_tx.close();
    }

    /// Removes all the data of the replaced or removed producer.
    fn forget_producer(&self, id: &ProducerId) {
        let _ = self.0.local_quality.borrow_mut().remove(id);
        if let Some(detector) = &self.0.detector {
            detector.remove_producer(id);
        }
    }
}

impl Drop for RtpThrottleManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("detector", &self.detector)
            .field("controller", &self.controller)
            .field("senders", &self.senders.borrow().keys())
            .field("streams", &self.streams.borrow().values())
            .field("shutting_down", &self.shutting_down.get())
            .field("closed", &self.closed.get())
            .finish()
    }
}

impl Inner {
    /// Applies or lifts RTP throttling according to the new
    /// [`MeetingExperience`].
    fn on_meeting_experience(&self, state: MeetingExperience) {
        if self.closed.get() {
            return;
        }
        self.event_tx
            .send_event(RtcManagerEvent::MeetingExperienceChanged { state });
        if self.shutting_down.get() {
            debug!(
                "RtpThrottleManager: ignoring {} experience, shutting down",
                state,
            );
            return;
        }

        let changed = self.controller.on_meeting_experience(
            state,
            self.senders.borrow().values(),
            self.streams.borrow().values(),
        );
        if let Some(rtp_throttled) = changed {
            self.event_tx
                .send_event(RtcManagerEvent::RtpThrottled { rtp_throttled });
        }
    }
}
