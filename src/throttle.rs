//! Adaptive RTP throttling driven by [`MeetingExperience`] changes.

use std::{cell::Cell, fmt, rc::Rc};

use log::{debug, error, info};

use crate::{
    conf,
    experience::MeetingExperience,
    media::{
        ConsumerId, InboundConsumer, MediaKind, RtpEncodingParameters,
        RtpSender,
    },
    platform,
};

/// Inbound consumer along with the reasons it's paused for.
///
/// The underlying [`InboundConsumer`] is paused while any of the reasons
/// holds and resumed once none does.
pub struct InboundStream {
    /// Underlying consumer.
    consumer: Rc<dyn InboundConsumer>,

    /// Paused because the application hasn't accepted this stream.
    locally_paused: Cell<bool>,

    /// Paused by the remote sender.
    remotely_paused: Cell<bool>,

    /// Paused by [`ThrottleController::throttle`].
    paused_by_throttle: Cell<bool>,
}

impl InboundStream {
    /// Wraps the provided [`InboundConsumer`], pausing it if it's not
    /// `accepted`.
    pub fn new(consumer: Rc<dyn InboundConsumer>, accepted: bool) -> Self {
        let this = Self {
            consumer,
            locally_paused: Cell::new(false),
            remotely_paused: Cell::new(false),
            paused_by_throttle: Cell::new(false),
        };
        this.update(|| this.locally_paused.set(!accepted));
        this
    }

    /// Returns [`ConsumerId`] of the underlying consumer.
    pub fn id(&self) -> ConsumerId {
        self.consumer.id()
    }

    /// Returns [`MediaKind`] of the underlying consumer.
    pub fn kind(&self) -> MediaKind {
        self.consumer.kind()
    }

    /// Indicates whether the underlying consumer is paused for any reason.
    pub fn is_paused(&self) -> bool {
        self.locally_paused.get()
            || self.remotely_paused.get()
            || self.paused_by_throttle.get()
    }

    /// Indicates whether this stream is paused by the application.
    pub fn is_locally_paused(&self) -> bool {
        self.locally_paused.get()
    }

    /// Indicates whether this stream is paused by the SFU.
    pub fn is_remotely_paused(&self) -> bool {
        self.remotely_paused.get()
    }

    /// Indicates whether this stream is paused by RTP throttling.
    pub fn is_paused_by_throttle(&self) -> bool {
        self.paused_by_throttle.get()
    }

    /// Pauses or resumes this stream on behalf of the application.
    pub fn set_locally_paused(&self, paused: bool) {
        self.update(|| self.locally_paused.set(paused));
    }

    /// Pauses or resumes this stream on behalf of the remote sender.
    pub fn set_remotely_paused(&self, paused: bool) {
        self.update(|| self.remotely_paused.set(paused));
    }

    /// Pauses this stream on behalf of the [`ThrottleController`].
    fn set_paused_by_throttle(&self, paused: bool) {
        self.update(|| self.paused_by_throttle.set(paused));
    }

    /// Applies the provided change of the pause reasons, pausing or resuming
    /// the underlying consumer if it changes the overall state.
    fn update<F: FnOnce()>(&self, change: F) {
        let was_paused = self.is_paused();
        change();
        match (was_paused, self.is_paused()) {
            (false, true) => self.consumer.pause(),
            (true, false) => self.consumer.resume(),
            _ => (),
        }
    }
}

impl fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundStream")
            .field("id", &self.id())
            .field("locally_paused", &self.locally_paused.get())
            .field("remotely_paused", &self.remotely_paused.get())
            .field("paused_by_throttle", &self.paused_by_throttle.get())
            .finish()
    }
}

/// Limits outbound encodings and pauses inbound video while the
/// [`MeetingExperience`] is bad.
#[derive(Debug)]
pub struct ThrottleController {
    /// Limits and ceilings of the outbound encodings.
    conf: conf::Throttle,

    /// Indicates whether RTP is currently throttled.
    throttled: Cell<bool>,
}

impl ThrottleController {
    /// Creates new non-throttled [`ThrottleController`].
    pub fn new(conf: conf::Throttle) -> Self {
        Self {
            conf,
            throttled: Cell::new(false),
        }
    }

    /// Indicates whether RTP is currently throttled.
    pub fn is_throttled(&self) -> bool {
        self.throttled.get()
    }

    /// Throttles on [`MeetingExperience::Bad`] and lifts throttling on
    /// [`MeetingExperience::Good`].
    ///
    /// Returns the new throttled state if it has changed.
    pub fn on_meeting_experience<'a, S, I>(
        &self,
        experience: MeetingExperience,
        senders: S,
        streams: I,
    ) -> Option<bool>
    where
        S: IntoIterator<Item = &'a Rc<dyn RtpSender>>,
        I: IntoIterator<Item = &'a InboundStream>,
    {
        let changed = match experience {
            MeetingExperience::Bad => self.throttle(senders, streams),
            MeetingExperience::Good => self.unthrottle(senders, streams),
        };
        if changed {
            Some(self.is_throttled())
        } else {
            None
        }
    }

    /// Limits outbound encodings of the provided senders and pauses active
    /// inbound video streams.
    ///
    /// Does nothing and returns `false` if RTP is throttled already.
    pub fn throttle<'a, S, I>(&self, senders: S, streams: I) -> bool
    where
        S: IntoIterator<Item = &'a Rc<dyn RtpSender>>,
        I: IntoIterator<Item = &'a InboundStream>,
    {
        if self.throttled.get() {
            debug!("ThrottleController: RTP is throttled already");
            return false;
        }
        info!("ThrottleController: throttling RTP");

        for sender in senders {
            match sender.kind() {
                MediaKind::Audio => {
                    limit_encodings(sender, self.conf.audio_max_bitrate, None);
                }
                MediaKind::Video => limit_encodings(
                    sender,
                    self.conf.video_max_bitrate,
                    Some(self.conf.video_max_framerate),
                ),
            }
        }
        for stream in streams {
            if stream.kind() == MediaKind::Video && !stream.is_paused() {
                debug!("ThrottleController: pausing consumer {}", stream.id());
                stream.set_paused_by_throttle(true);
            }
        }

        self.throttled.set(true);
        true
    }

    /// Restores outbound encodings of the provided senders to their ceilings
    /// and resumes inbound streams paused by [`ThrottleController::throttle`].
    ///
    /// Does nothing and returns `false` if RTP is not throttled.
    pub fn unthrottle<'a, S, I>(&self, senders: S, streams: I) -> bool
    where
        S: IntoIterator<Item = &'a Rc<dyn RtpSender>>,
        I: IntoIterator<Item = &'a InboundStream>,
    {
        if !self.throttled.get() {
            debug!("ThrottleController: RTP is not throttled");
            return false;
        }
        info!("ThrottleController: lifting RTP throttling");

        for sender in senders {
            match sender.kind() {
                MediaKind::Audio => limit_encodings(
                    sender,
                    self.conf.audio_restore_bitrate,
                    None,
                ),
                MediaKind::Video => limit_encodings(
                    sender,
                    self.conf.video_restore_bitrate,
                    Some(self.conf.video_restore_framerate),
                ),
            }
        }
        for stream in streams {
            stream.set_paused_by_throttle(false);
        }

        self.throttled.set(false);
        true
    }

    /// Keeps the provided inbound video stream paused until throttling is
    /// lifted, if RTP is currently throttled.
    ///
    /// Used for streams which appear or are going to be resumed while RTP is
    /// throttled. Returns `true` if the stream is held.
    pub fn hold(&self, stream: &InboundStream) -> bool {
        if !self.throttled.get() || stream.kind() != MediaKind::Video {
            return false;
        }
        stream.set_paused_by_throttle(true);
        true
    }
}

/// Applies the provided limits to all the encodings of the provided
/// [`RtpSender`].
///
/// Senders without encodings are left untouched. Failures are logged.
fn limit_encodings(
    sender: &Rc<dyn RtpSender>,
    max_bitrate: u32,
    max_framerate: Option<u32>,
) {
    let producer_id = sender.producer_id();
    let encodings: Vec<_> = sender
        .encodings()
        .into_iter()
        .map(|enc| RtpEncodingParameters {
            max_bitrate: Some(max_bitrate),
            max_framerate: max_framerate.or(enc.max_framerate),
            ..enc
        })
        .collect();
    if encodings.is_empty() {
        debug!(
            "ThrottleController: producer {} has no encodings",
            producer_id,
        );
        return;
    }

    debug!(
        "ThrottleController: new encodings of producer {}: {:?}",
        producer_id, encodings,
    );
    let set = sender.set_encodings(encodings);
    platform::spawn(async move {
        if let Err(e) = set.await {
            error!(
                "ThrottleController: failed to limit encodings of producer \
                 {}: {}",
                producer_id, e,
            );
        }
    });
}
