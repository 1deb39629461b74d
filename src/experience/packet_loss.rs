//! Packet loss sampling of the receiving transport.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use futures::future;
use log::{debug, error};

use crate::{
    conf,
    media::RecvTransport,
    platform,
    stats::{RtcStat, RtcStatsType},
    utils::TaskHandle,
};

/// Cumulative packet counters of the inbound RTP streams.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PacketCounts {
    /// Total number of received packets.
    pub received: i64,

    /// Total number of lost packets.
    pub lost: i64,
}

impl PacketCounts {
    /// Sums packet counters of all the inbound RTP streams in the provided
    /// stats, except the probation stream with the `probe_mid`.
    ///
    /// Returns `None` if there are no such streams.
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_stats(stats: &[RtcStat], probe_mid: &str) -> Option<Self> {
        stats
            .iter()
            .filter_map(|stat| match &stat.stats {
                RtcStatsType::InboundRtp(inbound)
                    if inbound.mid.as_deref() != Some(probe_mid) =>
                {
                    Some(inbound)
                }
                _ => None,
            })
            .fold(None, |acc: Option<Self>, inbound| {
                let acc = acc.unwrap_or_default();
                Some(Self {
                    received: acc.received + inbound.packets_received as i64,
                    lost: acc.lost + inbound.packets_lost.unwrap_or(0),
                })
            })
    }
}

/// Calculates packet loss ratio between two [`PacketCounts`] samples.
///
/// Returns `0` if no new packets were lost (including negative deltas caused
/// by stats resets), or if no new packets were received.
#[allow(clippy::cast_precision_loss)]
pub fn packet_loss(prev: PacketCounts, now: PacketCounts) -> f64 {
    let lost = now.lost - prev.lost;
    if lost <= 0 {
        return 0.0;
    }
    let received = now.received - prev.received;
    if received <= 0 {
        return 0.0;
    }
    lost as f64 / received as f64
}

/// Numbers of consecutive polls with and without packet loss above the
/// threshold.
///
/// Only one of them is non-zero at a time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PacketLossStreaks {
    /// Consecutive polls with packet loss above the threshold.
    pub lossy: u32,

    /// Consecutive polls without packet loss above the threshold.
    pub lossless: u32,
}

impl PacketLossStreaks {
    /// Extends the lossy streak if `lossy`, or the lossless one otherwise,
    /// resetting the other one.
    pub fn record(&mut self, lossy: bool) {
        if lossy {
            self.lossy = self.lossy.saturating_add(1);
            self.lossless = 0;
        } else {
            self.lossless = self.lossless.saturating_add(1);
            self.lossy = 0;
        }
    }
}

/// State updated on every successful poll.
#[derive(Debug, Default)]
struct Sample {
    /// Counters of the previous successful poll.
    prev: PacketCounts,

    /// Packet loss calculated on the previous successful poll.
    packet_loss: f64,

    /// Current streaks.
    streaks: PacketLossStreaks,
}

/// Polls stats of the attached [`RecvTransport`] and maintains
/// [`PacketLossStreaks`].
#[derive(Debug)]
pub struct PacketLossSampler {
    /// Packet loss ratio above which a poll is counted as lossy.
    threshold: f64,

    /// Stats polling interval.
    poll_interval: Duration,

    /// `mid` of the probation stream excluded from calculation.
    probe_mid: Rc<str>,

    /// Results of the polls.
    sample: Rc<RefCell<Sample>>,

    /// Indicates whether a [`RecvTransport`] is attached and being polled.
    attached: Rc<Cell<bool>>,

    /// Indicates whether this [`PacketLossSampler`] is closed.
    closed: Rc<Cell<bool>>,

    /// Polling task.
    poll_task: RefCell<Option<TaskHandle>>,
}

impl PacketLossSampler {
    /// Creates new [`PacketLossSampler`] without attached transport.
    pub fn new(conf: &conf::Detector) -> Self {
        Self {
            threshold: conf.packet_loss_threshold,
            poll_interval: conf.poll_interval,
            probe_mid: Rc::from(&*conf.probe_mid),
            sample: Rc::default(),
            attached: Rc::default(),
            closed: Rc::default(),
            poll_task: RefCell::default(),
        }
    }

    /// Starts polling stats of the provided [`RecvTransport`].
    ///
    /// Does nothing if some transport is attached already. Polling stops
    /// once the transport is closed, after which another transport may be
    /// attached.
    pub fn attach(&self, transport: Rc<dyn RecvTransport>) {
        debug!("PacketLossSampler: attach [id: {}]", transport.id());
        if self.closed.get() {
            debug!("PacketLossSampler: refusing to attach, sampler is closed");
            return;
        }
        if self.attached.get() {
            debug!("PacketLossSampler: transport is attached already");
            return;
        }
        self.attached.set(true);

        let on_close = transport.on_close();
        let poll = Self::poll(
            transport,
            self.poll_interval,
            self.threshold,
            Rc::clone(&self.probe_mid),
            Rc::clone(&self.sample),
            Rc::clone(&self.closed),
        );
        let attached = Rc::clone(&self.attached);
        let task = TaskHandle::spawn(async move {
            future::select(Box::pin(poll), on_close).await;
            attached.set(false);
            debug!("PacketLossSampler: stopped polling");
        });
        drop(self.poll_task.borrow_mut().replace(task));
    }

    /// Polls stats of the provided [`RecvTransport`] until it's closed.
    async fn poll(
        transport: Rc<dyn RecvTransport>,
        interval: Duration,
        threshold: f64,
        probe_mid: Rc<str>,
        sample: Rc<RefCell<Sample>>,
        closed: Rc<Cell<bool>>,
    ) {
        loop {
            platform::delay_for(interval).await;
            if closed.get() {
                break;
            }
            if transport.is_closed() {
                debug!(
                    "PacketLossSampler: transport [id: {}] is closed",
                    transport.id(),
                );
                break;
            }

            let stats = transport.get_stats().await;
            if closed.get() {
                break;
            }
            match stats {
                Ok(stats) => {
                    if let Some(counts) =
                        PacketCounts::from_stats(&stats, &probe_mid)
                    {
                        sample.borrow_mut().update(counts, threshold);
                    }
                }
                Err(e) => {
                    error!("PacketLossSampler: failed to get stats: {}", e);
                }
            }
        }
    }

    /// Returns current [`PacketLossStreaks`].
    pub fn streaks(&self) -> PacketLossStreaks {
        self.sample.borrow().streaks
    }

    /// Returns packet loss ratio calculated on the last successful poll.
    pub fn last_packet_loss(&self) -> f64 {
        self.sample.borrow().packet_loss
    }

    /// Indicates whether some transport is being polled.
    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    /// Stops polling. No transport can be attached afterwards.
    pub fn close(&self) {
        self.closed.set(true);
        drop(self.poll_task.borrow_mut().take());
        self.attached.set(false);
    }
}

impl Sample {
    /// Accounts new [`PacketCounts`].
    fn update(&mut self, counts: PacketCounts, threshold: f64) {
        let loss = packet_loss(self.prev, counts);
        self.prev = counts;
        self.packet_loss = loss;
        self.streaks.record(loss > threshold);
        debug!(
            "PacketLossSampler: [packet_loss: {:.3}, streaks: {:?}]",
            loss, self.streaks,
        );
    }
}
