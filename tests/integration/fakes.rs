//! Hand-written media collaborators with controllable behaviour.

use std::{
    cell::{Cell, RefCell},
    time::Duration,
};

use futures::{
    channel::oneshot,
    future::{self, LocalBoxFuture},
    FutureExt as _,
};
use medea_meeting_experience::{
    media::{
        ConsumerId, InboundConsumer, MediaError, MediaKind, ProducerId,
        RecvTransport, RtpEncodingParameters, RtpSender,
    },
    stats::{RtcInboundRtpStreamStats, RtcStat, RtcStatsType, StatsError},
};
use tokio::time;
use tracerr::Traced;

/// Packets received by every stream between two fetches.
const RECEIVED_PER_FETCH: u64 = 100;

/// Packets lost by the video stream between two lossy fetches.
const LOST_PER_LOSSY_FETCH: i64 = 10;

/// [`RecvTransport`] reporting a growing number of received packets, and
/// losing 10% of them while it's lossy.
#[derive(Default)]
pub struct FakeTransport {
    lossy: Cell<bool>,
    failing: Cell<bool>,
    fetch_delay: Cell<Duration>,
    fetches: Cell<usize>,
    received: Cell<u64>,
    lost: Cell<i64>,
    closed: Cell<bool>,
    close_txs: RefCell<Vec<oneshot::Sender<()>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lossy(&self, lossy: bool) {
        self.lossy.set(lossy);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay.set(delay);
    }

    /// Number of [`RecvTransport::get_stats`] calls.
    pub fn fetches(&self) -> usize {
        self.fetches.get()
    }

    pub fn close(&self) {
        self.closed.set(true);
        for tx in self.close_txs.borrow_mut().drain(..) {
            let _ = tx.send(());
        }
    }

    fn next_stats(&self) -> Vec<RtcStat> {
        self.received.set(self.received.get() + RECEIVED_PER_FETCH);
        if self.lossy.get() {
            self.lost.set(self.lost.get() + LOST_PER_LOSSY_FETCH);
        }
        vec![
            inbound_rtp("0", self.received.get(), self.lost.get()),
            // Probation stream is always lossy and must be ignored.
            inbound_rtp("probator", self.received.get(), 1_000_000),
            serde_json::from_str(
                r#"{"id": "T01", "type": "transport", "timestamp": 1.0}"#,
            )
            .unwrap(),
        ]
    }
}

impl RecvTransport for FakeTransport {
    fn id(&self) -> String {
        "recv-transport".to_owned()
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn get_stats(
        &self,
    ) -> LocalBoxFuture<'static, Result<Vec<RtcStat>, Traced<StatsError>>>
    {
        self.fetches.set(self.fetches.get() + 1);
        if self.failing.get() {
            return Box::pin(future::err(tracerr::new!(StatsError::GetStats(
                "failing".to_owned()
            ))));
        }
        let stats = self.next_stats();
        let delay = self.fetch_delay.get();
        Box::pin(async move {
            if delay > Duration::default() {
                time::sleep(delay).await;
            }
            Ok(stats)
        })
    }

    fn on_close(&self) -> LocalBoxFuture<'static, ()> {
        if self.closed.get() {
            return Box::pin(future::ready(()));
        }
        let (tx, rx) = oneshot::channel();
        self.close_txs.borrow_mut().push(tx);
        Box::pin(rx.map(drop))
    }
}

fn inbound_rtp(mid: &str, received: u64, lost: i64) -> RtcStat {
    RtcStat {
        id: format!("IT-{}", mid).into(),
        timestamp: 0.0,
        stats: RtcStatsType::InboundRtp(Box::new(RtcInboundRtpStreamStats {
            mid: Some(mid.to_owned()),
            kind: Some("video".to_owned()),
            packets_received: received,
            packets_lost: Some(lost),
        })),
    }
}

/// [`RtpSender`] with a single encoding, recording all the applied
/// encodings.
pub struct FakeSender {
    producer_id: ProducerId,
    kind: MediaKind,
    encodings: RefCell<Vec<RtpEncodingParameters>>,
    applied: RefCell<Vec<Vec<RtpEncodingParameters>>>,
}

impl FakeSender {
    pub fn new(producer_id: &str, kind: MediaKind) -> Self {
        Self {
            producer_id: producer_id.into(),
            kind,
            encodings: RefCell::new(vec![RtpEncodingParameters::default()]),
            applied: RefCell::default(),
        }
    }

    /// Returns `(max_bitrate, max_framerate)` of all the applied encodings.
    pub fn applied_limits(&self) -> Vec<(Option<u32>, Option<u32>)> {
        self.applied
            .borrow()
            .iter()
            .flatten()
            .map(|enc| (enc.max_bitrate, enc.max_framerate))
            .collect()
    }
}

impl RtpSender for FakeSender {
    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn encodings(&self) -> Vec<RtpEncodingParameters> {
        self.encodings.borrow().clone()
    }

    fn set_encodings(
        &self,
        encodings: Vec<RtpEncodingParameters>,
    ) -> LocalBoxFuture<'static, Result<(), Traced<MediaError>>> {
        self.applied.borrow_mut().push(encodings.clone());
        self.encodings.replace(encodings);
        Box::pin(future::ok(()))
    }
}

/// [`InboundConsumer`] tracking whether it's paused.
pub struct FakeConsumer {
    id: ConsumerId,
    kind: MediaKind,
    paused: Cell<bool>,
    pauses: Cell<usize>,
}

impl FakeConsumer {
    pub fn new(id: &str, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            paused: Cell::new(false),
            pauses: Cell::new(0),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    /// Number of times this consumer was paused.
    pub fn pauses(&self) -> usize {
        self.pauses.get()
    }
}

impl InboundConsumer for FakeConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn pause(&self) {
        if !self.paused.replace(true) {
            self.pauses.set(self.pauses.get() + 1);
        }
    }

    fn resume(&self) {
        self.paused.set(false);
    }
}
