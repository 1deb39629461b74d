//! [`RtpThrottleManager`] throttling fake media in paused time.

use std::{rc::Rc, time::Duration};

use futures::{FutureExt as _, StreamExt as _};
use medea_meeting_experience::{
    conf,
    media::{InboundConsumer, MediaKind, RecvTransport, RtpSender},
    Conf, MeetingExperience, RtcManagerEvent, RtpThrottleManager,
};
use serde_json::json;
use tokio::{
    task::LocalSet,
    time::{self, Instant},
};

use crate::{
    detector_conf,
    fakes::{FakeConsumer, FakeSender, FakeTransport},
    if_let_next,
};

fn conf() -> Conf {
    Conf {
        detector: detector_conf(),
        ..Conf::default()
    }
}

fn producer_score(id: &str, kind: &str, score: f64) -> String {
    json!({
        "method": "producerScore",
        "data": {"producerId": id, "kind": kind, "score": [{"score": score}]},
    })
    .to_string()
}

fn consumer_message(method: &str, consumer_id: &str) -> String {
    json!({"method": method, "data": {"consumerId": consumer_id}}).to_string()
}

#[tokio::test(start_paused = true)]
async fn throttles_and_restores_media() {
    LocalSet::new()
        .run_until(async {
            let start = Instant::now();
            let manager = RtpThrottleManager::new(&conf());
            let mut events = manager.subscribe();

            let transport = Rc::new(FakeTransport::new());
            transport.set_lossy(true);
            manager.attach_recv_transport(
                Rc::clone(&transport) as Rc<dyn RecvTransport>
            );
            let mic = Rc::new(FakeSender::new("mic", MediaKind::Audio));
            let webcam = Rc::new(FakeSender::new("webcam", MediaKind::Video));
            manager.set_sender(Rc::clone(&mic) as Rc<dyn RtpSender>);
            manager.set_sender(Rc::clone(&webcam) as Rc<dyn RtpSender>);
            let video = Rc::new(FakeConsumer::new("video", MediaKind::Video));
            let audio = Rc::new(FakeConsumer::new("audio", MediaKind::Audio));
            manager.add_consumer(
                Rc::clone(&video) as Rc<dyn InboundConsumer>,
                true,
            );
            manager.add_consumer(
                Rc::clone(&audio) as Rc<dyn InboundConsumer>,
                true,
            );

            manager.on_sfu_message(&producer_score("webcam", "video", 4.0));
            assert_eq!(
                events.next().await,
                Some(RtcManagerEvent::LocalRtpConnectionQuality {
                    quality: 4.0,
                }),
            );

            if_let_next! {
                RtcManagerEvent::RtpThrottled { rtp_throttled } = events {
                    assert!(rtp_throttled);
                }
            }
            assert!(Instant::now() - start < Duration::from_secs(5));
            assert!(manager.is_rtp_throttled());
            assert_eq!(
                manager.meeting_experience(),
                Some(MeetingExperience::Bad),
            );
            assert!(video.is_paused());
            assert!(!audio.is_paused());
            assert_eq!(webcam.applied_limits(), vec![(Some(120_000), Some(5))]);
            assert_eq!(mic.applied_limits(), vec![(Some(12_000), None)]);

            transport.set_lossy(false);
            manager.on_sfu_message(&producer_score("webcam", "video", 10.0));
            if_let_next! {
                RtcManagerEvent::RtpThrottled { rtp_throttled } = events {
                    assert!(!rtp_throttled);
                }
            }
            assert!(!manager.is_rtp_throttled());
            assert!(!video.is_paused());
            assert_eq!(video.pauses(), 1);
            assert_eq!(
                webcam.applied_limits(),
                vec![(Some(120_000), Some(5)), (Some(3_000_000), Some(60))],
            );
            assert_eq!(
                mic.applied_limits(),
                vec![(Some(12_000), None), (Some(100_000), None)],
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn keeps_consumers_paused_for_other_reasons() {
    LocalSet::new()
        .run_until(async {
            let manager = RtpThrottleManager::new(&conf());
            let mut events = manager.subscribe();
            let transport = Rc::new(FakeTransport::new());
            transport.set_lossy(true);
            manager.attach_recv_transport(
                Rc::clone(&transport) as Rc<dyn RecvTransport>
            );

            let remote = Rc::new(FakeConsumer::new("remote", MediaKind::Video));
            let local = Rc::new(FakeConsumer::new("local", MediaKind::Video));
            manager.add_consumer(
                Rc::clone(&remote) as Rc<dyn InboundConsumer>,
                true,
            );
            manager.add_consumer(
                Rc::clone(&local) as Rc<dyn InboundConsumer>,
                false,
            );
            manager
                .on_sfu_message(&consumer_message("consumerPaused", "remote"));
            manager.on_sfu_message(&producer_score("webcam", "video", 2.0));

            if_let_next! {
                RtcManagerEvent::RtpThrottled { rtp_throttled: true } =
                    events {}
            }
            transport.set_lossy(false);
            manager.on_sfu_message(&producer_score("webcam", "video", 10.0));
            if_let_next! {
                RtcManagerEvent::RtpThrottled { rtp_throttled: false } =
                    events {}
            }

            assert!(remote.is_paused());
            assert!(local.is_paused());

            manager.set_consumer_accepted(&"local".into(), true);
            manager
                .on_sfu_message(&consumer_message("consumerResumed", "remote"));
            assert!(!remote.is_paused());
            assert!(!local.is_paused());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn disabled_throttling_does_nothing() {
    LocalSet::new()
        .run_until(async {
            let manager = RtpThrottleManager::new(&Conf {
                throttle: conf::Throttle {
                    enabled: false,
                    ..conf::Throttle::default()
                },
                ..conf()
            });
            let mut events = manager.subscribe();
            let transport = Rc::new(FakeTransport::new());
            transport.set_lossy(true);
            manager.attach_recv_transport(
                Rc::clone(&transport) as Rc<dyn RecvTransport>
            );
            manager.on_sfu_message(&producer_score("webcam", "video", 1.0));

            time::sleep(Duration::from_secs(20)).await;

            assert_eq!(transport.fetches(), 0);
            assert!(!manager.is_rtp_throttled());
            assert_eq!(
                events.next().now_or_never(),
                Some(Some(RtcManagerEvent::LocalRtpConnectionQuality {
                    quality: 1.0,
                })),
            );
            assert!(events.next().now_or_never().is_none());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn close_stops_everything() {
    LocalSet::new()
        .run_until(async {
            let manager = RtpThrottleManager::new(&conf());
            let mut events = manager.subscribe();
            let transport = Rc::new(FakeTransport::new());
            manager.attach_recv_transport(
                Rc::clone(&transport) as Rc<dyn RecvTransport>
            );

            time::sleep(Duration::from_millis(2500)).await;
            manager.close();
            manager.close();
            time::sleep(Duration::from_secs(10)).await;

            assert_eq!(transport.fetches(), 2);
            assert_eq!(events.next().await, None);
        })
        .await;
}
