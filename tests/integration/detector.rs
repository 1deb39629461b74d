//! [`MeetingExperienceDetector`] driven by a fake transport in paused time.

use std::{rc::Rc, time::Duration};

use futures::{FutureExt as _, StreamExt as _};
use medea_meeting_experience::{
    experience::PacketLossStreaks,
    media::{MediaKind, ProducerId, RecvTransport},
    score::RawScore,
    MeetingExperience, MeetingExperienceDetector, MeetingExperienceEvent,
};
use serde_json::json;
use tokio::{
    task::LocalSet,
    time::{self, Instant},
};

use crate::{detector_conf, fakes::FakeTransport};

fn attach(detector: &MeetingExperienceDetector) -> Rc<FakeTransport> {
    let transport = Rc::new(FakeTransport::new());
    detector.attach_transport(Rc::clone(&transport) as Rc<dyn RecvTransport>);
    transport
}

fn set_video_score(detector: &MeetingExperienceDetector, score: f64) {
    detector.add_producer_score(
        ProducerId::from("webcam"),
        Some(MediaKind::Video),
        Some(&RawScore::from(score)),
    );
}

fn at(start: Instant, millis: u64) -> time::Sleep {
    time::sleep_until(start + Duration::from_millis(millis))
}

fn event(state: MeetingExperience) -> Option<Option<MeetingExperienceEvent>> {
    Some(Some(MeetingExperienceEvent { state }))
}

#[tokio::test(start_paused = true)]
async fn turns_bad_once_and_recovers() {
    LocalSet::new()
        .run_until(async {
            let start = Instant::now();
            let detector = MeetingExperienceDetector::new(detector_conf());
            let mut events = detector.subscribe();
            let transport = attach(&detector);
            transport.set_lossy(true);
            set_video_score(&detector, 5.0);

            at(start, 4500).await;
            assert_eq!(
                events.next().now_or_never(),
                event(MeetingExperience::Bad),
            );
            assert_eq!(detector.state(), MeetingExperience::Bad);

            at(start, 8500).await;
            assert!(events.next().now_or_never().is_none());

            transport.set_lossy(false);
            set_video_score(&detector, 10.0);

            at(start, 19000).await;
            assert!(events.next().now_or_never().is_none());

            at(start, 21000).await;
            assert_eq!(
                events.next().now_or_never(),
                event(MeetingExperience::Good),
            );
            assert!(events.next().now_or_never().is_none());
            assert_eq!(detector.state(), MeetingExperience::Good);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn long_score_dip_turns_bad_then_good() {
    LocalSet::new()
        .run_until(async {
            let start = Instant::now();
            let detector = MeetingExperienceDetector::new(detector_conf());
            let mut events = detector.subscribe();
            let transport = attach(&detector);
            transport.set_lossy(true);
            set_video_score(&detector, 10.0);

            at(start, 1950).await;
            set_video_score(&detector, 5.0);
            at(start, 4050).await;
            set_video_score(&detector, 10.0);
            transport.set_lossy(false);

            assert_eq!(
                events.next().now_or_never(),
                event(MeetingExperience::Bad),
            );

            at(start, 17000).await;
            assert_eq!(
                events.next().now_or_never(),
                event(MeetingExperience::Good),
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn short_score_dip_is_ignored() {
    LocalSet::new()
        .run_until(async {
            let start = Instant::now();
            let detector = MeetingExperienceDetector::new(detector_conf());
            let mut events = detector.subscribe();
            let transport = attach(&detector);
            transport.set_lossy(true);
            set_video_score(&detector, 10.0);

            at(start, 1950).await;
            set_video_score(&detector, 5.0);
            at(start, 2950).await;
            set_video_score(&detector, 10.0);

            at(start, 12000).await;
            assert!(events.next().now_or_never().is_none());
            assert_eq!(detector.state(), MeetingExperience::Good);
            assert!(detector.packet_loss_streaks().lossy > 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn packet_loss_alone_is_not_bad() {
    LocalSet::new()
        .run_until(async {
            let start = Instant::now();
            let detector = MeetingExperienceDetector::new(detector_conf());
            let mut events = detector.subscribe();
            let transport = attach(&detector);
            transport.set_lossy(true);

            at(start, 10500).await;
            assert!(events.next().now_or_never().is_none());

            detector.add_consumer_score(
                "consumer".into(),
                Some(MediaKind::Video),
                Some(&RawScore::from(json!({"producerScores": [1]}))),
            );
            at(start, 20500).await;
            assert!(events.next().now_or_never().is_none());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn audio_producer_is_enough_to_recover() {
    LocalSet::new()
        .run_until(async {
            let start = Instant::now();
            let detector = MeetingExperienceDetector::new(detector_conf());
            let mut events = detector.subscribe();
            let transport = attach(&detector);
            transport.set_lossy(true);
            set_video_score(&detector, 3.0);
            detector.add_producer_score(
                "mic".into(),
                Some(MediaKind::Audio),
                Some(&RawScore::from(json!([{"score": 2}, {"score": 4}]))),
            );

            at(start, 4500).await;
            assert_eq!(
                events.next().now_or_never(),
                event(MeetingExperience::Bad),
            );

            transport.set_lossy(false);
            detector.add_producer_score(
                "mic".into(),
                Some(MediaKind::Audio),
                Some(&RawScore::from(10.0)),
            );
            at(start, 17000).await;
            assert_eq!(
                events.next().now_or_never(),
                event(MeetingExperience::Good),
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn polls_single_transport() {
    LocalSet::new()
        .run_until(async {
            let start = Instant::now();
            let detector = MeetingExperienceDetector::new(detector_conf());
            let transport = attach(&detector);
            let another = attach(&detector);
            detector.attach_transport(
                Rc::clone(&transport) as Rc<dyn RecvTransport>
            );

            at(start, 5500).await;
            assert_eq!(transport.fetches(), 5);
            assert_eq!(another.fetches(), 0);
            assert_eq!(
                detector.packet_loss_streaks(),
                PacketLossStreaks {
                    lossy: 0,
                    lossless: 5,
                },
            );

            transport.close();
            at(start, 10000).await;
            assert_eq!(transport.fetches(), 5);

            let next = attach(&detector);
            at(start, 13500).await;
            assert_eq!(next.fetches(), 3);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_keeps_streaks() {
    LocalSet::new()
        .run_until(async {
            let start = Instant::now();
            let detector = MeetingExperienceDetector::new(detector_conf());
            let transport = attach(&detector);
            transport.set_lossy(true);

            at(start, 2500).await;
            transport.set_failing(true);
            at(start, 5500).await;
            assert_eq!(transport.fetches(), 5);
            assert_eq!(detector.packet_loss_streaks().lossy, 2);

            transport.set_failing(false);
            at(start, 6500).await;
            assert_eq!(detector.packet_loss_streaks().lossy, 3);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn close_discards_in_flight_fetch() {
    LocalSet::new()
        .run_until(async {
            let start = Instant::now();
            let detector = MeetingExperienceDetector::new(detector_conf());
            let mut events = detector.subscribe();
            let transport = attach(&detector);
            transport.set_lossy(true);
            transport.set_fetch_delay(Duration::from_millis(500));

            at(start, 1200).await;
            assert_eq!(transport.fetches(), 1);
            detector.close();
            detector.close();

            at(start, 10000).await;
            assert_eq!(transport.fetches(), 1);
            assert_eq!(
                detector.packet_loss_streaks(),
                PacketLossStreaks::default(),
            );
            assert_eq!(events.next().await, None);
        })
        .await;
}
