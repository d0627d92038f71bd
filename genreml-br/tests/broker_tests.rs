//! Behavioural tests for the broker core
//!
//! Exercises the dispatcher, collector, poller, producer and reaper together
//! through a `Broker`, with waits scaled down from production values.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use genreml_br::config::BrokerSettings;
use genreml_br::poller::{NotReadyReason, PollOutcome};
use genreml_br::Broker;
use genreml_common::api::{ClipPayload, ClipSubmission, FinishedWork};
use genreml_common::{Signer, WorkTier};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Fixture {
    _dir: tempfile::TempDir,
    broker: Arc<Broker>,
    workers: Signer,
}

async fn fixture(batch_ttl: Duration) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = BrokerSettings::with_store_root(dir.path());
    settings.batch_ttl = batch_ttl;
    let workers = Signer::new("worker-secret");
    let broker = Broker::new(settings, workers.clone(), Signer::new("session-secret"));
    broker.init().await.unwrap();
    Fixture {
        _dir: dir,
        broker: Arc::new(broker),
        workers,
    }
}

fn clips(count: usize) -> ClipSubmission {
    ClipSubmission {
        filename: "song.mp3".to_string(),
        source_md5: None,
        clips: (0..count)
            .map(|i| ClipPayload {
                ext: "wav".to_string(),
                data: STANDARD.encode(format!("clip-{}", i)),
            })
            .collect(),
    }
}

async fn report(fx: &Fixture, tier: WorkTier, batch_id: &str, uid: &str) {
    let finished = FinishedWork::new(batch_id, uid).with_field("predictions", json!({"Rock": 1.0}));
    let sealed = fx.workers.seal(&finished).unwrap();
    fx.broker.collector().submit(tier, &sealed).await.unwrap();
}

#[tokio::test]
async fn test_dispatch_order_matches_submission_order() {
    let fx = fixture(Duration::from_secs(600)).await;
    let submitted = fx.broker.producer().submit("b1", clips(5)).await.unwrap();

    let token = fx.workers.sign("w1");
    let mut dispatched = Vec::new();
    for _ in 0..5 {
        let item = fx
            .broker
            .dispatcher()
            .poll(WorkTier::Prediction, &token, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        dispatched.push(item.uid);
    }
    assert_eq!(dispatched, submitted.uids);
}

#[tokio::test]
async fn test_every_result_handed_out_exactly_once() {
    let fx = fixture(Duration::from_secs(600)).await;
    let submitted = fx.broker.producer().submit("b1", clips(4)).await.unwrap();

    for uid in &submitted.uids {
        report(&fx, WorkTier::Prediction, "b1", uid).await;
    }

    let poller = fx.broker.poller();
    for uid in &submitted.uids {
        let first = poller
            .await_result("b1", WorkTier::Prediction, uid, Duration::from_millis(100))
            .await;
        assert!(matches!(first, PollOutcome::Ready(_)));

        let second = poller
            .await_result("b1", WorkTier::Prediction, uid, Duration::from_millis(50))
            .await;
        assert_eq!(second, PollOutcome::NotReady(NotReadyReason::UidNotFound));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_polls_deliver_each_item_once() {
    let fx = fixture(Duration::from_secs(600)).await;
    let submitted = fx.broker.producer().submit("b1", clips(3)).await.unwrap();

    let pollers: Vec<_> = (0..6)
        .map(|i| {
            let broker = Arc::clone(&fx.broker);
            let token = fx.workers.sign(&format!("w{}", i));
            tokio::spawn(async move {
                broker
                    .dispatcher()
                    .poll(WorkTier::Prediction, &token, Duration::from_millis(500))
                    .await
            })
        })
        .collect();

    let mut delivered = Vec::new();
    for poller in pollers {
        if let Some(item) = poller.await.unwrap().unwrap() {
            delivered.push(item.uid);
        }
    }

    let unique: HashSet<_> = delivered.iter().cloned().collect();
    assert_eq!(delivered.len(), 3, "no item lost");
    assert_eq!(unique, submitted.uids.iter().cloned().collect::<HashSet<_>>(), "no duplicate");
}

#[tokio::test]
async fn test_liveness_released_on_every_exit_path() {
    let fx = fixture(Duration::from_secs(600)).await;
    fx.broker.producer().submit("b1", clips(1)).await.unwrap();
    let dispatcher = fx.broker.dispatcher();
    let liveness = fx.broker.liveness();
    let wait = Duration::from_millis(100);

    // With work
    let token = fx.workers.sign("w1");
    assert!(dispatcher.poll(WorkTier::Prediction, &token, wait).await.unwrap().is_some());
    assert!(!liveness.is_registered(WorkTier::Prediction, "w1"));

    // Timed out
    assert!(dispatcher.poll(WorkTier::Prediction, &token, wait).await.unwrap().is_none());
    assert!(!liveness.is_registered(WorkTier::Prediction, "w1"));

    // Errored
    assert!(dispatcher.poll(WorkTier::Clip, &token, wait).await.is_err());
    assert!(!liveness.is_registered(WorkTier::Clip, "w1"));

    assert_eq!(liveness.connections(WorkTier::Prediction), 0);
}

#[tokio::test]
async fn test_untouched_batch_reaped_after_ttl() {
    let fx = fixture(Duration::from_millis(300)).await;
    fx.broker.producer().submit("b1", clips(2)).await.unwrap();
    assert!(fx.broker.registry().contains("b1"));

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(!fx.broker.registry().contains("b1"));
    assert_eq!(
        fx.broker
            .poller()
            .await_result("b1", WorkTier::Prediction, "any", Duration::from_millis(10))
            .await,
        PollOutcome::NotReady(NotReadyReason::BatchNotFound)
    );
}

#[tokio::test]
async fn test_unknown_result_is_silently_acknowledged() {
    let fx = fixture(Duration::from_secs(600)).await;
    let submitted = fx.broker.producer().submit("b1", clips(1)).await.unwrap();

    let sealed = fx.workers.seal(&FinishedWork::new("b1", "not-a-uid")).unwrap();
    let outcome = fx.broker.collector().submit(WorkTier::Prediction, &sealed).await.unwrap();
    assert_eq!(outcome, genreml_br::collector::SubmitOutcome::Unknown);

    let pending = fx
        .broker
        .registry()
        .with_batch("b1", |b| b.predictions[&submitted.uids[0]].result.is_none())
        .unwrap();
    assert!(pending);
}

#[tokio::test]
async fn test_partial_batch_two_of_three_reported() {
    let fx = fixture(Duration::from_secs(600)).await;
    let submitted = fx.broker.producer().submit("b1", clips(3)).await.unwrap();
    let token = fx.workers.sign("w1");

    for _ in 0..3 {
        fx.broker
            .dispatcher()
            .poll(WorkTier::Prediction, &token, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
    }
    report(&fx, WorkTier::Prediction, "b1", &submitted.uids[0]).await;
    report(&fx, WorkTier::Prediction, "b1", &submitted.uids[1]).await;

    let poller = fx.broker.poller();
    for uid in &submitted.uids[..2] {
        let outcome = poller
            .await_result("b1", WorkTier::Prediction, uid, Duration::from_millis(100))
            .await;
        assert!(matches!(outcome, PollOutcome::Ready(_)));
    }

    let start = Instant::now();
    let outcome = poller
        .await_result("b1", WorkTier::Prediction, &submitted.uids[2], Duration::from_millis(300))
        .await;
    assert_eq!(outcome, PollOutcome::NotReady(NotReadyReason::Pending));
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_item_goes_to_one_of_two_waiting_workers() {
    let fx = fixture(Duration::from_secs(600)).await;

    let waiters: Vec<_> = ["w1", "w2"]
        .iter()
        .map(|id| {
            let broker = Arc::clone(&fx.broker);
            let token = fx.workers.sign(id);
            tokio::spawn(async move {
                broker
                    .dispatcher()
                    .poll(WorkTier::Prediction, &token, Duration::from_millis(800))
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fx.broker.liveness().connections(WorkTier::Prediction), 2);
    let submitted = fx.broker.producer().submit("b1", clips(1)).await.unwrap();

    let mut results = Vec::new();
    for waiter in waiters {
        results.push(waiter.await.unwrap().unwrap());
    }

    let delivered: Vec<_> = results.into_iter().flatten().collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].uid, submitted.uids[0]);
}

#[tokio::test]
async fn test_safe_to_recycle_reflects_sibling_pollers() {
    let fx = fixture(Duration::from_secs(600)).await;
    let broker = Arc::clone(&fx.broker);
    let sibling = fx.workers.sign("sibling");

    let waiting = tokio::spawn(async move {
        broker
            .dispatcher()
            .poll(WorkTier::Spectrogram, &sibling, Duration::from_millis(500))
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let me = fx.workers.sign("me");
    assert!(fx.broker.safe_to_recycle(WorkTier::Spectrogram, &me).unwrap());

    waiting.await.unwrap().unwrap();
    assert!(!fx.broker.safe_to_recycle(WorkTier::Spectrogram, &me).unwrap());
}
