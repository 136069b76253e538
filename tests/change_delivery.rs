//! Change tracker delivery guarantees over the in-memory change log:
//! ordering, start-id seeding, push coalescing, and the polling fallback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use telaio::application::repos::{ChangeLogRepo, ChangeSignal};
use telaio::cache::ChangeTracker;
use telaio::config::TrackerSettings;
use telaio::domain::changes::NewChange;
use telaio::domain::types::{ChangeKind, Collection, RecordId};
use telaio::infra::memory::{MemoryChangeLog, MemoryChangeSignal};
use tokio::time::{Instant, sleep};

fn fast_settings() -> TrackerSettings {
    TrackerSettings {
        use_push_notifications: true,
        trigger_delay: Duration::from_millis(10),
        queue_interval: Duration::from_millis(10),
        poll_interval: Duration::from_millis(20),
    }
}

fn collector() -> (Arc<Mutex<Vec<RecordId>>>, Arc<Mutex<Vec<RecordId>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    (Arc::clone(&seen), seen)
}

async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn append(log: &MemoryChangeLog, entity_id: i64) -> RecordId {
    log.append(NewChange::new(entity_id, Collection::Node, ChangeKind::Updated))
        .await
        .expect("appends")
}

#[tokio::test]
async fn push_delivery_is_ordered_and_complete() {
    let log = Arc::new(MemoryChangeLog::new());
    let signal: Arc<dyn ChangeSignal> = Arc::new(log.signal());
    let tracker = ChangeTracker::new(
        Arc::clone(&log) as Arc<dyn ChangeLogRepo>,
        Some(signal),
        fast_settings(),
    );

    let (seen, sink) = collector();
    tracker
        .subscribe(move |record| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(record.id);
                Ok(())
            })
        })
        .await;

    let mut appended = Vec::new();
    for entity_id in 1..=10 {
        appended.push(append(&log, entity_id).await);
    }

    assert!(eventually(|| seen.lock().unwrap().len() >= appended.len()).await);
    let delivered = seen.lock().unwrap().clone();
    assert_eq!(delivered, appended);
    assert!(delivered.windows(2).all(|pair| pair[0] < pair[1]));

    tracker.stop();
}

#[tokio::test]
async fn records_before_startup_are_never_delivered() {
    let log = Arc::new(MemoryChangeLog::new());
    append(&log, 1).await;
    append(&log, 2).await;

    let signal: Arc<dyn ChangeSignal> = Arc::new(log.signal());
    let tracker = ChangeTracker::new(
        Arc::clone(&log) as Arc<dyn ChangeLogRepo>,
        Some(signal),
        fast_settings(),
    );

    let (seen, sink) = collector();
    tracker
        .subscribe(move |record| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(record.id);
                Ok(())
            })
        })
        .await;

    let fresh = append(&log, 3).await;
    assert!(eventually(|| !seen.lock().unwrap().is_empty()).await);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(seen.lock().unwrap().clone(), vec![fresh]);
    tracker.stop();
}

#[tokio::test]
async fn unavailable_push_channel_falls_back_to_polling() {
    let log = Arc::new(MemoryChangeLog::new());
    let signal: Arc<dyn ChangeSignal> = Arc::new(MemoryChangeSignal::unavailable());
    let tracker = ChangeTracker::new(
        Arc::clone(&log) as Arc<dyn ChangeLogRepo>,
        Some(signal),
        fast_settings(),
    );

    let (seen, sink) = collector();
    tracker
        .subscribe(move |record| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(record.id);
                Ok(())
            })
        })
        .await;

    let appended = append(&log, 1).await;
    assert!(eventually(|| seen.lock().unwrap().contains(&appended)).await);

    tracker.stop();
}

#[tokio::test]
async fn failing_subscriber_does_not_disturb_others() {
    let log = Arc::new(MemoryChangeLog::new());
    let tracker = ChangeTracker::new(
        Arc::clone(&log) as Arc<dyn ChangeLogRepo>,
        None,
        fast_settings(),
    );

    tracker
        .subscribe(|_record| {
            Box::pin(async { Err("subscriber intentionally broken".into()) })
        })
        .await;

    let (seen, sink) = collector();
    tracker
        .subscribe(move |record| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(record.id);
                Ok(())
            })
        })
        .await;

    let first = append(&log, 1).await;
    let second = append(&log, 2).await;

    assert!(eventually(|| seen.lock().unwrap().len() >= 2).await);
    assert_eq!(seen.lock().unwrap().clone(), vec![first, second]);

    tracker.stop();
}

#[tokio::test]
async fn unsubscribing_stops_delivery_to_that_consumer_only() {
    let log = Arc::new(MemoryChangeLog::new());
    let tracker = ChangeTracker::new(
        Arc::clone(&log) as Arc<dyn ChangeLogRepo>,
        None,
        fast_settings(),
    );

    let (first_seen, first_sink) = collector();
    let first_id = tracker
        .subscribe(move |record| {
            let sink = Arc::clone(&first_sink);
            Box::pin(async move {
                sink.lock().unwrap().push(record.id);
                Ok(())
            })
        })
        .await;

    let (second_seen, second_sink) = collector();
    tracker
        .subscribe(move |record| {
            let sink = Arc::clone(&second_sink);
            Box::pin(async move {
                sink.lock().unwrap().push(record.id);
                Ok(())
            })
        })
        .await;

    append(&log, 1).await;
    assert!(eventually(|| first_seen.lock().unwrap().len() == 1).await);

    tracker.unsubscribe(first_id);
    append(&log, 2).await;

    assert!(eventually(|| second_seen.lock().unwrap().len() == 2).await);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(first_seen.lock().unwrap().len(), 1);

    tracker.stop();
}

#[tokio::test]
async fn records_queue_until_a_subscriber_exists() {
    let log = Arc::new(MemoryChangeLog::new());
    let tracker = ChangeTracker::new(
        Arc::clone(&log) as Arc<dyn ChangeLogRepo>,
        None,
        fast_settings(),
    );

    // Initialization requires a first subscriber; register one and drop it
    // again so the loops run with nobody listening.
    let probe = tracker.subscribe(|_record| Box::pin(async { Ok(()) })).await;
    tracker.unsubscribe(probe);

    let first = append(&log, 1).await;
    let second = append(&log, 2).await;
    assert!(eventually(|| tracker.pending_len() == 2).await);

    let (seen, sink) = collector();
    tracker
        .subscribe(move |record| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(record.id);
                Ok(())
            })
        })
        .await;

    assert!(eventually(|| seen.lock().unwrap().len() == 2).await);
    assert_eq!(seen.lock().unwrap().clone(), vec![first, second]);

    tracker.stop();
}

#[tokio::test]
async fn stop_halts_delivery() {
    let log = Arc::new(MemoryChangeLog::new());
    let tracker = ChangeTracker::new(
        Arc::clone(&log) as Arc<dyn ChangeLogRepo>,
        None,
        fast_settings(),
    );

    let (seen, sink) = collector();
    tracker
        .subscribe(move |record| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(record.id);
                Ok(())
            })
        })
        .await;

    tracker.stop();
    sleep(Duration::from_millis(50)).await;

    append(&log, 1).await;
    sleep(Duration::from_millis(150)).await;
    assert!(seen.lock().unwrap().is_empty());
}
