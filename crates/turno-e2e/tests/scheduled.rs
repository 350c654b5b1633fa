mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use turno_core::Msg;

/// A delayed message never runs before its time, and runs shortly after it
/// once the poller has had a tick.
#[tokio::test]
async fn delayed_message_is_invisible_until_due() {
    let (mut manager, store) = helpers::memory_manager();
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        manager.add_worker("default", 1, move |_msg: Msg| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }

    let producer = manager.producer();
    let before = helpers::epoch_seconds();
    producer
        .enqueue_in("default", "Later", Vec::<Value>::new(), 0.4)
        .await
        .unwrap();

    // Routed to the scheduled set, not a live queue.
    let entries = store.scheduled_entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].0 >= before + 0.4);
    assert!(store.queue_entries("default").is_empty());

    let running = helpers::start(manager);

    // Not observable before the delay has elapsed.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    // Observable within the delay plus a few poller ticks.
    let seen_by_poller = seen.clone();
    assert!(
        helpers::wait_until(Duration::from_secs(3), || {
            seen_by_poller.load(Ordering::SeqCst) == 1
        })
        .await,
        "scheduled message was never promoted and processed"
    );
    assert!(store.scheduled_entries().is_empty());

    running.stop().await;
}

/// Promotion refreshes `enqueued_at` to the promotion time.
#[tokio::test]
async fn promotion_refreshes_enqueued_at() {
    let (mut manager, _store) = helpers::memory_manager();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    manager.add_worker("default", 1, move |msg: Msg| {
        let tx = tx.clone();
        async move {
            tx.send(msg).expect("test receiver alive");
            Ok(())
        }
    });

    let producer = manager.producer();
    producer
        .enqueue_in("default", "Later", Vec::<Value>::new(), 0.1)
        .await
        .unwrap();
    let enqueue_time = helpers::epoch_seconds();

    let running = helpers::start(manager);
    let msg = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("message never arrived")
        .unwrap();

    let created = msg.get("created_at").unwrap().as_f64().unwrap();
    let enqueued = msg.get("enqueued_at").unwrap().as_f64().unwrap();
    assert!(created <= enqueue_time);
    assert!(enqueued > enqueue_time, "enqueued_at was not refreshed");

    running.stop().await;
}
