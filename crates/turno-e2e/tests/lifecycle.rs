mod helpers;

use std::time::Duration;

use serde_json::json;
use turno_core::Msg;

/// Enqueue → fetch → handle → ack: the handler sees the exact class and args
/// the producer wrote, the envelope round-trips, and `processed` counts it.
#[tokio::test]
async fn enqueue_process_round_trip() {
    let (mut manager, store) = helpers::memory_manager();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    manager.add_worker("default", 2, move |msg: Msg| {
        let tx = tx.clone();
        async move {
            tx.send(msg).expect("test receiver alive");
            Ok(())
        }
    });

    let producer = manager.producer();
    let running = helpers::start(manager);

    let jid = producer.enqueue("default", "Echo", ("hi", 7)).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("handler was not invoked")
        .expect("channel closed");
    assert_eq!(msg.jid(), jid);
    assert_eq!(msg.class(), "Echo");
    assert_eq!(msg.queue(), "default");
    assert_eq!(msg.args(), &[json!("hi"), json!(7)]);

    let created = msg.get("created_at").unwrap().as_f64().unwrap();
    let enqueued = msg.get("enqueued_at").unwrap().as_f64().unwrap();
    assert!(created <= enqueued);
    assert!(enqueued <= helpers::epoch_seconds());

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = running.manager.stats().await.unwrap();
        if snapshot.processed == 1 {
            assert_eq!(snapshot.processed_today, 1);
            assert_eq!(snapshot.failed, 0);
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "processed counter never incremented"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The ack lands right after the chain returns; give it a beat.
    let inflight_key = running.manager.inflight_key("default");
    let store_probe = store.clone();
    let key_probe = inflight_key.clone();
    assert!(
        helpers::wait_until(Duration::from_secs(1), || {
            store_probe.list_entries(&key_probe).is_empty()
        })
        .await,
        "payload was never acked out of the in-flight list"
    );
    assert!(store.queue_entries("default").is_empty());

    running.stop().await;
}

/// Several messages on one queue all arrive, in order, at a single-slot
/// worker.
#[tokio::test]
async fn single_slot_worker_preserves_queue_order() {
    let (mut manager, _store) = helpers::memory_manager();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    manager.add_worker("default", 1, move |msg: Msg| {
        let tx = tx.clone();
        async move {
            tx.send(msg.args()[0].clone()).expect("test receiver alive");
            Ok(())
        }
    });

    let producer = manager.producer();
    for i in 0..4 {
        producer.enqueue("default", "Seq", (i,)).await.unwrap();
    }
    let running = helpers::start(manager);

    let mut seen = Vec::new();
    for _ in 0..4 {
        let arg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("missing message")
            .unwrap();
        seen.push(arg.as_i64().unwrap());
    }
    assert_eq!(seen, vec![0, 1, 2, 3]);

    running.stop().await;
}
