mod helpers;

use std::time::Duration;

/// Two concurrent unique enqueues of the same `(queue, class, args)` produce
/// exactly one queued message; later calls within the TTL report
/// `enqueued = false`.
#[tokio::test]
async fn concurrent_unique_enqueues_collapse_to_one() {
    let (manager, store) = helpers::memory_manager();
    let producer = manager.producer();
    let ttl = Duration::from_secs(60);

    let (first, second) = tokio::join!(
        producer.enqueue_unique("default", "Mail", ("user-1",), ttl),
        producer.enqueue_unique("default", "Mail", ("user-1",), ttl),
    );
    let (jid_a, enqueued_a) = first.unwrap();
    let (jid_b, enqueued_b) = second.unwrap();

    assert!(enqueued_a ^ enqueued_b, "exactly one call must win");
    assert_ne!(jid_a, jid_b);
    assert_eq!(store.queue_entries("default").len(), 1);

    // Still guarded within the TTL window.
    let (_, third) = producer
        .enqueue_unique("default", "Mail", ("user-1",), ttl)
        .await
        .unwrap();
    assert!(!third);
    assert_eq!(store.queue_entries("default").len(), 1);

    // A different argument tuple is a different job.
    let (_, other) = producer
        .enqueue_unique("default", "Mail", ("user-2",), ttl)
        .await
        .unwrap();
    assert!(other);
    assert_eq!(store.queue_entries("default").len(), 2);
}

/// The guard outlives processing: uniqueness is an enqueue-time property of
/// the TTL window, not of queue occupancy.
#[tokio::test]
async fn guard_holds_after_the_job_is_processed() {
    let (mut manager, store) = helpers::memory_manager();
    manager.add_worker("default", 1, |_msg| async { Ok(()) });
    let producer = manager.producer();
    let ttl = Duration::from_secs(60);

    let (_, enqueued) = producer
        .enqueue_unique("default", "Once", (7,), ttl)
        .await
        .unwrap();
    assert!(enqueued);

    let running = helpers::start(manager);
    let store_probe = store.clone();
    assert!(
        helpers::wait_until(Duration::from_secs(2), || {
            store_probe.queue_entries("default").is_empty()
        })
        .await
    );

    let (_, again) = producer
        .enqueue_unique("default", "Once", (7,), ttl)
        .await
        .unwrap();
    assert!(!again, "guard must hold for the full TTL");

    running.stop().await;
}
