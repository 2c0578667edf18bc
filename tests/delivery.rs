//! End-to-end delivery scenarios against a real Redis instance.
//!
//! Requires `REDIS_URL` (defaults to `redis://127.0.0.1:6379`) pointing
//! at a reachable server; none of these tests run in CI by default.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use eventbus::{EmitOptions, EventBus, EventBusConfig};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Payload {
    n: u32,
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn unique_bus_name() -> String {
    format!("test-{}", Uuid::new_v4().simple())
}

async fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
#[ignore] // Requires Redis
async fn broadcast_fans_out_to_every_subscribed_instance() {
    let bus_name = unique_bus_name();
    let counters: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let mut instances = Vec::new();

    for counter in &counters {
        let bus = Arc::new(
            EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
                .await
                .unwrap(),
        );
        bus.init().await.unwrap();
        let counter = Arc::clone(counter);
        bus.on("ping", move |_env| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        instances.push(bus);
    }

    instances[0]
        .emit("ping", Payload { n: 1 }, EmitOptions::broadcast())
        .await
        .unwrap();

    wait_for(
        || counters.iter().all(|c| c.load(Ordering::SeqCst) == 1),
        Duration::from_secs(5),
    )
    .await;

    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    for instance in instances {
        instance.close().await;
    }
}

#[tokio::test]
#[ignore] // Requires Redis
async fn anycast_delivers_each_record_to_exactly_one_instance() {
    let bus_name = unique_bus_name();
    let total_delivered = Arc::new(AtomicUsize::new(0));
    let mut instances = Vec::new();

    for _ in 0..3 {
        let bus = Arc::new(
            EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
                .await
                .unwrap(),
        );
        bus.init().await.unwrap();
        let counter = Arc::clone(&total_delivered);
        bus.on("job", move |_env| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        instances.push(bus);
    }

    for n in 0..30 {
        instances[0]
            .emit("job", Payload { n }, EmitOptions::anycast())
            .await
            .unwrap();
    }

    wait_for(
        || total_delivered.load(Ordering::SeqCst) == 30,
        Duration::from_secs(10),
    )
    .await;

    assert_eq!(total_delivered.load(Ordering::SeqCst), 30);

    for instance in instances {
        instance.close().await;
    }
}

#[tokio::test]
#[ignore] // Requires Redis
async fn anycast_failover_second_batch_lands_entirely_on_the_surviving_instance() {
    let bus_name = unique_bus_name();
    let total_delivered = Arc::new(AtomicUsize::new(0));
    let i2_second_batch = Arc::new(AtomicUsize::new(0));

    let i1 = Arc::new(
        EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
            .await
            .unwrap(),
    );
    i1.init().await.unwrap();
    {
        let total = Arc::clone(&total_delivered);
        i1.on("job", move |_env| {
            let total = Arc::clone(&total);
            async move {
                total.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    }

    let i2 = Arc::new(
        EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
            .await
            .unwrap(),
    );
    i2.init().await.unwrap();
    {
        let total = Arc::clone(&total_delivered);
        let second_batch = Arc::clone(&i2_second_batch);
        i2.on("job", move |env| {
            let total = Arc::clone(&total);
            let second_batch = Arc::clone(&second_batch);
            async move {
                total.fetch_add(1, Ordering::SeqCst);
                if env.data.n >= 10 {
                    second_batch.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .unwrap();
    }

    for n in 0..10 {
        i1.emit("job", Payload { n }, EmitOptions::anycast())
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    i1.close().await;

    for n in 10..20 {
        i2.emit("job", Payload { n }, EmitOptions::anycast())
            .await
            .unwrap();
    }

    wait_for(
        || total_delivered.load(Ordering::SeqCst) == 20,
        Duration::from_secs(10),
    )
    .await;

    assert_eq!(total_delivered.load(Ordering::SeqCst), 20);
    // i1 is closed before the second batch is published, so every one
    // of those 10 records can only have been claimed by i2.
    assert_eq!(i2_second_batch.load(Ordering::SeqCst), 10);

    i2.close().await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn once_fires_at_most_once_across_several_deliveries() {
    let bus_name = unique_bus_name();
    let once_calls = Arc::new(AtomicUsize::new(0));

    let bus = Arc::new(
        EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
            .await
            .unwrap(),
    );
    bus.init().await.unwrap();
    {
        let counter = Arc::clone(&once_calls);
        bus.once("ping", move |_env| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    }

    for n in 0..5 {
        bus.emit("ping", Payload { n }, EmitOptions::broadcast())
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(once_calls.load(Ordering::SeqCst), 1);

    bus.close().await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn unicast_targets_exactly_the_named_instance() {
    let bus_name = unique_bus_name();

    let sender = Arc::new(
        EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
            .await
            .unwrap(),
    );
    sender.init().await.unwrap();

    let target_count = Arc::new(AtomicUsize::new(0));
    let target = Arc::new(
        EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
            .await
            .unwrap(),
    );
    target.init().await.unwrap();
    {
        let counter = Arc::clone(&target_count);
        target.on("dm", move |_env| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    }

    let bystander_count = Arc::new(AtomicUsize::new(0));
    let bystander = Arc::new(
        EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
            .await
            .unwrap(),
    );
    bystander.init().await.unwrap();
    {
        let counter = Arc::clone(&bystander_count);
        bystander.on("dm", move |_env| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    }

    sender
        .emit(
            "dm",
            Payload { n: 7 },
            EmitOptions::unicast(target.id().to_string()),
        )
        .await
        .unwrap();

    wait_for(
        || target_count.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(target_count.load(Ordering::SeqCst), 1);
    assert_eq!(bystander_count.load(Ordering::SeqCst), 0);

    sender.close().await;
    target.close().await;
    bystander.close().await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn only_new_subscriber_misses_history_published_before_it_joined() {
    let bus_name = unique_bus_name();

    let publisher = Arc::new(
        EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
            .await
            .unwrap(),
    );
    publisher.init().await.unwrap();
    publisher
        .emit("history", Payload { n: 1 }, EmitOptions::broadcast())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let late_count = Arc::new(AtomicUsize::new(0));
    let late_subscriber = Arc::new(
        EventBus::<Payload>::new(
            EventBusConfig::new(redis_url())
                .with_name(&bus_name)
                .with_only_new(true),
        )
        .await
        .unwrap(),
    );
    late_subscriber.init().await.unwrap();
    {
        let counter = Arc::clone(&late_count);
        late_subscriber.on("history", move |_env| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(late_count.load(Ordering::SeqCst), 0);

    publisher.close().await;
    late_subscriber.close().await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn replay_subscriber_receives_history_published_before_it_joined() {
    let bus_name = unique_bus_name();

    let publisher = Arc::new(
        EventBus::<Payload>::new(EventBusConfig::new(redis_url()).with_name(&bus_name))
            .await
            .unwrap(),
    );
    publisher.init().await.unwrap();
    publisher
        .emit("history", Payload { n: 42 }, EmitOptions::broadcast())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let replay_count = Arc::new(AtomicUsize::new(0));
    let replay_subscriber = Arc::new(
        EventBus::<Payload>::new(
            EventBusConfig::new(redis_url())
                .with_name(&bus_name)
                .with_only_new(false),
        )
        .await
        .unwrap(),
    );
    replay_subscriber.init().await.unwrap();
    {
        let counter = Arc::clone(&replay_count);
        replay_subscriber.on("history", move |_env| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    }

    wait_for(
        || replay_count.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(replay_count.load(Ordering::SeqCst), 1);

    publisher.close().await;
    replay_subscriber.close().await;
}
