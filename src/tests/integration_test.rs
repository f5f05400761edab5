use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::wait_until;
use crate::broker::queue::{FAILURE_MAX_RETRIES_EXCEEDED, METADATA_FAILURE_REASON};
use crate::broker::{
    Broker, InMemoryIdempotencyStore, Message, QueueOptions, Worker, WorkerConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    a: i64,
}

fn fast_worker() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(5),
    }
}

fn scenario_broker(with_dlq: bool) -> (Broker, Arc<crate::Queue>, Option<Arc<crate::Queue>>) {
    let broker = Broker::default();
    broker.create_topic("T");

    let mut options = QueueOptions::new()
        .max_retries(2)
        .visibility_timeout(Duration::from_millis(10));
    let dlq = with_dlq.then(|| broker.create_queue("T-dlq", QueueOptions::default()));
    if let Some(dlq) = &dlq {
        options = options.dead_letter_queue(dlq.clone());
    }

    let queue = broker.create_queue("Q", options);
    broker.subscribe("T", "Q").unwrap();
    (broker, queue, dlq)
}

fn run_scenario(broker: &Broker, queue: &crate::Queue) {
    let msg = Message::new("test.event", &Event { a: 1 }).unwrap();
    broker.publish("T", &msg).unwrap();

    let first = queue.receive().unwrap().expect("published message");
    assert_eq!(first.decode::<Event>().unwrap(), Event { a: 1 });
    queue.nack(first.receipt_handle.as_deref().unwrap()).unwrap();

    sleep(Duration::from_millis(15));

    let second = queue.receive().unwrap().expect("redelivered message");
    assert_eq!(second.id, first.id);
    assert_eq!(second.retry_count, 2);
    queue.nack(second.receipt_handle.as_deref().unwrap()).unwrap();
}

#[test]
fn scenario_retry_then_dead_letter() {
    let (broker, queue, dlq) = scenario_broker(true);
    let dlq = dlq.unwrap();

    run_scenario(&broker, &queue);

    assert_eq!(queue.size(), 0);
    assert_eq!(queue.stats().total_failed, 1);

    let dead = dlq.receive().unwrap().expect("dead-lettered copy");
    assert_eq!(dead.decode::<Event>().unwrap(), Event { a: 1 });
    assert_eq!(
        dead.get_metadata(METADATA_FAILURE_REASON),
        FAILURE_MAX_RETRIES_EXCEEDED
    );
    assert_eq!(dead.get_metadata("source_topic"), "T");
}

#[test]
fn scenario_retry_then_discard() {
    let (broker, queue, _) = scenario_broker(false);

    run_scenario(&broker, &queue);

    let stats = broker.stats();
    assert_eq!(stats.queues["Q"].current_size, 0);
    assert_eq!(stats.queues["Q"].total_failed, 1);
    assert_eq!(stats.queues["Q"].total_processed, 0);
}

#[test]
fn fan_out_delivers_independent_copies() {
    let broker = Broker::default();
    broker.create_topic("order.created");
    let names = ["notifications", "audit", "analytics"];
    for name in names {
        broker.create_queue(name, QueueOptions::default());
        broker.subscribe("order.created", name).unwrap();
    }

    let mut msg = Message::new("order.created", &Event { a: 3 }).unwrap();
    msg.set_metadata("order_id", "ord-3");
    assert_eq!(broker.publish("order.created", &msg).unwrap(), 3);

    let mut ids: Vec<String> = names
        .iter()
        .map(|name| {
            let queue = broker.get_queue(name).unwrap();
            let copy = queue.receive().unwrap().unwrap();
            assert_eq!(copy.decode::<Event>().unwrap(), Event { a: 3 });
            assert_eq!(copy.get_metadata("order_id"), "ord-3");
            copy.id
        })
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn publish_from_many_tasks() {
    let broker = Arc::new(Broker::default());
    broker.create_topic("T");
    let left = broker.create_queue("left", QueueOptions::default());
    let right = broker.create_queue("right", QueueOptions::default());
    broker.subscribe("T", "left").unwrap();
    broker.subscribe("T", "right").unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let broker = broker.clone();
            tokio::spawn(async move {
                for j in 0..25 {
                    let msg = Message::new("test.event", &Event { a: i * 100 + j }).unwrap();
                    broker.publish("T", &msg).unwrap();
                }
            })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    assert_eq!(left.size(), 200);
    assert_eq!(right.size(), 200);
}

#[tokio::test]
async fn workers_drain_topic_end_to_end() {
    let broker = Arc::new(Broker::default());
    broker.create_topic("order.created");
    let notifications = broker.create_queue("notifications", QueueOptions::default());
    let audit = broker.create_queue("audit", QueueOptions::default());
    broker.subscribe("order.created", "notifications").unwrap();
    broker.subscribe("order.created", "audit").unwrap();

    let sent = Arc::new(AtomicUsize::new(0));
    let audited = Arc::new(AtomicUsize::new(0));

    let counter = sent.clone();
    let notifier = Arc::new(Worker::with_config(
        "notification-worker",
        notifications.clone(),
        move |msg: &Message| -> anyhow::Result<()> {
            msg.decode::<Event>()?;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        fast_worker(),
    ));

    let counter = audited.clone();
    let auditor = Arc::new(Worker::idempotent(
        "audit-worker",
        audit.clone(),
        move |_msg: &Message| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Arc::new(InMemoryIdempotencyStore::new(Duration::from_secs(60))),
        fast_worker(),
    ));

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let handles: Vec<_> = [notifier.clone(), auditor.clone()]
        .into_iter()
        .map(|worker| {
            let cancel = cancel_rx.clone();
            tokio::spawn(async move { worker.start(cancel).await })
        })
        .collect();

    for a in 0..10 {
        let msg = Message::new("order.created", &Event { a }).unwrap();
        broker.publish("order.created", &msg).unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(5), || {
            notifications.size() == 0 && audit.size() == 0
        })
        .await
    );

    notifier.stop();
    auditor.stop();
    for result in futures::future::join_all(handles).await {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(sent.load(Ordering::SeqCst), 10);
    assert_eq!(audited.load(Ordering::SeqCst), 10);
    assert_eq!(notifier.stats().messages_processed, 10);
    assert_eq!(broker.stats().queues["audit"].total_processed, 10);
}
