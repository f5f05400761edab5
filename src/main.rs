//! Demo for the fanout broker
//!
//! Wires an `order.created` topic to a notifications queue and an audit queue,
//! runs one worker per queue, publishes a batch of order events and prints the
//! broker statistics once every queue has drained (or on Ctrl-C).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info};

use fanout::broker::{
    Broker, BrokerConfig, InMemoryIdempotencyStore, Message, Queue, QueueOptions, Worker,
    WorkerConfig,
};
use fanout::config::{DEFAULT_CONFIG_FILE, Settings, load_config_from};
use fanout::utils::logging;

const ORDER_CREATED: &str = "order.created";

#[derive(Parser)]
#[command(name = "fanout", about = "Publish order events through the in-process broker")]
struct Cli {
    /// Number of order events to publish
    #[arg(long, default_value_t = 5)]
    orders: u32,

    /// Make the first delivery of every k-th order fail in the notification worker (0 = never)
    #[arg(long, default_value_t = 0)]
    fail_every: u32,

    /// Log level, overriding the configured one
    #[arg(long)]
    log_level: Option<String>,

    /// Configuration file (without extension)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Order {
    id: String,
    customer_email: String,
    total_cents: i64,
    status: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderCreated {
    event_type: String,
    order: Order,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match load_config_from(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(cli.log_level.as_deref().unwrap_or(&settings.logging.level));

    if let Err(e) = run(cli, settings).await {
        error!("fanout failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    let broker = Arc::new(Broker::new(BrokerConfig::from(&settings.broker)));
    let worker_config = WorkerConfig::from(&settings.worker);

    broker.create_topic(ORDER_CREATED);
    let dead_letters = broker.create_queue("dead-letters", QueueOptions::default());
    let notifications = broker.create_queue(
        "notifications",
        QueueOptions::new()
            .max_retries(3)
            .dead_letter_queue(dead_letters.clone()),
    );
    let audit = broker.create_queue(
        "audit",
        QueueOptions::new()
            .max_retries(5)
            .dead_letter_queue(dead_letters.clone()),
    );
    broker.subscribe(ORDER_CREATED, "notifications")?;
    broker.subscribe(ORDER_CREATED, "audit")?;

    let workers = vec![
        Arc::new(notification_worker(notifications.clone(), cli.fail_every, worker_config)),
        Arc::new(Worker::idempotent(
            "audit-worker",
            audit.clone(),
            |msg: &Message| -> anyhow::Result<()> {
                let event: OrderCreated = msg.decode()?;
                info!(
                    event_type = %event.event_type,
                    order_id = %event.order.id,
                    total_cents = event.order.total_cents,
                    status = event.order.status,
                    "audit record written"
                );
                Ok(())
            },
            Arc::new(InMemoryIdempotencyStore::new(settings.broker.idempotency_ttl())),
            worker_config,
        )),
    ];

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let handles: Vec<_> = workers
        .iter()
        .map(|worker| {
            let worker = worker.clone();
            let cancel = cancel_rx.clone();
            tokio::spawn(async move { worker.start(cancel).await })
        })
        .collect();

    for n in 1..=cli.orders {
        let event = OrderCreated {
            event_type: ORDER_CREATED.to_string(),
            order: Order {
                id: format!("ord-{n:04}"),
                customer_email: format!("customer{n}@example.com"),
                total_cents: i64::from(n) * 1250,
                status: 1,
            },
        };
        let mut msg = Message::new(ORDER_CREATED, &event)?;
        msg.set_metadata("order_id", event.order.id.as_str());
        let delivered = broker
            .publish(ORDER_CREATED, &msg)
            .with_context(|| format!("publishing order {}", event.order.id))?;
        info!(order_id = %event.order.id, delivered, "published order");
    }

    let queues = [notifications, audit];
    tokio::select! {
        _ = drained(&queues) => info!("all queues drained"),
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received."),
    }

    for worker in &workers {
        worker.stop();
    }
    let _ = cancel_tx.send(true);
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(Ok(())) | Ok(Err(fanout::BrokerError::Cancelled)) => {}
            Ok(Err(e)) => error!("worker exited with error: {e}"),
            Err(e) => bail!("worker task panicked: {e}"),
        }
    }

    for worker in &workers {
        let stats = worker.stats();
        info!(
            worker = %worker.name(),
            processed = stats.messages_processed,
            failed = stats.messages_failed,
            "worker finished"
        );
    }
    println!("{}", serde_json::to_string_pretty(&broker.stats())?);
    Ok(())
}

fn notification_worker(queue: Arc<Queue>, fail_every: u32, config: WorkerConfig) -> Worker {
    Worker::with_config(
        "notification-worker",
        queue,
        move |msg: &Message| -> anyhow::Result<()> {
            let event: OrderCreated = msg.decode()?;
            let sequence: u32 = event
                .order
                .id
                .trim_start_matches("ord-")
                .parse()
                .unwrap_or(0);
            if fail_every > 0 && sequence % fail_every == 0 && msg.retry_count == 1 {
                bail!("mail relay rejected order {}", event.order.id);
            }

            info!(
                order_id = %event.order.id,
                email = %event.order.customer_email,
                total = event.order.total_cents as f64 / 100.0,
                "notification sent"
            );
            Ok(())
        },
        config,
    )
}

async fn drained(queues: &[Arc<Queue>]) {
    while queues.iter().any(|q| q.size() > 0) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
