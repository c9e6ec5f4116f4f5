//! CLI for popq
//!
//! Subcommands:
//! - `enqueue`: add a message to the work queue
//! - `worker`: process the queue in batches until interrupted
//! - `publish`: publish a notification envelope to the topic
//! - `dead-letters`: list dead-lettered messages or envelopes
//! - `redrive`: return a dead-lettered message to the queue
//! - `purge`: reap expired leases and drop messages past retention
//! - `recover`: finish fan-outs interrupted by a crash

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use popq::broker::Topic;
use popq::config::{Settings, load_config};
use popq::persistence::MessageStore;
use popq::queue::{
    BatchPolicy, BatchProcessor, HandlerError, QueueEngine, ReceivedMessage, RecordHandler,
};
use popq::subscriber::{EmailDispatcher, LogMailer, Subscriber};
use popq::transport::{Gateway, Request};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "popq")]
enum Command {
    /// Add a message to the work queue
    Enqueue {
        /// Message body, usually JSON
        body: String,
    },
    /// Process the queue until Ctrl-C
    Worker {
        /// Ack successes and nack failures instead of failing the whole batch
        #[arg(long)]
        partial_ack: bool,
        /// Override the configured batch size (1-10)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Publish a notification to every subscriber of the topic
    Publish {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        recipient: String,
    },
    /// List dead letters of the queue, or of one topic subscriber
    DeadLetters {
        #[arg(long)]
        subscriber: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Move a dead-lettered message back to the queue
    Redrive { id: String },
    /// Reap expired leases and purge messages past retention
    Purge,
    /// Finish pending topic fan-outs
    Recover,
}

/// Worker handler: every body must be a JSON document.
struct JsonLogHandler;

#[async_trait]
impl RecordHandler for JsonLogHandler {
    async fn handle(&self, record: &ReceivedMessage) -> Result<(), HandlerError> {
        let value: serde_json::Value = serde_json::from_slice(&record.body)?;
        info!(
            id = %record.id,
            receive_count = record.receive_count,
            body = %value,
            "processed record"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            popq::utils::logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };
    popq::utils::logging::init(&config.logging.level);

    if let Err(e) = run(cmd, config).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(cmd: Command, config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = MessageStore::open(&config.store.path)?;
    let queue = QueueEngine::new(&config.queue.name, &store, config.queue.queue_config()?)?;
    let topic = Arc::new(build_topic(&config, &store)?);

    match cmd {
        Command::Enqueue { body } => {
            let gateway = Gateway::new(queue, topic);
            let response = gateway.handle(Request::Enqueue { body }).await;
            println!("{}", serde_json::to_string(&response)?);
        }
        Command::Publish {
            subject,
            body,
            recipient,
        } => {
            let gateway = Gateway::new(queue, topic);
            let response = gateway
                .handle(Request::Publish {
                    subject,
                    body,
                    recipient,
                })
                .await;
            println!("{}", serde_json::to_string(&response)?);
        }
        Command::Worker {
            partial_ack,
            batch_size,
        } => run_worker(&config, queue, partial_ack, batch_size).await?,
        Command::DeadLetters { subscriber, limit } => match subscriber {
            Some(subscriber) => {
                for letter in topic.dead_letters(&subscriber)?.into_iter().take(limit) {
                    println!("{}", serde_json::to_string(&letter)?);
                }
            }
            None => {
                for letter in queue.dead_letters(limit)? {
                    let line = json!({
                        "id": letter.message.id,
                        "body": String::from_utf8_lossy(&letter.message.body),
                        "receive_count": letter.message.receive_count,
                        "reason": letter.reason,
                        "dead_lettered_at": letter.dead_lettered_at,
                    });
                    println!("{line}");
                }
            }
        },
        Command::Redrive { id } => {
            queue.redrive(&id)?;
            println!("{}", json!({ "redriven": id }));
        }
        Command::Purge => {
            let reaped = queue.reap_expired_leases()?;
            let purged = queue.purge_expired()?;
            println!(
                "{}",
                json!({
                    "requeued": reaped.requeued,
                    "dead_lettered": reaped.dead_lettered,
                    "purged": purged,
                })
            );
        }
        Command::Recover => {
            for report in topic.recover().await? {
                println!(
                    "{}",
                    json!({
                        "envelope_id": report.envelope_id,
                        "delivered": report.delivered(),
                        "dead_lettered": report.dead_lettered(),
                    })
                );
            }
        }
    }

    store.flush()?;
    Ok(())
}

fn build_topic(config: &Settings, store: &MessageStore) -> popq::Result<Topic> {
    let subscribers: Vec<Arc<dyn Subscriber>> = vec![Arc::new(EmailDispatcher::new(
        "email",
        &config.notify.source_address,
        LogMailer,
    ))];
    Topic::new(
        &config.topic.name,
        store,
        subscribers,
        config.topic.retry_policy(),
    )
}

async fn run_worker(
    config: &Settings,
    queue: QueueEngine,
    partial_ack: bool,
    batch_size: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let policy = if partial_ack {
        BatchPolicy::PartialAck
    } else {
        BatchPolicy::FailWholeBatch
    };
    let mut processor = BatchProcessor::new(queue.clone()).with_policy(policy);
    if let Some(size) = batch_size {
        processor = processor.with_batch_size(size)?;
    }

    let maintenance = tokio::spawn(QueueEngine::start_maintenance_loop(
        queue,
        config.worker.maintenance_interval(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received. Exiting gracefully.");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = processor
        .run(&JsonLogHandler, config.worker.poll_interval(), shutdown_rx)
        .await;
    maintenance.abort();
    result?;
    Ok(())
}
