//! Loopback demo against the in-process broker.
//!
//! Run with: cargo run -p loopback-demo
//!
//! Sends a handful of messages from one session to another through a
//! `MemoryBroker`, settling them from a background pump. Pass `--json` to
//! drive a session registry with host calls read line by line from stdin.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use messenger_binding::{AsyncMessenger, Binding, DeliveryHandler};
use messenger_core::{Disposition, Message, MessengerConfig};
use messenger_session::{EndpointConfig, Inbound, MemoryBroker, MessengerSession, Timeout};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ENDPOINT: &str = "localhost:5672";
const ADDRESS: &str = "amqp://localhost:5672";
const QUEUE: &str = "queue://demo";

/// Logs every message and accepts it.
struct Printer;

#[async_trait]
impl DeliveryHandler for Printer {
    async fn on_message(&self, inbound: &Inbound) -> Disposition {
        match &inbound.message {
            Ok(msg) => {
                tracing::info!(
                    tracker = %inbound.tracker,
                    source = %inbound.source,
                    body = ?msg.body,
                    "received"
                );
                Disposition::Accept
            }
            Err(e) => {
                tracing::warn!(tracker = %inbound.tracker, error = %e, "malformed message");
                Disposition::Reject
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let broker = MemoryBroker::new();
    broker
        .listen(ENDPOINT, EndpointConfig::new().idle_timeout(Duration::from_secs(30)))
        .context("start listener")?;

    if std::env::args().any(|a| a == "--json") {
        return serve_json(broker).await;
    }

    let config = MessengerConfig::from_env();

    let mut receiver = MessengerSession::with_config(
        broker.connector(),
        MessengerConfig {
            name: "receiver".into(),
            ..config.clone()
        },
    );
    receiver.connect(ADDRESS)?;
    receiver.subscribe_with_credit(QUEUE, 4)?;
    let receiver = AsyncMessenger::new(receiver);
    let pump = receiver.spawn_pump(Duration::from_millis(10), Arc::new(Printer));

    let mut sender = MessengerSession::with_config(
        broker.connector(),
        MessengerConfig {
            name: String::new(),
            ..config
        },
    );
    sender.connect(ADDRESS)?;
    tracing::info!(name = sender.name(), "sender connected");

    let mut trackers = Vec::new();
    for i in 0..10 {
        let msg = Message::text(format!("hello #{i}")).property("seq", i.to_string());
        trackers.push(sender.put(&msg, QUEUE)?);
    }
    let sender = AsyncMessenger::new(sender);
    let flushed = sender.send(Timeout::After(Duration::from_secs(5))).await?;
    tracing::info!(flushed, "sent");

    for tracker in trackers {
        let status = sender.with(|s| s.status(tracker));
        tracing::info!(%tracker, %status, "delivery");
    }

    while broker.queue_depth(QUEUE)? > 0 || receiver.with(|s| s.incoming_len()) > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pump.shutdown().await;

    let idle = receiver.with(|s| s.remote_idle_timeout(ADDRESS));
    tracing::info!(?idle, "peer idle timeout");

    let mut trace = receiver.trace_stream();
    let lines = receiver.with(|s| s.trace_history().len());
    for _ in 0..lines {
        if let Some(line) = trace.next().await {
            tracing::debug!(%line, "trace");
        }
    }

    receiver.with(MessengerSession::stop);
    sender.with(MessengerSession::stop);
    Ok(())
}

/// Answer host calls from stdin, one JSON object per line.
async fn serve_json(broker: MemoryBroker) -> anyhow::Result<()> {
    let mut binding = Binding::new(broker.connector());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = binding.handle_json(&line);
        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    tracing::info!(sessions = binding.len(), "stdin closed");
    Ok(())
}
