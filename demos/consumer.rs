//! Live consumer for the broker's message route.
//!
//! Connects to the Web-STOMP endpoint, loads whatever is already queued through
//! the management API, then prints every live message until Ctrl-C. The
//! connection is checked every 30 seconds and re-established if it dropped.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,broker_session=debug cargo run --example consumer --features tracing
//! ```
//!
//! Endpoints and credentials default to a local RabbitMQ and can be overridden
//! with `BROKER_URL`, `MANAGEMENT_URL`, `BROKER_USERNAME` and `BROKER_PASSWORD`.

use std::env;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use broker_session::{BatchEntry, Config, MessageStats, Session};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const INITIAL_FETCH: usize = 100;
const CHECK_INTERVAL: Duration = Duration::from_secs(30);

fn config() -> Config {
    let defaults = Config::default();

    Config::builder()
        .broker_url(env::var("BROKER_URL").unwrap_or_else(|_| defaults.broker_url().to_owned()))
        .management_url(
            env::var("MANAGEMENT_URL").unwrap_or_else(|_| defaults.management_url().to_owned()),
        )
        .username(env::var("BROKER_USERNAME").unwrap_or_else(|_| defaults.username().to_owned()))
        .password(env::var("BROKER_PASSWORD").unwrap_or_else(|_| "guest".to_owned()))
        .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let session = Session::new(config())?;
    let stats = Arc::new(Mutex::new(MessageStats::default()));

    let counted = Arc::clone(&stats);
    session.on_message(move |message| {
        counted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(message);
        info!(
            id = %message.id,
            sender = %message.sender,
            kind = %message.message_type,
            content = %message.content,
            "message"
        );
        Ok(())
    });
    session.on_connection_change(|connected| {
        info!(connected, "connection status");
        Ok(())
    });
    session.on_error(|error| {
        warn!(kind = ?error.kind(), %error, "session error");
        Ok(())
    });

    session.connect();

    let backlog = session.fetch_messages(INITIAL_FETCH).await;
    for entry in &backlog {
        match entry {
            BatchEntry::Decoded(message) => info!(
                id = %message.id,
                kind = %message.message_type,
                content = %message.content,
                "queued"
            ),
            BatchEntry::Malformed(placeholder) => warn!(
                content = %placeholder.content,
                error = %placeholder.error,
                "undecodable queued message"
            ),
            _ => {}
        }
    }
    let queued: MessageStats = backlog.iter().filter_map(BatchEntry::as_message).collect();
    info!(?queued, "initial fetch done");

    let mut check = interval(CHECK_INTERVAL);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    check.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = check.tick() => {
                let connected = session.check_connection();
                info!(connected, state = %session.state(), "connection check");
            }
        }
    }

    session.disconnect();
    let live = *stats.lock().unwrap_or_else(PoisonError::into_inner);
    info!(?live, "shutting down");

    Ok(())
}
