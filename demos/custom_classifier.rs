//! Example of plugging domain errors into a pool.
//!
//! This example shows how to:
//! - Decide retryability of your own error type with a classifier
//! - Run a custom heartbeat probe through the pool
//! - Load pool configuration from TOML
//! - Cancel an individual call with a token
//!
//! Run with: cargo run --example custom_classifier

use async_trait::async_trait;
use leasepool::prelude::*;
use leasepool::{ExecuteOptions, FnClassifier};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a (simulated) database driver.
#[derive(Debug, Error)]
enum DbError {
    #[error("deadlock detected")]
    Deadlock,
    #[error("duplicate key value violates unique constraint \"{0}\"")]
    UniqueViolation(String),
    #[error("connection lost")]
    ConnectionLost,
}

/// A fake database that deadlocks on the first two inserts.
#[derive(Default)]
struct Database {
    inserts: AtomicU32,
    pings: AtomicU32,
}

impl Database {
    async fn insert(&self, key: &str) -> Result<u32, DbError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        match (n, key) {
            (1 | 2, _) => Err(DbError::Deadlock),
            (_, "admin") => Err(DbError::UniqueViolation("users_name_key".into())),
            _ => Ok(n),
        }
    }

    async fn slow_report(&self) -> Result<u32, DbError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(0)
    }
}

/// Heartbeat probe issuing a cheap ping.
struct PingProbe(Arc<Database>);

#[async_trait]
impl Probe<DbError> for PingProbe {
    async fn probe(&self) -> Result<(), DbError> {
        let n = self.0.pings.fetch_add(1, Ordering::SeqCst);
        if n == 1 {
            return Err(DbError::ConnectionLost);
        }
        Ok(())
    }
}

const CONFIG: &str = r#"
name = "postgres"
max_concurrent = 4
lease_timeout_ms = 5000
heartbeat_interval_ms = 100

[retry]
max_retries = 3
initial_delay_ms = 50
max_delay_ms = 1000
jitter_fraction = 0.1

[circuit]
failure_threshold = 5
reset_timeout_ms = 2000
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leasepool=info".into()),
        )
        .init();

    println!("=== Custom Classifier Example ===\n");

    let config = ResourcePoolConfig::from_toml_str(CONFIG)?;
    println!(
        "Loaded config: {} slots, {} retries, heartbeat every {:?}\n",
        config.max_concurrent, config.retry.max_retries, config.heartbeat_interval
    );

    // Deadlocks and dropped connections are transient; everything else is not
    let classifier = FnClassifier::new(|e: &DbError| match e {
        DbError::Deadlock | DbError::ConnectionLost => ErrorClass::Retryable,
        DbError::UniqueViolation(_) => ErrorClass::Fatal,
    });

    let db = Arc::new(Database::default());
    let pool = ResourcePool::builder(config)
        .classifier(classifier)
        .probe(PingProbe(Arc::clone(&db)))
        .build()?;

    // Retried through two deadlocks
    match pool.execute("insert-alice", || db.insert("alice")).await {
        Ok(row) => println!("insert-alice: ok (insert #{row})"),
        Err(e) => println!("insert-alice: {e}"),
    }

    // Fatal on the first attempt
    match pool.execute("insert-admin", || db.insert("admin")).await {
        Ok(row) => println!("insert-admin: ok (insert #{row})"),
        Err(e) => println!("insert-admin: {e} [{} attempt(s)]", e.attempts()),
    }

    // Caller-side cancellation of a long query
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });
    let options = ExecuteOptions::new().with_cancel(token);
    match pool.execute_with("report", options, || db.slow_report()).await {
        Ok(_) => println!("report: finished"),
        Err(e) => println!("report: {e}"),
    }

    // Let a few heartbeats run, one of which fails
    tokio::time::sleep(Duration::from_millis(450)).await;

    let health = pool.health();
    println!("\n=== Health ===");
    println!("  Healthy: {}", health.is_healthy());
    println!("  Probes run: {} ({} failed)", health.probes_run, health.probe_failures);
    println!("  Cancelled calls: {}", health.cancelled_calls);
    println!("  Last error: {:?}", health.last_error);

    let report = pool.shutdown(Duration::from_secs(2)).await;
    println!("\nShutdown report: {}", serde_json::to_string(&report)?);

    Ok(())
}
