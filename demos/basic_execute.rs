//! Basic example of running operations through a resource pool.
//!
//! This example shows how to:
//! - Configure a pool with a concurrency limit and lease timeout
//! - Run many operations concurrently, with excess calls queued
//! - Inspect the pool through a health snapshot
//! - Shut the pool down gracefully
//!
//! Run with: cargo run --example basic_execute

use leasepool::mock::MockResource;
use leasepool::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leasepool=debug".into()),
        )
        .init();

    println!("=== Leasepool Basic Example ===\n");

    let config = ResourcePoolConfig::new("converter")
        .with_max_concurrent(2)
        .with_lease_timeout(Duration::from_secs(2));

    println!("Pool configuration:");
    println!("  Name: {}", config.name);
    println!("  Max concurrent: {}", config.max_concurrent);
    println!("  Lease timeout: {:?}", config.lease_timeout);
    println!();

    let pool: ResourcePool<leasepool::mock::MockError> =
        ResourcePool::new(config, DefaultClassifier)?;

    // A stand-in for a converter subprocess that takes 200ms per job
    let converter = Arc::new(
        MockResource::new()
            .with_name("converter")
            .with_latency(Duration::from_millis(200)),
    );

    println!("Submitting 6 jobs to a pool of 2 slots...\n");

    let jobs: Vec<_> = (1..=6)
        .map(|job| {
            let pool = pool.clone();
            let converter = Arc::clone(&converter);
            tokio::spawn(async move {
                let label = format!("job-{job}");
                let result = pool.execute(&label, || converter.call()).await;
                (label, result)
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let health = pool.health();
    println!(
        "While running: {} active, {} queued, oldest wait {:?}\n",
        health.active_leases, health.queue_length, health.oldest_queue_wait
    );

    for job in jobs {
        let (label, result) = job.await?;
        match result {
            Ok(call) => println!("  {label}: done (call #{call})"),
            Err(e) => println!("  {label}: failed: {e}"),
        }
    }

    println!("\nPeak concurrency observed: {}", converter.peak_in_flight());

    let health = pool.health();
    println!("\n=== Health Snapshot ===");
    println!("{}", serde_json::to_string_pretty(&health)?);

    let report = pool.shutdown(Duration::from_secs(5)).await;
    println!("\nShutdown: drained = {}, cancelled = {}", report.drained, report.cancelled);

    Ok(())
}
