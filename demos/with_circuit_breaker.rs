//! Circuit breaker example demonstrating resilience patterns.
//!
//! This example shows how to:
//! - Configure failure thresholds and the reset timeout
//! - Watch the circuit open after repeated failures
//! - Handle fast-failed calls while the circuit is open
//! - Recover through a half-open trial call
//! - Follow circuit transitions through the event stream
//!
//! Run with: cargo run --example with_circuit_breaker

use leasepool::mock::{MockError, MockOutcome, MockResource};
use leasepool::prelude::*;
use leasepool::PoolEventKind;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Circuit Breaker Example ===\n");

    let circuit = CircuitBreakerConfig::new()
        .with_failure_threshold(3)
        .with_reset_timeout(Duration::from_millis(500));

    println!("Circuit breaker configuration:");
    println!("  Failure threshold: {}", circuit.failure_threshold);
    println!("  Reset timeout: {:?}", circuit.reset_timeout);
    println!();

    let config = ResourcePoolConfig::new("unreliable-api")
        .with_max_concurrent(2)
        .with_retry(RetryConfig::no_retry())
        .with_circuit(circuit);
    let pool: ResourcePool<MockError> = ResourcePool::new(config, DefaultClassifier)?;

    // Print circuit transitions as they happen
    let mut events = pool.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let PoolEventKind::CircuitTransition { from, to, .. } = event.kind {
                println!("  [event] circuit {from} -> {to}");
            }
        }
    });

    // Three connectivity failures, then the API comes back
    let api = MockResource::new()
        .with_name("unreliable-api")
        .with_script([MockOutcome::Fail(FailureKind::Connectivity); 3]);

    println!("Sending requests to trigger the circuit breaker...\n");

    for i in 1..=5 {
        let label = format!("request-{i}");
        match pool.execute(&label, || api.call()).await {
            Ok(call) => println!("Request #{i}: success (call #{call})"),
            Err(PoolError::CircuitOpen { retry_in, .. }) => {
                println!("Request #{i}: circuit OPEN, rejected (retry in {retry_in:?})")
            }
            Err(e) => println!("Request #{i}: failed: {e}"),
        }
    }

    println!("\nWaiting for the reset timeout...\n");
    tokio::time::sleep(Duration::from_millis(600)).await;

    match pool.execute("trial", || api.call()).await {
        Ok(_) => println!("Trial request succeeded, circuit closed"),
        Err(e) => println!("Trial request failed: {e}"),
    }

    let health = pool.health();
    println!("\n=== Final State ===");
    println!("  Circuit: {}", health.circuit_state);
    println!("  Times opened: {}", health.circuit_times_opened);
    println!("  Rejected calls: {}", health.rejected_calls);
    println!("  Operation invocations: {}", api.call_count());
    if let Some(rate) = health.success_rate() {
        println!("  Success rate: {:.0}%", rate * 100.0);
    }

    pool.shutdown(Duration::from_secs(1)).await;
    drop(pool);
    watcher.await?;

    Ok(())
}
