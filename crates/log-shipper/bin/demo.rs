//! # Log Shipper Demo
//!
//! End-to-end run of the shipping pipeline:
//!
//! - Producer threads log structured records through one shared `LogShipper`
//! - The emitter cuts NDJSON bulk requests by size or by the flush interval
//! - A simulated bulk endpoint with latency and random failures receives them
//! - `RetryingSink` re-sends failed requests with exponential backoff
//! - Requests that still fail land in a bounded `MemoryFailover`
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (2 producers, 500 records each)
//! cargo run -p log-shipper --bin demo --release -- --quick
//!
//! # Full mode (8 producers, 5000 records each)
//! cargo run -p log-shipper --bin demo --release
//!
//! # Print each request summary and emitter debug logs
//! RUST_LOG=debug cargo run -p log-shipper --bin demo -- --verbose
//! ```

use anyhow::Context;
use bulk_emitter::{EmitterConfig, FailoverPolicy};
use log_shipper::{
    BulkRequest, BulkSink, BulkSinkBoxed, Level, LogRecord, LogShipper, MemoryFailover,
    RetryConfig, RetryingSink, ShipperConfig, SinkError,
};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Bulk endpoint stand-in that sleeps and fails a fraction of requests.
struct SimulatedEndpoint {
    failure_rate: f64,
    latency: Duration,
    verbose: bool,
    attempts: AtomicU64,
    accepted_records: AtomicU64,
}

impl SimulatedEndpoint {
    fn new(failure_rate: f64, latency: Duration, verbose: bool) -> Self {
        Self {
            failure_rate,
            latency,
            verbose,
            attempts: AtomicU64::new(0),
            accepted_records: AtomicU64::new(0),
        }
    }
}

impl BulkSink for SimulatedEndpoint {
    async fn send(&self, request: BulkRequest) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        if rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(SinkError::Rejected(format!(
                "simulated 503 for {} records",
                request.len()
            )));
        }

        self.accepted_records
            .fetch_add(request.len() as u64, Ordering::Relaxed);
        if self.verbose {
            println!(
                "   accepted request: {} records, {} bytes",
                request.len(),
                request.byte_len()
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated-endpoint"
    }
}

fn random_record(producer: usize, seq: usize) -> LogRecord {
    let mut rng = rand::thread_rng();
    let level = match rng.gen_range(0..100) {
        0..=4 => Level::Error,
        5..=14 => Level::Warn,
        15..=69 => Level::Info,
        _ => Level::Debug,
    };
    let (logger, message) = match rng.gen_range(0..4) {
        0 => ("app.http", "request completed"),
        1 => ("app.db", "query executed"),
        2 => ("app.cache", "cache lookup"),
        _ => ("app.queue", "message consumed"),
    };
    LogRecord::new(level, logger, message)
        .with_field("producer", producer as i64)
        .with_field("seq", seq as i64)
        .with_field("elapsed_ms", rng.gen_range(1..500i64))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let verbose = args.contains(&"--verbose".to_string());
    let quick = args.contains(&"--quick".to_string());

    let (num_producers, records_per_producer) = if quick { (2, 500) } else { (8, 5_000) };

    println!("Log Shipper Demo");
    println!("   Mode: {}", if quick { "quick" } else { "full" });
    println!("   Producers: {num_producers}");
    println!("   Records per producer: {records_per_producer}");
    println!();

    let endpoint = Arc::new(RetryingSink::new(
        SimulatedEndpoint::new(0.1, Duration::from_millis(3), verbose),
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        },
    ));
    let failover = Arc::new(MemoryFailover::new(10_000));

    let config = ShipperConfig::default()
        .with_emitter(
            EmitterConfig::new(500, Duration::from_millis(200))
                .with_thread_name("demo-flush-timer"),
        )
        .with_channel_capacity(32)
        .with_max_concurrent_sends(4);

    let shipper = Arc::new(
        LogShipper::new(
            config,
            Arc::clone(&endpoint) as Arc<dyn BulkSinkBoxed>,
            Arc::clone(&failover) as Arc<dyn FailoverPolicy<String>>,
        )
        .context("failed to start log shipper")?,
    );

    let start = Instant::now();
    let producers: Vec<_> = (0..num_producers)
        .map(|p| {
            let shipper = Arc::clone(&shipper);
            std::thread::Builder::new()
                .name(format!("producer-{p}"))
                .spawn(move || {
                    for seq in 0..records_per_producer {
                        shipper.log(random_record(p, seq));
                        if seq % 100 == 0 {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                    }
                })
        })
        .collect::<Result<_, _>>()
        .context("failed to spawn producer")?;

    for producer in producers {
        producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    }
    let produce_elapsed = start.elapsed();

    let emitter_metrics = shipper
        .emitter_metrics()
        .context("emitter already shut down")?;
    let metrics = Arc::clone(shipper.metrics());
    let serialization_errors = shipper.serialization_errors();

    let shipper = Arc::try_unwrap(shipper)
        .map_err(|_| anyhow::anyhow!("shipper still shared at shutdown"))?;
    shipper.shutdown().await.context("shutdown failed")?;
    let total_elapsed = start.elapsed();
    info!(elapsed = ?total_elapsed, "shipper drained");

    let total = (num_producers * records_per_producer) as u64;
    println!();
    println!("Results");
    println!("   Records logged:        {total}");
    println!("   Produce time:          {produce_elapsed:?}");
    println!("   Total time:            {total_elapsed:?}");
    println!(
        "   Throughput:            {:.0} records/s",
        total as f64 / total_elapsed.as_secs_f64()
    );
    println!();
    println!("Emitter (before shutdown)");
    println!("   Size flushes:          {}", emitter_metrics.size_flushes);
    println!("   Timer flushes:         {}", emitter_metrics.timer_flushes);
    println!("   Empty flushes:         {}", emitter_metrics.empty_flushes);
    println!("   Requests cut:          {}", emitter_metrics.batches_delivered);
    println!("   Requests refused:      {}", emitter_metrics.deliveries_rejected);
    println!();
    println!("Shipping");
    println!("   Requests sent:         {}", metrics.requests_sent());
    println!("   Records sent:          {}", metrics.records_sent());
    println!("   Send errors:           {}", metrics.send_errors());
    println!("   Retries:               {}", endpoint.total_retries());
    println!("   Recovered by retry:    {}", endpoint.recovered_sends());
    println!("   Endpoint attempts:     {}", endpoint.inner().attempts.load(Ordering::Relaxed));
    println!(
        "   Endpoint accepted:     {}",
        endpoint.inner().accepted_records.load(Ordering::Relaxed)
    );
    println!("   Failed over:           {}", metrics.records_failed_over());
    println!("   Failover held/dropped: {}/{}", failover.len(), failover.dropped());
    println!("   Serialization errors:  {serialization_errors}");

    let accounted = metrics.records_sent() + metrics.records_failed_over() + serialization_errors;
    anyhow::ensure!(
        accounted == total,
        "lost records: {total} logged, {accounted} accounted for"
    );
    println!();
    println!("All {total} records accounted for.");

    Ok(())
}
