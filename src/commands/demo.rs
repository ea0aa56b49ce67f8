//! Demo command implementation.
//!
//! The demo command:
//! 1. Starts instrumented worker threads running a synthetic workload
//! 2. Starts the profiler against the thread registry
//! 3. Waits for the requested duration
//! 4. Stops the workers and the profiler (final flush)

use crate::flamegraph::FlamegraphConfig;
use crate::reporter::{FoldedFileReporter, InfluxDbReporter, Reporter};
use crate::sampler::registry::registered_threads;
use crate::sampler::{blocking, enter, enter_at, Profiler, RegistrySource};
use crate::utils::config::{AgentArgs, ProfilerConfig};
use anyhow::{Context, Result};
use log::{debug, info};
use std::hint::black_box;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Arguments for the demo command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct DemoArgs {
    /// How long to profile
    pub duration: Duration,

    /// Number of workload threads
    pub threads: usize,

    /// Sampling period
    pub period: Duration,

    /// Flush period
    pub reporting_period: Duration,

    /// Agent option string (`server=...,database=...`); reports to InfluxDB when it names a server
    pub agent: Option<String>,

    /// Folded output path when not reporting to InfluxDB
    pub output: PathBuf,

    /// Optional SVG flamegraph path
    pub output_svg: Option<PathBuf>,

    /// Flamegraph configuration
    pub flamegraph_config: Option<FlamegraphConfig>,
}

impl Default for DemoArgs {
    fn default() -> Self {
        let config = ProfilerConfig::default();
        Self {
            duration: Duration::from_secs(5),
            threads: 4,
            period: config.period,
            reporting_period: Duration::from_secs(1),
            agent: None,
            output: PathBuf::from("demo.folded"),
            output_svg: None,
            flamegraph_config: None,
        }
    }
}

/// Execute the demo command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Invalid agent options
/// * InfluxDB reporter construction failures
/// * Worker thread spawn failures
pub fn execute_demo(args: DemoArgs) -> Result<()> {
    let start_time = Instant::now();

    let agent = match &args.agent {
        Some(options) => AgentArgs::parse(options).context("Failed to parse agent options")?,
        None => AgentArgs::default(),
    };

    let config = ProfilerConfig {
        period: args.period,
        reporting_period: args.reporting_period,
        ..agent.profiler_config()
    };
    info!(
        "Sampling every {:?}, flushing every {} ticks",
        config.period,
        config.reporting_frequency()
    );

    // Step 1: Choose reporter
    info!("Step 1/4: Creating reporter...");
    let reporter = build_reporter(&args, &agent)?;

    // Step 2: Start workload
    info!("Step 2/4: Starting {} workload threads...", args.threads);
    let stop = Arc::new(AtomicBool::new(false));
    let workers = (0..args.threads)
        .map(|i| spawn_worker(i, Arc::clone(&stop)))
        .collect::<Result<Vec<_>>>()?;

    // Step 3: Profile
    info!("Step 3/4: Profiling for {:?}...", args.duration);
    let profiler = Profiler::start(RegistrySource::new(), reporter, config)
        .context("Failed to start profiler")?;
    debug!("{} instrumented threads registered", registered_threads());
    thread::sleep(args.duration);

    // Step 4: Stop
    info!("Step 4/4: Stopping...");
    profiler.shutdown().context("Profiler did not shut down cleanly")?;
    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        if worker.join().is_err() {
            anyhow::bail!("Workload thread panicked");
        }
    }

    if !agent.has_server() {
        info!("✓ Folded stacks written to: {}", args.output.display());
        if let Some(svg) = &args.output_svg {
            info!("✓ Flamegraph written to: {}", svg.display());
        }
    }

    info!("Demo completed in {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}

/// Pick InfluxDB when the agent options name a server, else a folded file
///
/// **Private** - internal helper for execute_demo
fn build_reporter(args: &DemoArgs, agent: &AgentArgs) -> Result<Box<dyn Reporter + Send>> {
    if agent.has_server() {
        let influx = agent.influxdb_config().context("Incomplete InfluxDB options")?;
        let reporter = InfluxDbReporter::new(&influx).context("Failed to create InfluxDB reporter")?;
        return Ok(Box::new(reporter));
    }

    let mut reporter = FoldedFileReporter::new(&args.output);
    if let Some(svg) = &args.output_svg {
        reporter = reporter.with_flamegraph(svg, args.flamegraph_config.clone().unwrap_or_default());
    }
    Ok(Box::new(reporter))
}

fn spawn_worker(index: usize, stop: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("demo-worker-{}", index))
        .spawn(move || {
            let _run = enter("demo.Worker", "run");
            let mut iterations = 0u64;
            while !stop.load(Ordering::Relaxed) {
                handle_order(iterations);
                iterations += 1;
            }
            debug!("demo-worker-{} finished after {} orders", index, iterations);
        })
        .context("Failed to spawn workload thread")
}

fn handle_order(order: u64) {
    let _frame = enter("demo.OrderService", "handle");

    let total = price(order);
    if order % 4 == 0 {
        reserve_stock();
    }
    black_box(total);
}

fn price(order: u64) -> u64 {
    let _frame = enter_at("demo.Pricing", "price", 42);

    let base = spin(20_000, order);
    base.wrapping_add(tax(base))
}

fn tax(amount: u64) -> u64 {
    let _frame = enter("demo.Pricing", "tax");
    spin(5_000, amount)
}

fn reserve_stock() {
    let _frame = enter("demo.Inventory", "reserve");
    let _waiting = blocking();
    thread::sleep(Duration::from_millis(2));
}

fn spin(rounds: u64, seed: u64) -> u64 {
    (0..rounds).fold(seed, |acc, i| black_box(acc.wrapping_mul(31).wrapping_add(i)))
}

/// Validate demo arguments
///
/// **Public** - can be called before execute_demo for early validation
pub fn validate_args(args: &DemoArgs) -> Result<()> {
    if args.threads == 0 {
        anyhow::bail!("threads must be greater than 0");
    }

    if args.period.is_zero() {
        anyhow::bail!("Sampling period must be greater than 0");
    }

    if args.reporting_period < args.period {
        anyhow::bail!("Reporting period must not be shorter than the sampling period");
    }

    if args.duration.is_zero() {
        anyhow::bail!("Duration must be greater than 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_args_default() {
        assert!(validate_args(&DemoArgs::default()).is_ok());
    }

    #[test]
    fn test_validate_args_zero_threads() {
        let args = DemoArgs {
            threads: 0,
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_reporting_shorter_than_period() {
        let args = DemoArgs {
            period: Duration::from_millis(100),
            reporting_period: Duration::from_millis(10),
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_demo_writes_folded_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("demo.folded");
        let args = DemoArgs {
            duration: Duration::from_millis(300),
            threads: 2,
            period: Duration::from_millis(5),
            reporting_period: Duration::from_millis(50),
            output: output.clone(),
            ..Default::default()
        };

        execute_demo(args).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        assert!(content.contains("demo;Worker;run;demo;OrderService;handle"));
    }
}
