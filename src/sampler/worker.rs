//! Background thread that drives the sampling loop at a fixed rate.
//!
//! Ticks run back to back on one thread and never overlap. When a tick
//! overruns the period the next one starts immediately and the missed ticks
//! are dropped, so the achieved rate drifts below nominal instead of
//! bursting. Drift is logged at debug level.

use super::sampling_loop::SamplingLoop;
use super::source::StackSource;
use crate::reporter::Reporter;
use crate::utils::config::{ProfilerConfig, WORKER_NAME_PREFIX};
use crate::utils::error::ProfilerError;
use log::{debug, error, info};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handle to a running profiler
///
/// Dropping the handle stops the worker and waits for the final flush.
pub struct Profiler {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Profiler {
    /// Start sampling on a dedicated thread
    ///
    /// **Public** - main entry point for embedding the profiler
    ///
    /// # Errors
    /// * `ProfilerError::SpawnFailed` - the worker thread could not be created
    pub fn start<S, R>(source: S, reporter: R, config: ProfilerConfig) -> Result<Self, ProfilerError>
    where
        S: StackSource + Send + 'static,
        R: Reporter + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let period = config.period;

        info!(
            "Starting CPU profiler: period={:?}, flush every {} ticks",
            period,
            config.reporting_frequency()
        );

        let worker = thread::Builder::new()
            .name(format!("{}sampler", WORKER_NAME_PREFIX))
            .spawn(move || {
                let mut sampling_loop = SamplingLoop::new(source, reporter, &config);
                run_ticks(&mut sampling_loop, period, |timeout| {
                    !matches!(stop_rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
                });
                sampling_loop.shutdown();
                debug!("CPU profiler worker finished");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }

    /// Stop sampling and wait for the final flush
    ///
    /// # Errors
    /// * `ProfilerError::WorkerPanicked` - the worker died, e.g. on a malformed trace key
    pub fn shutdown(mut self) -> Result<(), ProfilerError> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<(), ProfilerError> {
        // a send error only means the worker already exited
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|panic| ProfilerError::WorkerPanicked(panic_message(&*panic))),
            None => Ok(()),
        }
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        if let Err(err) = self.stop_and_join() {
            error!("{}", err);
        }
    }
}

/// Tick at a fixed rate until `wait` reports a stop request
///
/// `wait` blocks for at most the given duration and returns `true` when the
/// loop should stop.
fn run_ticks<S, R, W>(sampling_loop: &mut SamplingLoop<S, R>, period: Duration, mut wait: W)
where
    S: StackSource,
    R: Reporter,
    W: FnMut(Duration) -> bool,
{
    let mut next_tick = Instant::now() + period;

    loop {
        if wait(next_tick.saturating_duration_since(Instant::now())) {
            break;
        }

        sampling_loop.tick();

        next_tick += period;
        let now = Instant::now();
        if next_tick < now {
            debug!("Sampling tick overran by {:?}", now - next_tick);
            next_tick = now;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::source::{Frame, ThreadSnapshot, ThreadState};
    use crate::utils::error::{ReportError, SampleError};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct OneThread;

    impl StackSource for OneThread {
        fn threads_in_state(
            &mut self,
            state: ThreadState,
            _exclude: &dyn Fn(&str) -> bool,
        ) -> Result<Vec<ThreadSnapshot>, SampleError> {
            Ok(vec![ThreadSnapshot::new(
                "main",
                state,
                vec![Frame::new("app.Main", "main")],
            )])
        }
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<HashMap<String, u64>>>);

    impl Reporter for Shared {
        fn record_gauge_values(&mut self, gauges: &HashMap<String, u64>) -> Result<(), ReportError> {
            let mut totals = self.0.lock().unwrap();
            for (key, value) in gauges {
                *totals.entry(key.clone()).or_insert(0) += value;
            }
            Ok(())
        }
    }

    #[test]
    fn test_run_ticks_stops_on_request() {
        let reporter = Shared::default();
        let config = ProfilerConfig::default();
        let mut sampling_loop = SamplingLoop::new(OneThread, reporter.clone(), &config);

        let mut remaining = 3;
        run_ticks(&mut sampling_loop, Duration::ZERO, |_| {
            if remaining == 0 {
                return true;
            }
            remaining -= 1;
            false
        });

        assert_eq!(sampling_loop.traces().get("cpu.trace.app.Main.main"), Some(3));
    }

    #[test]
    fn test_shutdown_flushes_everything() {
        let reporter = Shared::default();
        let config = ProfilerConfig {
            period: Duration::from_millis(1),
            ..ProfilerConfig::default()
        };

        let profiler = Profiler::start(OneThread, reporter.clone(), config).unwrap();
        thread::sleep(Duration::from_millis(30));
        profiler.shutdown().unwrap();

        let totals = reporter.0.lock().unwrap();
        assert!(totals.get("cpu.trace.app.Main.main").copied().unwrap_or(0) > 0);
        assert!(totals.contains_key("cpu.stats.size"));
    }
}
