//! One sampling tick and the flush schedule around it.
//!
//! Each tick:
//! 1. Asks the stack source for every runnable thread (minus our own workers)
//! 2. Formats each non-empty stack into a trace key
//! 3. Counts the keys the filter accepts, one per sample
//! 4. Every `reporting_frequency` ticks, drains the store into the reporter
//!
//! Samples are counted raw rather than scaled by the sampling period: under
//! load the achieved rate drifts from the nominal one, and raw counts keep
//! relative CPU share correct whatever rate was achieved.

use super::filter::TraceFilter;
use super::formatter::format_stack_trace;
use super::source::{StackSource, ThreadState};
use super::store::TraceStore;
use crate::reporter::Reporter;
use crate::utils::config::{
    ProfilerConfig, OOM_SIZE_GAUGE, OOM_SIZE_IN_CHARS_GAUGE, STATS_SIZE_GAUGE,
    STATS_SIZE_IN_CHARS_GAUGE, TRACE_PREFIX, WORKER_NAME_PREFIX,
};
use crate::utils::error::SampleError;
use log::{debug, error, warn};

/// Whether a thread belongs to the profiler itself
pub fn is_profiler_thread(thread_name: &str) -> bool {
    thread_name.starts_with(WORKER_NAME_PREFIX)
}

/// Sampling state machine: store, filter and flush schedule
pub struct SamplingLoop<S, R> {
    source: S,
    reporter: R,
    filter: TraceFilter,
    traces: TraceStore,
    profile_count: u64,
    reporting_frequency: u64,
}

impl<S: StackSource, R: Reporter> SamplingLoop<S, R> {
    /// Create a sampling loop
    ///
    /// **Public** - used by the background worker and by embedders driving ticks themselves
    ///
    /// # Arguments
    /// * `source` - Where thread stacks come from
    /// * `reporter` - Where flushed traces and gauges go
    /// * `config` - Periods, package lists and optional store budget
    pub fn new(source: S, reporter: R, config: &ProfilerConfig) -> Self {
        let traces = match config.max_trace_chars {
            Some(limit) => TraceStore::with_char_budget(limit),
            None => TraceStore::new(),
        };

        Self {
            source,
            reporter,
            filter: TraceFilter::from_config(config),
            traces,
            profile_count: 0,
            reporting_frequency: config.reporting_frequency(),
        }
    }

    /// Run one tick
    ///
    /// **Public** - called once per sampling period
    ///
    /// Never panics on sampling failures. Memory exhaustion aborts the rest
    /// of the tick and forces a flush; the regular flush schedule is kept.
    pub fn tick(&mut self) {
        self.profile_count += 1;

        if let Err(err) = self.sample_threads() {
            if err.is_exhaustion() {
                self.handle_exhaustion(&err);
            } else {
                warn!("Skipping sample: {}", err);
            }
        }

        if self.profile_count >= self.reporting_frequency {
            self.profile_count = 0;
            self.record_method_counts();
        }
    }

    /// Final flush on shutdown
    ///
    /// **Public** - called exactly once, after the last tick
    ///
    /// Besides flushing, records the depth bounds as `cpu.trace.<min>` and
    /// `cpu.trace.<max>` (the value is part of the gauge name so the key-space
    /// shape is visible without scanning every trace) and closes the reporter.
    pub fn shutdown(&mut self) {
        self.record_method_counts();

        if let Some(bounds) = self.traces.bounds() {
            self.record_gauge_value(&format!("{}{}", TRACE_PREFIX, bounds.min), bounds.min as u64);
            self.record_gauge_value(&format!("{}{}", TRACE_PREFIX, bounds.max), bounds.max as u64);
        }

        self.record_gauge_value(STATS_SIZE_GAUGE, self.traces.size() as u64);
        self.record_gauge_value(STATS_SIZE_IN_CHARS_GAUGE, self.traces.size_in_chars());

        if let Err(err) = self.reporter.close() {
            warn!("Failed to close reporter: {}", err);
        }
    }

    /// Ticks since the last scheduled flush
    pub fn profile_count(&self) -> u64 {
        self.profile_count
    }

    pub fn reporting_frequency(&self) -> u64 {
        self.reporting_frequency
    }

    pub fn traces(&self) -> &TraceStore {
        &self.traces
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn sample_threads(&mut self) -> Result<(), SampleError> {
        let threads = self
            .source
            .threads_in_state(ThreadState::Runnable, &is_profiler_thread)?;

        for thread in &threads {
            // certain threads do not publish a stack
            let Some(trace_key) = format_stack_trace(&thread.frames)? else {
                continue;
            };

            if self.filter.include_stack_trace(&trace_key) {
                self.traces.increment(&trace_key, 1)?;
            }
        }

        Ok(())
    }

    fn handle_exhaustion(&mut self, err: &SampleError) {
        let size = self.traces.size() as u64;
        let size_in_chars = self.traces.size_in_chars();

        self.record_gauge_value(OOM_SIZE_GAUGE, size);
        self.record_gauge_value(OOM_SIZE_IN_CHARS_GAUGE, size_in_chars);
        error!(
            "CPU profiler out of memory: size={}, sizeInChars={}: {}",
            size, size_in_chars, err
        );

        // flush what we have so the next tick starts from an empty table
        self.record_method_counts();
    }

    /// Report store gauges, then drain and report the traces
    fn record_method_counts(&mut self) {
        self.record_gauge_value(STATS_SIZE_GAUGE, self.traces.size() as u64);
        self.record_gauge_value(STATS_SIZE_IN_CHARS_GAUGE, self.traces.size_in_chars());

        let traces = self.traces.drain();
        if traces.is_empty() {
            return;
        }

        debug!("Flushing {} traces", traces.len());
        if let Err(err) = self.reporter.record_gauge_values(&traces) {
            warn!("Failed to report {} traces: {}", traces.len(), err);
        }
    }

    fn record_gauge_value(&mut self, key: &str, value: u64) {
        if let Err(err) = self.reporter.record_gauge_value(key, value) {
            warn!("Failed to report gauge {}: {}", key, err);
        }
    }
}
