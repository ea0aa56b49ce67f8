//! cpu-trace-profiler
//!
//! In-process sampling CPU profiler. A background worker periodically
//! snapshots the stacks of runnable threads, aggregates identical stacks into
//! counts keyed by `cpu.trace.<frames>` and flushes those counts to a
//! [`reporter::Reporter`] as gauge values.
//!
//! ## Getting Started
//!
//! ```ignore
//! use cpu_trace_profiler::reporter::FoldedFileReporter;
//! use cpu_trace_profiler::sampler::{enter, Profiler, RegistrySource};
//! use cpu_trace_profiler::utils::config::ProfilerConfig;
//!
//! let profiler = Profiler::start(
//!     RegistrySource::new(),
//!     FoldedFileReporter::new("profile.folded"),
//!     ProfilerConfig::default(),
//! )?;
//!
//! {
//!     let _frame = enter("app.Server", "handle");
//!     // ... work ...
//! }
//!
//! profiler.shutdown()?;
//! ```
//!
//! The `cpu-trace-profiler` binary wraps the same library:
//!
//! ```bash
//! cpu-trace-profiler demo --duration 5 --flamegraph demo.svg
//! cpu-trace-profiler render demo.folded --tree
//! ```

pub mod aggregator;
pub mod commands;
pub mod flamegraph;
pub mod influxdb;
pub mod output;
pub mod reporter;
pub mod sampler;
pub mod utils;
