//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use std::collections::TryReserveError;
use thiserror::Error;

/// Errors that can occur while taking thread snapshots during a tick
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("Allocation failed while capturing stacks: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("Trace store is full: {0}")]
    Store(#[from] StoreError),

    #[error("Stack source unavailable: {0}")]
    Unavailable(String),
}

impl SampleError {
    /// Whether the tick failed because memory ran out
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, SampleError::Allocation(_) | SampleError::Store(_))
    }
}

/// Errors that can occur when adding a sample to the trace store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("Trace budget of {limit} characters exceeded")]
    BudgetExceeded { limit: u64 },
}

/// Errors that can occur while delivering gauges to a backend
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Backend rejected write (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to write output: {0}")]
    Output(#[from] OutputError),

    #[error("Failed to render flamegraph: {0}")]
    Flamegraph(#[from] FlamegraphError),

    #[error("Invalid reporter configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur while reading profiler options
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Malformed option (expected key=value): {0}")]
    MalformedOption(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Missing required option: {0}")]
    MissingOption(&'static str),

    #[error("Tag mapping {mapping} does not match the components of prefix {prefix}")]
    TagMappingMismatch { mapping: String, prefix: String },
}

/// Errors that can occur while reading traces back from InfluxDB
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// Errors raised by the background sampling worker
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Failed to spawn sampling worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Sampling worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Errors that can occur during flamegraph generation
#[derive(Error, Debug)]
pub enum FlamegraphError {
    #[error("Empty stack data")]
    EmptyStacks,

    #[error("Flamegraph rendering failed: {0}")]
    Render(String),

    #[error("Flamegraph is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),

    #[error("Malformed folded stack at line {line}: {content}")]
    MalformedLine { line: usize, content: String },
}
