//! Stack sampling and trace aggregation.
//!
//! This module turns periodic thread snapshots into counted trace keys:
//! - Formatting stacks into metric-safe keys
//! - Include/exclude package filtering
//! - Per-key aggregation with depth bounds
//! - The tick/flush state machine and its background worker

pub mod filter;
pub mod formatter;
pub mod registry;
pub mod sampling_loop;
pub mod source;
pub mod store;
pub mod worker;

// Re-export main types and functions
pub use filter::TraceFilter;
pub use formatter::format_stack_trace;
pub use registry::{blocking, enter, enter_at, RegistrySource};
pub use sampling_loop::{is_profiler_thread, SamplingLoop};
pub use source::{Frame, StackSource, ThreadSnapshot, ThreadState};
pub use store::{DepthBounds, TraceStore};
pub use worker::Profiler;
