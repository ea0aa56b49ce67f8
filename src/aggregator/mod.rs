//! Aggregation of trace counts into collapsed stacks.
//!
//! This module transforms trace keys into:
//! - Collapsed stack format (for flamegraph generation and folded files)
//! - Filtered stack sets (exclusion lists from the dump/render tools)

pub mod stack_builder;

// Re-export main types and functions
pub use stack_builder::{
    build_collapsed_stacks, build_collapsed_stacks_with, exclude_matching, is_bound_gauge,
    parse_collapsed_line, sort_stacks, trace_key_to_stack, trace_key_to_stack_with,
    CollapsedStack, LineNumberMode,
};
