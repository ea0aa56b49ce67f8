//! Aggregation table for sampled traces.
//!
//! Counts accumulate per trace key until the next [`TraceStore::drain`],
//! which hands the whole table to the caller and starts a fresh one. Depth
//! bounds survive drains: they describe every key seen since the store was
//! created and are reported once at shutdown.

use crate::utils::config::TRACE_PREFIX;
use crate::utils::error::StoreError;
use std::collections::HashMap;

/// Smallest and largest number of key components seen so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthBounds {
    pub min: usize,
    pub max: usize,
}

/// Trace key → sample count, owned by the sampling worker
#[derive(Debug, Default)]
pub struct TraceStore {
    traces: HashMap<String, u64>,
    size_in_chars: u64,
    bounds: Option<DepthBounds>,
    max_chars: Option<u64>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses new keys once held keys would exceed `max_chars` characters
    ///
    /// Hitting the budget is reported as exhaustion, exactly like a failed
    /// allocation, so the sampling loop sheds the table early.
    pub fn with_char_budget(max_chars: u64) -> Self {
        Self {
            max_chars: Some(max_chars),
            ..Self::default()
        }
    }

    /// Add `inc` samples to a trace
    ///
    /// **Public** - called for every accepted sample
    ///
    /// # Panics
    /// If `trace_key` does not start with `cpu.trace.`. That can only happen
    /// when the formatter contract is broken, so it is a bug, not an
    /// environmental failure. The store is untouched when this fires.
    ///
    /// # Errors
    /// `StoreError` when memory for a new key cannot be obtained. The store is
    /// unchanged in that case.
    pub fn increment(&mut self, trace_key: &str, inc: u64) -> Result<(), StoreError> {
        assert!(
            trace_key.starts_with(TRACE_PREFIX),
            "trace key {:?} does not start with {:?}",
            trace_key,
            TRACE_PREFIX
        );

        if let Some(count) = self.traces.get_mut(trace_key) {
            *count = count.saturating_add(inc);
        } else {
            let chars = trace_key.chars().count() as u64;
            if let Some(limit) = self.max_chars {
                if self.size_in_chars + chars > limit {
                    return Err(StoreError::BudgetExceeded { limit });
                }
            }

            self.traces.try_reserve(1)?;
            let mut owned = String::new();
            owned.try_reserve_exact(trace_key.len())?;
            owned.push_str(trace_key);

            self.traces.insert(owned, inc);
            self.size_in_chars += chars;
        }

        self.update_bounds(trace_depth(trace_key));
        Ok(())
    }

    /// Take every count accumulated since the previous drain
    ///
    /// **Public** - the only way counts leave the store
    pub fn drain(&mut self) -> HashMap<String, u64> {
        self.size_in_chars = 0;
        std::mem::take(&mut self.traces)
    }

    /// Number of distinct traces held
    pub fn size(&self) -> usize {
        self.traces.len()
    }

    /// Total characters of all held keys
    pub fn size_in_chars(&self) -> u64 {
        self.size_in_chars
    }

    /// Depth bounds since creation, `None` before the first increment
    pub fn bounds(&self) -> Option<DepthBounds> {
        self.bounds
    }

    /// Read a single count without draining
    pub fn get(&self, trace_key: &str) -> Option<u64> {
        self.traces.get(trace_key).copied()
    }

    fn update_bounds(&mut self, depth: usize) {
        self.bounds = Some(match self.bounds {
            None => DepthBounds {
                min: depth,
                max: depth,
            },
            Some(b) => DepthBounds {
                min: b.min.min(depth),
                max: b.max.max(depth),
            },
        });
    }
}

/// Number of `.`-separated components after the trace prefix
///
/// `cpu.trace.a.b` has depth 2.
pub fn trace_depth(trace_key: &str) -> usize {
    let separators = trace_key.bytes().filter(|&b| b == b'.').count();
    let prefix_separators = TRACE_PREFIX.bytes().filter(|&b| b == b'.').count();
    // the prefix ends with a separator, so components = separators - prefix separators + 1
    (separators + 1).saturating_sub(prefix_separators)
}
