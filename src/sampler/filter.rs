//! Package include/exclude rules for trace keys.

use super::formatter::sanitize_component;
use crate::utils::config::{ProfilerConfig, EXCLUDE_PACKAGES, TRACE_PREFIX};

/// Decides whether a formatted trace key is counted
///
/// The blacklist always contains [`EXCLUDE_PACKAGES`] so the profiler never
/// counts its own reporting machinery. Immutable once built.
#[derive(Debug, Clone)]
pub struct TraceFilter {
    whitelist: Vec<String>,
    blacklist: Vec<String>,
}

impl TraceFilter {
    /// Build a filter from user package lists
    ///
    /// Package names are normalized the same way trace keys are, so
    /// `my_crate::db` and `my_crate.db` are equivalent.
    pub fn new(whitelist: &[String], blacklist: &[String]) -> Self {
        let whitelist = whitelist.iter().map(|p| sanitize_component(p)).collect();
        let blacklist = EXCLUDE_PACKAGES
            .iter()
            .copied()
            .chain(blacklist.iter().map(String::as_str))
            .map(sanitize_component)
            .collect();

        Self {
            whitelist,
            blacklist,
        }
    }

    pub fn from_config(config: &ProfilerConfig) -> Self {
        Self::new(&config.package_whitelist, &config.package_blacklist)
    }

    /// Whether a trace should be counted
    ///
    /// **Public** - called once per sampled thread
    ///
    /// # Algorithm
    /// 1. With a non-empty whitelist, the key must contain one of its entries
    /// 2. A key containing any blacklist entry is rejected
    /// 3. Anything else is accepted
    ///
    /// A key matching both lists is rejected. Only the frames are matched,
    /// never the `cpu.trace.` prefix itself.
    pub fn include_stack_trace(&self, trace_key: &str) -> bool {
        let frames = trace_key.strip_prefix(TRACE_PREFIX).unwrap_or(trace_key);

        if !self.whitelist.is_empty() && !self.whitelist.iter().any(|p| frames.contains(p.as_str())) {
            return false;
        }

        !self.blacklist.iter().any(|p| frames.contains(p.as_str()))
    }

    pub fn whitelist(&self) -> &[String] {
        &self.whitelist
    }

    /// User blacklist merged with the built-in exclusions
    pub fn blacklist(&self) -> &[String] {
        &self.blacklist
    }
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self::new(&[], &[])
    }
}
