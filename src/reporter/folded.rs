//! Reporter writing a folded stack file (and optionally an SVG) on close.

use super::Reporter;
use crate::aggregator::stack_builder::{build_collapsed_stacks, trace_key_to_stack};
use crate::flamegraph::{generate_flamegraph, FlamegraphConfig};
use crate::output::{write_folded, write_svg};
use crate::utils::error::ReportError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;

/// Accumulates trace counts across flushes; everything else is only logged
pub struct FoldedFileReporter {
    output: PathBuf,
    flamegraph: Option<(PathBuf, FlamegraphConfig)>,
    traces: HashMap<String, u64>,
}

impl FoldedFileReporter {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            flamegraph: None,
            traces: HashMap::new(),
        }
    }

    /// Also render an SVG flamegraph on close
    pub fn with_flamegraph(mut self, path: impl Into<PathBuf>, config: FlamegraphConfig) -> Self {
        self.flamegraph = Some((path.into(), config));
        self
    }

    /// Traces accumulated so far
    pub fn traces(&self) -> &HashMap<String, u64> {
        &self.traces
    }
}

impl Reporter for FoldedFileReporter {
    fn record_gauge_values(&mut self, gauges: &HashMap<String, u64>) -> Result<(), ReportError> {
        for (key, value) in gauges {
            if trace_key_to_stack(key).is_some() {
                *self.traces.entry(key.clone()).or_insert(0) += value;
            } else {
                debug!("{} = {}", key, value);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ReportError> {
        let stacks = build_collapsed_stacks(self.traces.iter().map(|(k, v)| (k.as_str(), *v)));
        info!("Writing {} unique stacks", stacks.len());

        write_folded(&stacks, &self.output)?;

        if let Some((path, config)) = &self.flamegraph {
            if stacks.is_empty() {
                warn!("No stacks sampled, skipping flamegraph {}", path.display());
            } else {
                let svg = generate_flamegraph(&stacks, Some(config))?;
                write_svg(&svg, path)?;
            }
        }

        Ok(())
    }
}
