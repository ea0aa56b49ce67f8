//! Destinations for flushed traces and gauges.
//!
//! The sampling loop only knows the [`Reporter`] trait. Two backends ship:
//! - [`InfluxDbReporter`] writes points to InfluxDB over HTTP
//! - [`FoldedFileReporter`] accumulates traces and writes a folded file on close

pub mod folded;
pub mod influxdb;

use crate::utils::error::ReportError;
use std::collections::HashMap;

pub use folded::FoldedFileReporter;
pub use influxdb::InfluxDbReporter;

/// Sink for gauge values produced by the sampling loop
pub trait Reporter {
    /// Record a single gauge
    fn record_gauge_value(&mut self, key: &str, value: u64) -> Result<(), ReportError> {
        let mut gauges = HashMap::with_capacity(1);
        gauges.insert(key.to_string(), value);
        self.record_gauge_values(&gauges)
    }

    /// Record a batch of gauges sharing one timestamp
    fn record_gauge_values(&mut self, gauges: &HashMap<String, u64>) -> Result<(), ReportError>;

    /// Called once after the final flush
    fn close(&mut self) -> Result<(), ReportError> {
        Ok(())
    }
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn record_gauge_value(&mut self, key: &str, value: u64) -> Result<(), ReportError> {
        (**self).record_gauge_value(key, value)
    }

    fn record_gauge_values(&mut self, gauges: &HashMap<String, u64>) -> Result<(), ReportError> {
        (**self).record_gauge_values(gauges)
    }

    fn close(&mut self) -> Result<(), ReportError> {
        (**self).close()
    }
}
