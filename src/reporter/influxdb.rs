//! Reporter writing gauges to InfluxDB.

use super::Reporter;
use crate::influxdb::line_protocol::format_point;
use crate::influxdb::tags::{prefix_tags, process_tags};
use crate::influxdb::InfluxDbClient;
use crate::utils::config::InfluxDbConfig;
use crate::utils::error::ReportError;
use chrono::Utc;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

/// Writes every batch as line-protocol points tagged with prefix and process tags
pub struct InfluxDbReporter {
    client: InfluxDbClient,
    tags: BTreeMap<String, String>,
}

impl InfluxDbReporter {
    /// Create a reporter for the given connection settings
    ///
    /// # Errors
    /// * `ReportError::Config` - tag mapping does not fit the prefix
    /// * `ReportError::RequestFailed` - HTTP client could not be built
    pub fn new(config: &InfluxDbConfig) -> Result<Self, ReportError> {
        let mut tags = prefix_tags(&config.prefix, config.tag_mapping.as_deref())?;
        tags.extend(process_tags());

        info!("Reporting to InfluxDB at {} (database {})", config.url, config.database);
        debug!("Point tags: {:?}", tags);

        Ok(Self {
            client: InfluxDbClient::new(config)?,
            tags,
        })
    }

    /// Tags attached to every point
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }
}

/// Encode a batch as a line-protocol body, one line per gauge in key order
pub fn encode_batch(
    gauges: &HashMap<String, u64>,
    tags: &BTreeMap<String, String>,
    timestamp_ms: i64,
) -> String {
    let mut keys: Vec<&String> = gauges.keys().collect();
    keys.sort();

    keys.into_iter()
        .map(|key| format_point(key, tags, gauges[key], timestamp_ms))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Reporter for InfluxDbReporter {
    fn record_gauge_values(&mut self, gauges: &HashMap<String, u64>) -> Result<(), ReportError> {
        if gauges.is_empty() {
            return Ok(());
        }

        let body = encode_batch(gauges, &self.tags, Utc::now().timestamp_millis());
        self.client.write_lines(body)?;

        debug!("Wrote {} points", gauges.len());
        Ok(())
    }
}
