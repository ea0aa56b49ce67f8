//! Configuration and constants for the profiler.
//!
//! Gauge names and the trace prefix are part of the schema the backend
//! (and the `dump` command) expect, so they live here rather than next to
//! the code that emits them.

use super::error::ConfigError;
use std::time::Duration;

/// Namespace every trace key starts with
pub const TRACE_PREFIX: &str = "cpu.trace.";

// Diagnostic gauges emitted on every flush
pub const STATS_SIZE_GAUGE: &str = "cpu.stats.size";
pub const STATS_SIZE_IN_CHARS_GAUGE: &str = "cpu.stats.sizeInChars";

// Diagnostic gauges emitted when a tick runs out of memory
pub const OOM_SIZE_GAUGE: &str = "cpu.OOM.size";
pub const OOM_SIZE_IN_CHARS_GAUGE: &str = "cpu.OOM.sizeInChars";

/// Threads spawned by the profiler carry this name prefix and are never sampled
pub const WORKER_NAME_PREFIX: &str = "cpu-trace-profiler-";

/// Packages that are never counted: the profiler itself and the HTTP stack it reports through
pub const EXCLUDE_PACKAGES: &[&str] = &["cpu_trace_profiler", "reqwest"];

/// Nominal sampling period (100 samples per second)
pub const DEFAULT_SAMPLING_PERIOD: Duration = Duration::from_millis(10);

/// How often accumulated traces are flushed to the reporter
pub const REPORTING_PERIOD: Duration = Duration::from_secs(10);

/// Default timeout for InfluxDB HTTP requests
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_INFLUXDB_PORT: u16 = 8086;
pub const DEFAULT_METRICS_PREFIX: &str = "cpu-trace-profiler";

/// Tag mapping component that drops the matching prefix component
pub const SKIP_TAG: &str = "SKIP";

/// Sampling configuration consumed by the sampling loop and trace filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerConfig {
    /// Nominal time between two ticks
    pub period: Duration,

    /// Target time between two flushes
    pub reporting_period: Duration,

    /// If non-empty, a trace must contain one of these packages
    pub package_whitelist: Vec<String>,

    /// Traces containing any of these packages are dropped
    pub package_blacklist: Vec<String>,

    /// Upper bound on the characters held by the trace store between flushes
    pub max_trace_chars: Option<u64>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_SAMPLING_PERIOD,
            reporting_period: REPORTING_PERIOD,
            package_whitelist: Vec::new(),
            package_blacklist: Vec::new(),
            max_trace_chars: None,
        }
    }
}

impl ProfilerConfig {
    /// Number of ticks between two flushes
    pub fn reporting_frequency(&self) -> u64 {
        convert_reporting_period(self.period, self.reporting_period)
    }
}

/// Convert a reporting period into a number of sampling ticks
///
/// **Public** - used by the sampling loop at construction
///
/// Always returns at least 1 so that a reporting period shorter than the
/// sampling period flushes on every tick.
pub fn convert_reporting_period(period: Duration, reporting_period: Duration) -> u64 {
    let period_nanos = period.as_nanos().max(1);
    let ticks = reporting_period.as_nanos() / period_nanos;
    u64::try_from(ticks).unwrap_or(u64::MAX).max(1)
}

/// Parse a colon-delimited list of packages
///
/// A missing list is an empty list. Empty entries are dropped because an
/// empty substring would match every trace.
pub fn parse_package_list(packages: Option<&str>) -> Vec<String> {
    match packages {
        None => Vec::new(),
        Some(packages) => packages
            .split(':')
            .map(str::trim)
            .filter(|package| !package.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// Connection settings for the InfluxDB backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxDbConfig {
    /// Base URL, e.g. `http://localhost:8086`
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,

    /// Metric prefix, split into tags by `tag_mapping`
    pub prefix: String,

    /// Dot-separated tag names, one per prefix component
    pub tag_mapping: Option<String>,

    pub timeout: Duration,
}

/// Options passed to an embedded profiler as a single `key=value,key=value` string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentArgs {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub prefix: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub tag_mapping: Option<String>,
    pub package_whitelist: Option<String>,
    pub package_blacklist: Option<String>,
    pub max_trace_chars: Option<u64>,
}

impl AgentArgs {
    /// Parse an agent option string
    ///
    /// **Public** - entry point for embedders and the `demo` command
    ///
    /// # Errors
    /// * `ConfigError::MalformedOption` - an entry has no `=`
    /// * `ConfigError::InvalidValue` - a numeric option does not parse
    /// * `ConfigError::UnknownOption` - the key is not recognised
    pub fn parse(options: &str) -> Result<Self, ConfigError> {
        let mut args = AgentArgs::default();

        for entry in options.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedOption(entry.to_string()))?;
            let value = value.trim().to_string();

            match key.trim() {
                "server" => args.server = Some(value),
                "port" => {
                    args.port = Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "port".to_string(),
                        value: value.clone(),
                    })?)
                }
                "prefix" => args.prefix = Some(value),
                "username" => args.username = Some(value),
                "password" => args.password = Some(value),
                "database" => args.database = Some(value),
                "tagMapping" => args.tag_mapping = Some(value),
                "packageWhitelist" => args.package_whitelist = Some(value),
                "packageBlacklist" => args.package_blacklist = Some(value),
                "maxTraceChars" => {
                    args.max_trace_chars =
                        Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                            key: "maxTraceChars".to_string(),
                            value: value.clone(),
                        })?)
                }
                other => return Err(ConfigError::UnknownOption(other.to_string())),
            }
        }

        Ok(args)
    }

    /// Sampling configuration with the default periods
    pub fn profiler_config(&self) -> ProfilerConfig {
        ProfilerConfig {
            package_whitelist: parse_package_list(self.package_whitelist.as_deref()),
            package_blacklist: parse_package_list(self.package_blacklist.as_deref()),
            max_trace_chars: self.max_trace_chars,
            ..ProfilerConfig::default()
        }
    }

    /// Whether enough options were given to report to InfluxDB
    pub fn has_server(&self) -> bool {
        self.server.is_some()
    }

    /// InfluxDB connection settings
    ///
    /// # Errors
    /// * `ConfigError::MissingOption` - server, database, username or password absent
    pub fn influxdb_config(&self) -> Result<InfluxDbConfig, ConfigError> {
        let server = required(&self.server, "server")?;
        let port = self.port.unwrap_or(DEFAULT_INFLUXDB_PORT);

        let url = if server.starts_with("http://") || server.starts_with("https://") {
            format!("{}:{}", server.trim_end_matches('/'), port)
        } else {
            format!("http://{}:{}", server, port)
        };

        Ok(InfluxDbConfig {
            url,
            database: required(&self.database, "database")?,
            username: required(&self.username, "username")?,
            password: required(&self.password, "password")?,
            prefix: self
                .prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_METRICS_PREFIX.to_string()),
            tag_mapping: self.tag_mapping.clone(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        })
    }
}

fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value.clone().ok_or(ConfigError::MissingOption(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporting_frequency_default() {
        // 10 seconds of 10 ms ticks
        assert_eq!(ProfilerConfig::default().reporting_frequency(), 1000);
    }

    #[test]
    fn test_reporting_frequency_never_zero() {
        let freq = convert_reporting_period(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(freq, 1);
        let freq = convert_reporting_period(Duration::ZERO, Duration::from_millis(3));
        assert_eq!(freq, 3_000_000);
    }

    #[test]
    fn test_parse_package_list() {
        assert!(parse_package_list(None).is_empty());
        assert_eq!(
            parse_package_list(Some("com.app:org.lib::")),
            vec!["com.app".to_string(), "org.lib".to_string()]
        );
    }

    #[test]
    fn test_agent_args_parse() {
        let args = AgentArgs::parse(
            "server=influx.local,port=9086,database=profiles,username=u,password=p,\
             packageWhitelist=com.app,packageBlacklist=com.app.internal:org.noise,maxTraceChars=4096",
        )
        .unwrap();

        assert_eq!(args.server.as_deref(), Some("influx.local"));
        assert_eq!(args.port, Some(9086));

        let config = args.profiler_config();
        assert_eq!(config.package_whitelist, vec!["com.app"]);
        assert_eq!(config.package_blacklist, vec!["com.app.internal", "org.noise"]);
        assert_eq!(config.max_trace_chars, Some(4096));

        let influx = args.influxdb_config().unwrap();
        assert_eq!(influx.url, "http://influx.local:9086");
        assert_eq!(influx.prefix, DEFAULT_METRICS_PREFIX);
    }

    #[test]
    fn test_agent_args_errors() {
        assert!(matches!(
            AgentArgs::parse("server"),
            Err(ConfigError::MalformedOption(_))
        ));
        assert!(matches!(
            AgentArgs::parse("port=abc"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AgentArgs::parse("colour=blue"),
            Err(ConfigError::UnknownOption(_))
        ));

        let args = AgentArgs::parse("server=localhost").unwrap();
        assert!(matches!(
            args.influxdb_config(),
            Err(ConfigError::MissingOption("database"))
        ));
    }
}
