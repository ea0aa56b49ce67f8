//! Dump command implementation.
//!
//! The dump command:
//! 1. Finds every process and host that reported under the prefix tags
//! 2. Plans one profile per process, one per host and one for everything
//! 3. For each profile, sums the trace series into collapsed stacks
//! 4. Writes one folded file per profile (and optionally an SVG beside it)
//!
//! Files are named after the first `cpu.stats.size` point of the profile,
//! e.g. `process_20231114_221320_web-1_4242.folded`.

use crate::aggregator::{build_collapsed_stacks_with, exclude_matching, is_bound_gauge, LineNumberMode};
use crate::flamegraph::{generate_flamegraph, FlamegraphConfig};
use crate::influxdb::tags::prefix_tags;
use crate::influxdb::{InfluxDbClient, QueryClient, QueryResponse};
use crate::output::{read_filter_file, write_folded, write_svg};
use crate::utils::config::{InfluxDbConfig, STATS_SIZE_GAUGE};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Instant;

const PROCESS_TAG: &str = "processName";
const HOST_TAG: &str = "host";

/// Arguments for the dump command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct DumpArgs {
    /// InfluxDB connection and prefix settings
    pub influx: InfluxDbConfig,

    /// File listing substrings; stacks containing any of them are dropped
    pub filter_file: Option<PathBuf>,

    /// Directory receiving one folded file per profile
    pub output_dir: PathBuf,

    /// How frame line numbers appear in the folded files
    pub line_numbers: LineNumberMode,

    /// Also write an SVG flamegraph next to every folded file
    pub flamegraphs: bool,

    /// Flamegraph configuration
    pub flamegraph_config: Option<FlamegraphConfig>,
}

/// Which slice of the stored traces a profile covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileScope {
    /// One process, identified by its `pid@host` name
    Process(String),
    /// Every process on one host
    Host(String),
    /// Everything reported under the prefix
    All,
}

/// One output file to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpTarget {
    pub scope: ProfileScope,

    /// Prefix tags plus the scope's own tag
    pub tags: BTreeMap<String, String>,
}

/// Execute the dump command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Tag mapping does not fit the prefix
/// * InfluxDB connection or query failures
/// * File read/write errors
pub fn execute_dump(args: DumpArgs) -> Result<()> {
    let start_time = Instant::now();

    info!("Connecting to {} (database {})...", args.influx.url, args.influx.database);
    let client = InfluxDbClient::new(&args.influx).context("Failed to create InfluxDB client")?;

    let written = dump_profiles(&client, &args)?;

    info!(
        "Dump completed in {:.2}s: {} files in {}",
        start_time.elapsed().as_secs_f64(),
        written.len(),
        args.output_dir.display()
    );

    Ok(())
}

/// Run the whole dump against any query client
///
/// **Public** - lets callers supply their own [`QueryClient`]
///
/// # Returns
/// Paths of the folded files written
///
/// # Errors
/// * Tag mapping does not fit the prefix
/// * Query failures
/// * File read/write errors
pub fn dump_profiles<Q: QueryClient>(client: &Q, args: &DumpArgs) -> Result<Vec<PathBuf>> {
    let tags = prefix_tags(&args.influx.prefix, args.influx.tag_mapping.as_deref())
        .context("Invalid tag mapping")?;

    let patterns = match &args.filter_file {
        Some(path) => read_filter_file(path).context("Failed to read filter file")?,
        None => Vec::new(),
    };

    // Step 1: Discover
    info!("Step 1/4: Listing processes and hosts...");
    let processes = tag_values(client, PROCESS_TAG, &tags)?;
    let hosts = tag_values(client, HOST_TAG, &tags)?;
    debug!("Found processes {:?} on hosts {:?}", processes, hosts);

    // Step 2: Plan
    let targets = plan_targets(&processes, &hosts, &tags);
    info!("Step 2/4: Planned {} profiles", targets.len());

    // Step 3: Query and aggregate
    info!("Step 3/4: Querying traces...");
    let mut written = Vec::new();
    for target in &targets {
        let Some(started) = first_report_time(client, &target.tags)? else {
            warn!("No {} points for {:?}, skipping", STATS_SIZE_GAUGE, target.scope);
            continue;
        };

        let path = args.output_dir.join(dump_file_name(&target.scope, started));
        let response = client
            .query(&build_trace_query(&target.tags))
            .with_context(|| format!("Failed to query traces for {:?}", target.scope))?;

        let traces = sum_trace_series(&response);
        if traces.is_empty() {
            warn!("No traces for {:?}", target.scope);
        }
        let stacks = exclude_matching(build_collapsed_stacks_with(traces, args.line_numbers), &patterns);

        write_folded(&stacks, &path).context("Failed to write folded stacks")?;
        info!("✓ {:?}: {} stacks written to {}", target.scope, stacks.len(), path.display());

        if args.flamegraphs && !stacks.is_empty() {
            let svg_path = path.with_extension("svg");
            let svg = generate_flamegraph(&stacks, args.flamegraph_config.as_ref())
                .context("Failed to generate flamegraph")?;
            write_svg(&svg, &svg_path).context("Failed to write flamegraph SVG")?;
        }

        written.push(path);
    }

    // Step 4: Report
    info!("Step 4/4: Wrote {} of {} profiles", written.len(), targets.len());

    Ok(written)
}

/// One profile per process, one per host, then one for everything
pub fn plan_targets(
    processes: &[String],
    hosts: &[String],
    base_tags: &BTreeMap<String, String>,
) -> Vec<DumpTarget> {
    let scoped = |scope: ProfileScope, tag: &str, value: &str| {
        let mut tags = base_tags.clone();
        tags.insert(tag.to_string(), value.to_string());
        DumpTarget { scope, tags }
    };

    let mut targets: Vec<DumpTarget> = processes
        .iter()
        .map(|p| scoped(ProfileScope::Process(p.clone()), PROCESS_TAG, p))
        .collect();
    targets.extend(hosts.iter().map(|h| scoped(ProfileScope::Host(h.clone()), HOST_TAG, h)));
    targets.push(DumpTarget {
        scope: ProfileScope::All,
        tags: base_tags.clone(),
    });

    targets
}

/// File name for a profile whose first report was at `started_ms`
///
/// A process name without `@` is treated as a pid on an unknown host.
pub fn dump_file_name(scope: &ProfileScope, started_ms: i64) -> String {
    let date = format_start_time(started_ms);

    match scope {
        ProfileScope::Process(name) => {
            let (pid, host) = name.split_once('@').unwrap_or((name.as_str(), "unknown"));
            format!(
                "process_{}_{}_{}.folded",
                date,
                sanitize_file_component(host),
                sanitize_file_component(pid)
            )
        }
        ProfileScope::Host(host) => format!("host_{}_{}.folded", date, sanitize_file_component(host)),
        ProfileScope::All => format!("all_{}.folded", date),
    }
}

/// `YYYYmmdd_HHMMSS` in UTC; out-of-range timestamps fall back to the raw number
fn format_start_time(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y%m%d_%H%M%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Keep `[A-Za-z0-9_.-]`, collapse every other run of characters into one `_`
fn sanitize_file_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut replacing = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            out.push(c);
            replacing = false;
        } else if !replacing {
            out.push('_');
            replacing = true;
        }
    }

    out
}

/// ` WHERE "k" = 'v' AND ...`, or nothing for no tags
fn where_clause(tags: &BTreeMap<String, String>) -> String {
    if tags.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = tags
        .iter()
        .map(|(key, value)| format!("\"{}\" = '{}'", key.replace('"', "\\\""), value.replace('\'', "\\'")))
        .collect();
    format!(" WHERE {}", clauses.join(" AND "))
}

/// InfluxQL selecting every trace series restricted to the given tags
pub fn build_trace_query(tags: &BTreeMap<String, String>) -> String {
    format!(r"SELECT value FROM /^cpu\.trace\./{}", where_clause(tags))
}

/// InfluxQL listing the values of `key` among points matching `tags`
pub fn build_tag_values_query(key: &str, tags: &BTreeMap<String, String>) -> String {
    format!(
        "SHOW TAG VALUES FROM \"{}\" WITH KEY = \"{}\"{}",
        STATS_SIZE_GAUGE,
        key,
        where_clause(tags)
    )
}

/// InfluxQL fetching the earliest stats point matching `tags`
pub fn build_start_query(tags: &BTreeMap<String, String>) -> String {
    format!("SELECT value FROM \"{}\"{} LIMIT 1", STATS_SIZE_GAUGE, where_clause(tags))
}

fn tag_values<Q: QueryClient>(client: &Q, key: &str, tags: &BTreeMap<String, String>) -> Result<Vec<String>> {
    let response = client
        .query(&build_tag_values_query(key, tags))
        .with_context(|| format!("Failed to list {} values", key))?;

    let mut values: Vec<String> = response.series().flat_map(|s| s.column_strings("value")).collect();
    values.sort();
    values.dedup();
    Ok(values)
}

fn first_report_time<Q: QueryClient>(client: &Q, tags: &BTreeMap<String, String>) -> Result<Option<i64>> {
    let response = client
        .query(&build_start_query(tags))
        .context("Failed to query profile start time")?;
    let first = response.series().find_map(|s| s.first_time());
    Ok(first)
}

/// Total `value` per trace series; depth-bound gauges are skipped
pub fn sum_trace_series(response: &QueryResponse) -> HashMap<String, u64> {
    let mut traces = HashMap::new();

    for series in response.series() {
        if is_bound_gauge(&series.name) {
            continue;
        }
        *traces.entry(series.name.clone()).or_insert(0) += series.sum_column("value");
    }

    traces
}

/// Validate dump arguments
///
/// **Public** - can be called before execute_dump for early validation
pub fn validate_args(args: &DumpArgs) -> Result<()> {
    if !args.influx.url.starts_with("http://") && !args.influx.url.starts_with("https://") {
        anyhow::bail!("InfluxDB URL must start with http:// or https://");
    }

    if args.influx.database.is_empty() {
        anyhow::bail!("Database cannot be empty");
    }

    if args.influx.prefix.is_empty() {
        anyhow::bail!("Prefix cannot be empty");
    }

    if let Some(filter) = &args.filter_file {
        if !filter.is_file() {
            anyhow::bail!("Filter file not found: {}", filter.display());
        }
    }

    if args.output_dir.is_file() {
        anyhow::bail!("Output directory is a file: {}", args.output_dir.display());
    }

    Ok(())
}
