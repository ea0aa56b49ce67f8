//! cpu-trace-profiler CLI
//!
//! Runs an instrumented demo workload under the sampling profiler, dumps
//! profiles stored in InfluxDB to folded files, and renders folded files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cpu_trace_profiler::commands::{
    demo, dump, execute_demo, execute_dump, execute_render, render, DemoArgs, DumpArgs, RenderArgs,
};
use cpu_trace_profiler::aggregator::LineNumberMode;
use cpu_trace_profiler::flamegraph::FlamegraphConfig;
use cpu_trace_profiler::utils::config::{AgentArgs, TRACE_PREFIX};
use env_logger::Env;
use std::path::PathBuf;
use std::time::Duration;

/// cpu-trace-profiler - sampling CPU profiler reporting stack traces as metrics
#[derive(Parser, Debug)]
#[command(name = "cpu-trace-profiler")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Profile a built-in instrumented workload
    Demo {
        /// How long to profile, in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Number of workload threads
        #[arg(long, default_value = "4")]
        threads: usize,

        /// Sampling period in milliseconds
        #[arg(long, default_value = "10")]
        period_ms: u64,

        /// Flush period in milliseconds
        #[arg(long, default_value = "1000")]
        reporting_period_ms: u64,

        /// Agent options, e.g. server=localhost,database=profiler,username=u,password=p
        #[arg(short, long, env = "CPU_TRACE_PROFILER_AGENT")]
        agent: Option<String>,

        /// Folded output path (used when the agent options name no server)
        #[arg(short, long, default_value = "demo.folded")]
        output: PathBuf,

        /// Output path for SVG flamegraph (optional)
        #[arg(short, long)]
        flamegraph: Option<PathBuf>,

        /// Flamegraph title
        #[arg(long)]
        title: Option<String>,

        /// Flamegraph width in pixels
        #[arg(long, default_value = "1200")]
        width: usize,
    },

    /// Dump traces stored in InfluxDB to folded files, one per process, one per host and one for all
    Dump {
        /// InfluxDB host name
        #[arg(short = 's', long)]
        server: String,

        /// InfluxDB HTTP port
        #[arg(short = 'r', long, default_value = "8086")]
        port: u16,

        /// InfluxDB user name
        #[arg(short, long)]
        username: String,

        /// InfluxDB password
        #[arg(short, long, env = "INFLUXDB_PASSWORD", hide_env_values = true)]
        password: String,

        /// Database containing profiler data
        #[arg(short, long)]
        database: String,

        /// Metric prefix the profiler reported with
        #[arg(short = 'e', long)]
        prefix: String,

        /// Tag mapping for the metric prefix
        #[arg(short, long)]
        tag_mapping: Option<String>,

        /// File listing substrings to exclude, one per line
        #[arg(long)]
        filter: Option<PathBuf>,

        /// Directory receiving the folded files
        #[arg(short = 'x', long, default_value = "profiles")]
        output_dir: PathBuf,

        /// Line numbers in frames: keep, name-first, line-first or strip
        #[arg(short = 'l', long, default_value = "keep")]
        line_numbers: LineNumberMode,

        /// Also write an SVG flamegraph next to every folded file
        #[arg(short, long)]
        flamegraph: bool,

        /// Flamegraph title
        #[arg(long)]
        title: Option<String>,

        /// Flamegraph width in pixels
        #[arg(long, default_value = "1200")]
        width: usize,
    },

    /// Render a folded file as a flamegraph or call tree
    Render {
        /// Folded stack file
        input: PathBuf,

        /// File listing substrings to exclude, one per line
        #[arg(long)]
        filter: Option<PathBuf>,

        /// Keep only stacks matching this regular expression at their start
        #[arg(short, long)]
        pattern: Option<String>,

        /// Output path for SVG flamegraph
        #[arg(short, long)]
        flamegraph: Option<PathBuf>,

        /// Flamegraph title
        #[arg(long)]
        title: Option<String>,

        /// Flamegraph width in pixels
        #[arg(long, default_value = "1200")]
        width: usize,

        /// Print an indented call tree
        #[arg(long)]
        tree: bool,

        /// Spaces per call tree level
        #[arg(long, default_value = "1")]
        indent: usize,

        /// Print the heaviest stacks
        #[arg(long)]
        summary: bool,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Demo {
            duration,
            threads,
            period_ms,
            reporting_period_ms,
            agent,
            output,
            flamegraph,
            title,
            width,
        } => {
            let args = DemoArgs {
                duration: Duration::from_secs(duration),
                threads,
                period: Duration::from_millis(period_ms),
                reporting_period: Duration::from_millis(reporting_period_ms),
                agent,
                output,
                flamegraph_config: flamegraph_config(flamegraph.is_some(), title, width),
                output_svg: flamegraph,
            };

            demo::validate_args(&args)?;
            execute_demo(args)?;
        }

        Commands::Dump {
            server,
            port,
            username,
            password,
            database,
            prefix,
            tag_mapping,
            filter,
            output_dir,
            line_numbers,
            flamegraph,
            title,
            width,
        } => {
            let connection = AgentArgs {
                server: Some(server),
                port: Some(port),
                prefix: Some(prefix),
                username: Some(username),
                password: Some(password),
                database: Some(database),
                tag_mapping,
                ..Default::default()
            };

            let args = DumpArgs {
                influx: connection
                    .influxdb_config()
                    .context("Incomplete InfluxDB options")?,
                filter_file: filter,
                output_dir,
                line_numbers,
                flamegraphs: flamegraph,
                flamegraph_config: flamegraph_config(flamegraph, title, width),
            };

            dump::validate_args(&args)?;
            execute_dump(args)?;
        }

        Commands::Render {
            input,
            filter,
            pattern,
            flamegraph,
            title,
            width,
            tree,
            indent,
            summary,
        } => {
            let args = RenderArgs {
                input,
                filter_file: filter,
                pattern,
                flamegraph_config: flamegraph_config(flamegraph.is_some(), title, width),
                output_svg: flamegraph,
                print_tree: tree,
                indent,
                print_summary: summary,
            };

            render::validate_args(&args)?;
            execute_render(args)?;
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}

/// Flamegraph settings when an SVG was requested
///
/// **Private** - shared by the subcommands
fn flamegraph_config(requested: bool, title: Option<String>, width: usize) -> Option<FlamegraphConfig> {
    if !requested {
        return None;
    }

    let mut config = FlamegraphConfig::new().with_width(width);
    if let Some(title) = title {
        config = config.with_title(title);
    }
    Some(config)
}

/// Display version information
///
/// **Private** - internal command implementation
fn display_version() {
    println!("cpu-trace-profiler v{}", env!("CARGO_PKG_VERSION"));
    println!("Trace metric prefix: {}", TRACE_PREFIX);
    println!();
    println!("In-process sampling CPU profiler reporting stack traces as metrics.");
}
