//! Render command implementation.
//!
//! Reads a folded file, filters it and renders it as an SVG flamegraph,
//! an indented call tree or a summary of the heaviest stacks.

use crate::aggregator::{exclude_matching, sort_stacks, CollapsedStack};
use crate::flamegraph::{generate_call_tree, generate_flamegraph, generate_text_summary, FlamegraphConfig};
use crate::output::{read_filter_file, read_folded, write_svg};
use anyhow::{Context, Result};
use log::{debug, info};
use regex::Regex;
use std::path::PathBuf;

/// Arguments for the render command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct RenderArgs {
    /// Folded stack file to read
    pub input: PathBuf,

    /// File listing substrings; stacks containing any of them are dropped
    pub filter_file: Option<PathBuf>,

    /// Keep only stacks whose start matches this regular expression
    pub pattern: Option<String>,

    /// Output path for SVG flamegraph (optional)
    pub output_svg: Option<PathBuf>,

    /// Flamegraph configuration
    pub flamegraph_config: Option<FlamegraphConfig>,

    /// Print an indented call tree to stdout
    pub print_tree: bool,

    /// Spaces per call tree level
    pub indent: usize,

    /// Print the heaviest stacks to stdout
    pub print_summary: bool,
}

impl Default for RenderArgs {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            filter_file: None,
            pattern: None,
            output_svg: Some(PathBuf::from("flamegraph.svg")),
            flamegraph_config: None,
            print_tree: false,
            indent: 1,
            print_summary: false,
        }
    }
}

/// Execute the render command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Input or filter file cannot be read or is malformed
/// * The selection pattern is not a valid regular expression
/// * Flamegraph generation or write failures
pub fn execute_render(args: RenderArgs) -> Result<()> {
    let selector = args.pattern.as_deref().map(compile_selector).transpose()?;

    info!("Reading folded stacks from: {}", args.input.display());
    let stacks = read_folded(&args.input).context("Failed to read folded stacks")?;

    let patterns = match &args.filter_file {
        Some(path) => read_filter_file(path).context("Failed to read filter file")?,
        None => Vec::new(),
    };
    let stacks = select_stacks(stacks, &patterns, selector.as_ref());
    debug!("{} stacks after filtering", stacks.len());

    if let Some(svg_path) = &args.output_svg {
        let svg = generate_flamegraph(&stacks, args.flamegraph_config.as_ref())
            .context("Failed to generate flamegraph")?;
        write_svg(&svg, svg_path).context("Failed to write flamegraph SVG")?;
        info!("✓ Flamegraph written to: {}", svg_path.display());
    }

    if args.print_tree {
        println!("{}", generate_call_tree(&stacks, args.indent));
    }

    if args.print_summary {
        println!("{}", generate_text_summary(&stacks, 20));
    }

    Ok(())
}

/// Compile a stack selector; it must match at the start of a stack
///
/// # Errors
/// * The pattern is not a valid regular expression
pub fn compile_selector(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})", pattern)).with_context(|| format!("Invalid stack pattern '{}'", pattern))
}

/// Apply the exclusion list and the optional selector, heaviest first
pub fn select_stacks(
    stacks: Vec<CollapsedStack>,
    exclude: &[String],
    selector: Option<&Regex>,
) -> Vec<CollapsedStack> {
    let mut stacks: Vec<CollapsedStack> = exclude_matching(stacks, exclude)
        .into_iter()
        .filter(|s| selector.map_or(true, |re| re.is_match(&s.stack)))
        .collect();
    sort_stacks(&mut stacks);
    stacks
}

/// Validate render arguments
///
/// **Public** - can be called before execute_render for early validation
pub fn validate_args(args: &RenderArgs) -> Result<()> {
    if !args.input.is_file() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    if args.output_svg.is_none() && !args.print_tree && !args.print_summary {
        anyhow::bail!("Nothing to do: pass --flamegraph, --tree or --summary");
    }

    if args.indent == 0 {
        anyhow::bail!("indent must be greater than 0");
    }

    if let Some(pattern) = &args.pattern {
        compile_selector(pattern)?;
    }

    Ok(())
}
