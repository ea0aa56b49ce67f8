//! SVG flamegraph generation using inferno, plus text renderings.
//!
//! inferno does the layout and SVG work; this module only adapts our
//! collapsed stacks and configuration to it. The call tree and summary
//! renderers are for terminals.

use crate::aggregator::stack_builder::CollapsedStack;
use crate::utils::error::FlamegraphError;
use inferno::flamegraph::{self, Options};
use log::info;
use std::collections::BTreeMap;

/// Flamegraph configuration
#[derive(Debug, Clone)]
pub struct FlamegraphConfig {
    pub title: String,
    pub width: usize,
}

impl Default for FlamegraphConfig {
    fn default() -> Self {
        Self {
            title: "CPU Profile".to_string(),
            width: 1200,
        }
    }
}

impl FlamegraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }
}

/// Generate SVG flamegraph from collapsed stacks
///
/// **Public** - used by the folded file reporter and the render command
///
/// # Errors
/// * `FlamegraphError::EmptyStacks` - nothing to draw
/// * `FlamegraphError::Render` - inferno failed to render
pub fn generate_flamegraph(
    stacks: &[CollapsedStack],
    config: Option<&FlamegraphConfig>,
) -> Result<String, FlamegraphError> {
    if stacks.is_empty() {
        return Err(FlamegraphError::EmptyStacks);
    }

    let config = config.cloned().unwrap_or_default();
    info!("Generating flamegraph with {} stacks", stacks.len());

    let mut options = Options::default();
    options.title = config.title;
    options.count_name = "samples".to_string();
    options.image_width = Some(config.width);

    let lines: Vec<String> = stacks.iter().map(CollapsedStack::to_line).collect();
    let mut svg = Vec::new();
    flamegraph::from_lines(&mut options, lines.iter().map(String::as_str), &mut svg)
        .map_err(|e| FlamegraphError::Render(e.to_string()))?;

    let svg = String::from_utf8(svg)?;
    info!("Flamegraph generated successfully ({} bytes)", svg.len());
    Ok(svg)
}

/// Internal Node structure for building the tree
#[derive(Default)]
struct Node {
    value: u64,
    children: BTreeMap<String, Node>,
}

impl Node {
    fn insert(&mut self, stack: &[&str], value: u64) {
        self.value += value;
        if let Some((head, tail)) = stack.split_first() {
            self.children
                .entry(head.to_string())
                .or_default()
                .insert(tail, value);
        }
    }

    fn dump(&self, depth: usize, indent: usize, out: &mut Vec<String>) {
        for (name, child) in &self.children {
            out.push(format!("{}{} ({})", " ".repeat(depth * indent), name, child.value));
            child.dump(depth + 1, indent, out);
        }
    }
}

/// Render stacks as an indented call tree, children sorted by name
///
/// **Public** - text alternative to the flamegraph
pub fn generate_call_tree(stacks: &[CollapsedStack], indent: usize) -> String {
    let mut root = Node::default();
    for stack in stacks {
        let parts: Vec<&str> = stack.stack.split(';').collect();
        root.insert(&parts, stack.weight);
    }

    let mut lines = Vec::new();
    root.dump(0, indent, &mut lines);
    lines.join("\n")
}

/// Create a text summary of the heaviest stacks
///
/// Stacks are expected heaviest first, as returned by the stack builder.
pub fn generate_text_summary(stacks: &[CollapsedStack], max_lines: usize) -> String {
    let total: u64 = stacks.iter().map(|s| s.weight).sum();
    let total = total.max(1);

    let mut lines = Vec::new();
    lines.push(format!("  {:<60} {:>10} {:>7}", "Stack (leaf frames)", "SAMPLES", "%"));
    lines.push(format!("  {}", "-".repeat(79)));

    for stack in stacks.iter().take(max_lines) {
        let percentage = (stack.weight as f64 / total as f64) * 100.0;

        // Keep the leaf end, that is where the time goes
        let display_stack = if stack.stack.chars().count() > 60 {
            let tail: String = stack
                .stack
                .chars()
                .rev()
                .take(57)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("...{}", tail)
        } else {
            stack.stack.clone()
        };

        lines.push(format!(
            "  {:<60} {:>10} {:>6.1}%",
            display_stack, stack.weight, percentage
        ));
    }

    if stacks.len() > max_lines {
        lines.push(String::new());
        lines.push(format!("   (Showing top {} of {} unique stacks)", max_lines, stacks.len()));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stacks() -> Vec<CollapsedStack> {
        vec![
            CollapsedStack::new("app;Server;run;app;Db;query".to_string(), 6),
            CollapsedStack::new("app;Server;run".to_string(), 3),
            CollapsedStack::new("app;Idle;tick".to_string(), 1),
        ]
    }

    #[test]
    fn test_empty_stacks_rejected() {
        assert!(matches!(
            generate_flamegraph(&[], None),
            Err(FlamegraphError::EmptyStacks)
        ));
    }

    #[test]
    fn test_generate_svg() {
        let config = FlamegraphConfig::new().with_title("Checkout").with_width(800);
        let svg = generate_flamegraph(&stacks(), Some(&config)).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Checkout"));
        assert!(svg.contains("query"));
    }

    #[test]
    fn test_call_tree() {
        let tree = generate_call_tree(&stacks(), 2);
        let lines: Vec<&str> = tree.lines().collect();
        assert_eq!(lines[0], "app (10)");
        assert_eq!(lines[1], "  Idle (1)");
        assert_eq!(lines[3], "  Server (9)");
        assert_eq!(lines[4], "    run (9)");
    }

    #[test]
    fn test_text_summary_percentages() {
        let summary = generate_text_summary(&stacks(), 2);
        assert!(summary.contains("60.0%"));
        assert!(summary.contains("Showing top 2 of 3"));
    }
}
