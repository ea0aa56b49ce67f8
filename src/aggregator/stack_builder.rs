//! Build collapsed stack format from trace counts.
//!
//! Collapsed stacks are the input format for flamegraph generation.
//! Format: "parent;child;grandchild weight"
//!
//! Example: "demo;Server;main;demo;Handler;handle 1000"
//! Trace keys carry no frame boundaries, so every key component becomes one
//! flame level: package, class and method each get their own box.

use crate::utils::config::TRACE_PREFIX;
use log::debug;
use std::borrow::Cow;
use std::collections::HashMap;
use std::str::FromStr;

/// A single collapsed stack entry
///
/// **Public** - used by flamegraph generator and the folded file writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollapsedStack {
    /// Stack trace as semicolon-separated string
    pub stack: String,

    /// Weight (samples observed for this stack)
    pub weight: u64,
}

impl CollapsedStack {
    /// Create a new collapsed stack
    ///
    /// **Public** - constructor
    pub fn new(stack: String, weight: u64) -> Self {
        Self { stack, weight }
    }

    /// Render as one line of a folded file
    pub fn to_line(&self) -> String {
        format!("{} {}", self.stack, self.weight)
    }
}

/// How `-<line>` suffixes on frames are rendered in collapsed stacks
///
/// Padding line numbers to four digits keeps frames of one method sorted by
/// line in text tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineNumberMode {
    /// `run-7` stays `run-7`
    #[default]
    Keep,
    /// `run-7` becomes `run:0007`
    NameFirst,
    /// `run-7` becomes `0007:run`
    LineFirst,
    /// `run-7` becomes `run`
    Strip,
}

impl LineNumberMode {
    fn apply(self, component: &str) -> Cow<'_, str> {
        if self == LineNumberMode::Keep {
            return Cow::Borrowed(component);
        }
        let Some((name, line)) = component.rsplit_once('-') else {
            return Cow::Borrowed(component);
        };
        if name.is_empty() || line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
            return Cow::Borrowed(component);
        }

        match self {
            LineNumberMode::Keep => Cow::Borrowed(component),
            LineNumberMode::NameFirst => Cow::Owned(format!("{}:{:0>4}", name, line)),
            LineNumberMode::LineFirst => Cow::Owned(format!("{:0>4}:{}", line, name)),
            LineNumberMode::Strip => Cow::Borrowed(name),
        }
    }
}

impl FromStr for LineNumberMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(LineNumberMode::Keep),
            "name-first" => Ok(LineNumberMode::NameFirst),
            "line-first" => Ok(LineNumberMode::LineFirst),
            "strip" => Ok(LineNumberMode::Strip),
            other => Err(format!(
                "unknown line number mode '{}' (expected keep, name-first, line-first or strip)",
                other
            )),
        }
    }
}

/// Whether a gauge name is one of the shutdown depth-bound gauges (`cpu.trace.<digits>`)
pub fn is_bound_gauge(name: &str) -> bool {
    name.strip_prefix(TRACE_PREFIX)
        .map_or(false, |rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Convert a trace key into a collapsed stack string
///
/// # Returns
/// `None` for names that are not traces (stats gauges, bound gauges)
pub fn trace_key_to_stack(trace_key: &str) -> Option<String> {
    trace_key_to_stack_with(trace_key, LineNumberMode::Keep)
}

/// [`trace_key_to_stack`] with line numbers rendered per `mode`
pub fn trace_key_to_stack_with(trace_key: &str, mode: LineNumberMode) -> Option<String> {
    if is_bound_gauge(trace_key) {
        return None;
    }
    let path = trace_key.strip_prefix(TRACE_PREFIX)?;
    if path.is_empty() {
        return None;
    }
    Some(path.split('.').map(|c| mode.apply(c)).collect::<Vec<_>>().join(";"))
}

/// Build collapsed stacks from trace counts
///
/// **Public** - main entry point for stack building
///
/// # Arguments
/// * `traces` - Trace key / sample count pairs, e.g. a drained trace store
///
/// # Returns
/// Vector of collapsed stacks, one per unique trace, heaviest first
/// (ties broken by stack name so output is stable)
pub fn build_collapsed_stacks<K, I>(traces: I) -> Vec<CollapsedStack>
where
    K: AsRef<str>,
    I: IntoIterator<Item = (K, u64)>,
{
    build_collapsed_stacks_with(traces, LineNumberMode::Keep)
}

/// [`build_collapsed_stacks`] with line numbers rendered per `mode`
///
/// Stripping line numbers can map several traces onto one stack; their
/// weights are summed.
pub fn build_collapsed_stacks_with<K, I>(traces: I, mode: LineNumberMode) -> Vec<CollapsedStack>
where
    K: AsRef<str>,
    I: IntoIterator<Item = (K, u64)>,
{
    // Map to aggregate stacks: stack_string -> total_weight
    let mut stack_map: HashMap<String, u64> = HashMap::new();

    for (key, count) in traces {
        match trace_key_to_stack_with(key.as_ref(), mode) {
            Some(stack) => *stack_map.entry(stack).or_insert(0) += count,
            None => debug!("Skipping non-trace metric {}", key.as_ref()),
        }
    }

    let mut stacks: Vec<CollapsedStack> = stack_map
        .into_iter()
        .map(|(stack, weight)| CollapsedStack::new(stack, weight))
        .collect();

    sort_stacks(&mut stacks);

    debug!("Built {} unique collapsed stacks", stacks.len());

    stacks
}

/// Sort heaviest first, then by name
pub fn sort_stacks(stacks: &mut [CollapsedStack]) {
    stacks.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.stack.cmp(&b.stack)));
}

/// Parse one `stack weight` line of a folded file
///
/// # Returns
/// `None` if the line has no weight or the weight is not a number
pub fn parse_collapsed_line(line: &str) -> Option<CollapsedStack> {
    let (stack, weight) = line.trim().rsplit_once(' ')?;
    let weight = weight.parse().ok()?;
    if stack.is_empty() {
        return None;
    }
    Some(CollapsedStack::new(stack.to_string(), weight))
}

/// Drop every stack containing one of `patterns`
pub fn exclude_matching(stacks: Vec<CollapsedStack>, patterns: &[String]) -> Vec<CollapsedStack> {
    if patterns.is_empty() {
        return stacks;
    }
    stacks
        .into_iter()
        .filter(|s| !patterns.iter().any(|p| s.stack.contains(p.as_str())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapsed_stack_to_line() {
        let stack = CollapsedStack::new("app;Server;run".to_string(), 17);
        assert_eq!(stack.to_line(), "app;Server;run 17");
    }

    #[test]
    fn test_bound_gauges() {
        assert!(is_bound_gauge("cpu.trace.12"));
        assert!(!is_bound_gauge("cpu.trace."));
        assert!(!is_bound_gauge("cpu.trace.a1"));
        assert!(!is_bound_gauge("cpu.stats.size"));
    }

    #[test]
    fn test_trace_key_to_stack() {
        assert_eq!(
            trace_key_to_stack("cpu.trace.app.Main.main").as_deref(),
            Some("app;Main;main")
        );
        assert_eq!(trace_key_to_stack("cpu.trace.7"), None);
        assert_eq!(trace_key_to_stack("cpu.stats.size"), None);
    }

    #[test]
    fn test_line_number_modes() {
        let key = "cpu.trace.app.Main.main.app.Worker.run-7";
        let render = |mode| trace_key_to_stack_with(key, mode).unwrap();

        assert_eq!(render(LineNumberMode::Keep), "app;Main;main;app;Worker;run-7");
        assert_eq!(render(LineNumberMode::NameFirst), "app;Main;main;app;Worker;run:0007");
        assert_eq!(render(LineNumberMode::LineFirst), "app;Main;main;app;Worker;0007:run");
        assert_eq!(render(LineNumberMode::Strip), "app;Main;main;app;Worker;run");

        // only a numeric suffix is a line number
        assert_eq!(
            trace_key_to_stack_with("cpu.trace.my-app.Main.main", LineNumberMode::Strip).as_deref(),
            Some("my-app;Main;main")
        );
        assert_eq!("line-first".parse::<LineNumberMode>(), Ok(LineNumberMode::LineFirst));
        assert!("sorted".parse::<LineNumberMode>().is_err());
    }

    #[test]
    fn test_strip_merges_lines() {
        let traces = vec![
            ("cpu.trace.app.Main.main-10", 2u64),
            ("cpu.trace.app.Main.main-12", 3u64),
            ("cpu.trace.app.Main.idle", 1u64),
        ];
        let stacks = build_collapsed_stacks_with(traces, LineNumberMode::Strip);
        assert_eq!(
            stacks,
            vec![
                CollapsedStack::new("app;Main;main".to_string(), 5),
                CollapsedStack::new("app;Main;idle".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_parse_collapsed_line() {
        let stack = parse_collapsed_line("a;b;c 42\n").unwrap();
        assert_eq!(stack, CollapsedStack::new("a;b;c".to_string(), 42));
        assert!(parse_collapsed_line("a;b;c").is_none());
        assert!(parse_collapsed_line("a;b;c x").is_none());
    }
}
