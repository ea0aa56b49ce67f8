//! InfluxDB line protocol encoding.
//!
//! `measurement,tag=value,tag=value value=<n>i <timestamp>`

use std::collections::BTreeMap;

/// Escape a measurement name (commas and spaces)
pub fn escape_measurement(name: &str) -> String {
    escape(name, &[',', ' '])
}

/// Escape a tag key or value (commas, equals signs and spaces)
pub fn escape_tag(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

fn escape(input: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Format one gauge as a line-protocol point with an integer `value` field
pub fn format_point(
    measurement: &str,
    tags: &BTreeMap<String, String>,
    value: u64,
    timestamp_ms: i64,
) -> String {
    let mut line = escape_measurement(measurement);
    for (key, tag_value) in tags {
        line.push(',');
        line.push_str(&escape_tag(key));
        line.push('=');
        line.push_str(&escape_tag(tag_value));
    }
    line.push_str(&format!(" value={}i {}", value, timestamp_ms));
    line
}
