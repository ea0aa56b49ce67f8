//! Tags attached to every point.
//!
//! The metric prefix doubles as a tag source: with a tag mapping such as
//! `env.SKIP.service` and prefix `prod.profiler.billing`, points are tagged
//! `env=prod,service=billing`. Without a mapping the whole prefix becomes a
//! single `prefix` tag. Process tags identify which process produced a point.

use crate::utils::config::SKIP_TAG;
use crate::utils::error::ConfigError;
use std::collections::BTreeMap;

/// Build tags from the metric prefix and an optional tag mapping
///
/// # Errors
/// * `ConfigError::TagMappingMismatch` - mapping and prefix have different component counts
pub fn prefix_tags(prefix: &str, tag_mapping: Option<&str>) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut tags = BTreeMap::new();

    let Some(mapping) = tag_mapping else {
        tags.insert("prefix".to_string(), prefix.to_string());
        return Ok(tags);
    };

    let names: Vec<&str> = mapping.split('.').collect();
    let components: Vec<&str> = prefix.split('.').collect();
    if names.len() != components.len() {
        return Err(ConfigError::TagMappingMismatch {
            mapping: mapping.to_string(),
            prefix: prefix.to_string(),
        });
    }

    for (name, component) in names.into_iter().zip(components) {
        if name != SKIP_TAG {
            tags.insert(name.to_string(), component.to_string());
        }
    }

    Ok(tags)
}

/// Tags identifying the current process: `processName` (`pid@host`), `pid`, `host`
pub fn process_tags() -> BTreeMap<String, String> {
    let pid = std::process::id().to_string();
    let host = hostname();

    let mut tags = BTreeMap::new();
    tags.insert("processName".to_string(), format!("{}@{}", pid, host));
    tags.insert("pid".to_string(), pid);
    tags.insert("host".to_string(), host);
    tags
}

/// Best-effort host name, `unknown` if none can be found
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
