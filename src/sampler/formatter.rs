//! Build trace keys from thread stacks.
//!
//! A trace key is also the metric name the trace is reported under:
//! `cpu.trace.<class>.<method>.<class>.<method>...`
//!
//! Example: `cpu.trace.demo.Server.main.demo.Handler.handle-42`
//! This means: `Server::main` called `Handler::handle`, which was executing
//! line 42 when the sample was taken.

use super::source::Frame;
use crate::utils::config::TRACE_PREFIX;
use std::collections::TryReserveError;
use std::fmt::Write;

const EMPTY_COMPONENT: char = '_';

/// Format a stack into its trace key
///
/// **Public** - used by the sampling loop on every sampled thread
///
/// # Arguments
/// * `frames` - Stack frames, outermost first
///
/// # Returns
/// `Ok(None)` for an empty stack (the thread is not profilable), otherwise
/// the key. Identical stacks always produce identical keys.
///
/// # Errors
/// Fails only if memory for the key cannot be allocated.
pub fn format_stack_trace(frames: &[Frame]) -> Result<Option<String>, TryReserveError> {
    if frames.is_empty() {
        return Ok(None);
    }

    let mut key = String::new();
    key.try_reserve(estimated_len(frames))?;
    key.push_str(TRACE_PREFIX);

    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            key.push('.');
        }
        push_component(&mut key, &frame.class);
        key.push('.');
        push_component(&mut key, &frame.method);
        if let Some(line) = frame.line {
            // Writing to a String cannot fail
            let _ = write!(key, "-{}", line);
        }
    }

    Ok(Some(key))
}

/// Render a package or class name the way it appears inside trace keys
///
/// Rust paths (`a::b`) become dotted and characters that would break a
/// metric name become `_`.
pub fn sanitize_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    push_sanitized(&mut out, name);
    out
}

/// Missing names become `_` so every frame keeps two components
fn push_component(out: &mut String, name: &str) {
    if name.is_empty() {
        out.push(EMPTY_COMPONENT);
    } else {
        push_sanitized(out, name);
    }
}

fn push_sanitized(out: &mut String, name: &str) {
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                out.push('.');
            }
            c if c.is_whitespace() || matches!(c, ',' | '=' | ';' | '"' | '\\') => out.push('_'),
            c => out.push(c),
        }
    }
}

/// Upper bound on the key length; sanitizing never grows a name
fn estimated_len(frames: &[Frame]) -> usize {
    TRACE_PREFIX.len()
        + frames
            .iter()
            // separators plus room for "-" and a u32 line number
            .map(|f| f.class.len().max(1) + f.method.len().max(1) + 2 + 11)
            .sum::<usize>()
}
