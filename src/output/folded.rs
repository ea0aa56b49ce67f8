//! Folded stack file reader and writer.
//!
//! One `stack;frames count` line per unique stack, the format understood by
//! inferno and the FlameGraph perl scripts.

use super::prepare_output_path;
use crate::aggregator::stack_builder::{parse_collapsed_line, CollapsedStack};
use crate::utils::error::OutputError;
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Write collapsed stacks to a folded file
///
/// **Public** - main entry point for folded output
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::InvalidPath` - Path is empty, a directory, or its parent cannot be created
pub fn write_folded(stacks: &[CollapsedStack], output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();

    info!("Writing {} stacks to: {}", stacks.len(), output_path.display());

    prepare_output_path(output_path)?;

    let file = File::create(output_path).map_err(OutputError::WriteFailed)?;
    let mut writer = BufWriter::new(file);

    for stack in stacks {
        writeln!(writer, "{}", stack.to_line()).map_err(OutputError::WriteFailed)?;
    }

    writer.flush().map_err(OutputError::WriteFailed)?;

    Ok(())
}

/// Read collapsed stacks from a folded file
///
/// Blank lines are skipped.
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error (reusing WriteFailed for I/O)
/// * `OutputError::MalformedLine` - A line has no numeric weight
pub fn read_folded(input_path: impl AsRef<Path>) -> Result<Vec<CollapsedStack>, OutputError> {
    let input_path = input_path.as_ref();

    debug!("Reading folded stacks from: {}", input_path.display());

    let file = File::open(input_path).map_err(OutputError::WriteFailed)?;
    let mut stacks = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(OutputError::WriteFailed)?;
        if line.trim().is_empty() {
            continue;
        }
        let stack = parse_collapsed_line(&line).ok_or_else(|| OutputError::MalformedLine {
            line: index + 1,
            content: line.clone(),
        })?;
        stacks.push(stack);
    }

    debug!("Loaded {} stacks", stacks.len());
    Ok(stacks)
}

/// Read a list of exclusion strings, one per line
///
/// Blank lines are ignored.
pub fn read_filter_file(input_path: impl AsRef<Path>) -> Result<Vec<String>, OutputError> {
    let content = std::fs::read_to_string(input_path).map_err(OutputError::WriteFailed)?;
    Ok(content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
