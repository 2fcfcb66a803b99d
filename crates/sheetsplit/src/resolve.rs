//! Locating the input workbook and its output folder.

use std::path::{Path, PathBuf};

use crate::SplitError;

/// Strip the wrapping a terminal adds to a pasted or dropped path.
///
/// Surrounding whitespace goes first, then a leading `&` (PowerShell prefixes dropped paths
/// with the call operator), then surrounding double quotes and finally surrounding single
/// quotes.
pub fn clean_input_path(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix('&') {
        s = rest.trim();
    }
    s.trim_matches('"').trim_matches('\'').to_string()
}

/// Clean `raw` and check that it names an existing file system entry.
pub fn resolve_input_path(raw: &str) -> Result<PathBuf, SplitError> {
    let path = PathBuf::from(clean_input_path(raw));
    if path.as_os_str().is_empty() || !path.exists() {
        return Err(SplitError::InputNotFound(path));
    }
    Ok(path)
}

/// `<parent>/<stem>` for an input workbook. A bare file name is resolved against `.`.
pub fn output_dir_for(input: &Path) -> Result<PathBuf, SplitError> {
    let stem = input.file_stem().ok_or_else(|| {
        SplitError::Invalid(format!("input path has no file name: {}", input.display()))
    })?;
    let parent = match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(parent.join(stem))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDirState {
    Created,
    Existing,
}

/// Create the output folder (and its parents) unless it already exists.
pub fn prepare_output_dir(dir: &Path) -> Result<OutputDirState, SplitError> {
    if dir.is_dir() {
        return Ok(OutputDirState::Existing);
    }
    std::fs::create_dir_all(dir)?;
    Ok(OutputDirState::Created)
}
