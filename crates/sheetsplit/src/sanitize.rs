//! Turning sheet names into output file stems.

use std::collections::HashSet;

const RESERVED_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn allowed_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '-' | '_' | '.')
}

/// Keep only ASCII letters, digits, space, `-`, `_` and `.`, then trim surrounding spaces.
///
/// ```
/// assert_eq!(sheetsplit::sanitize_sheet_name("Q1 Report (Final)!"), "Q1 Report Final");
/// ```
pub fn sanitize_sheet_name(name: &str) -> String {
    let kept: String = name.chars().filter(|&ch| allowed_char(ch)).collect();
    kept.trim().to_string()
}

fn is_reserved_device_name(stem: &str) -> bool {
    // Windows also reserves `CON.txt`, `nul.tar.gz`, ...
    let base = stem.split('.').next().unwrap_or(stem).trim_end();
    RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(base))
}

/// The file stem for the sheet at 1-based `position`, ignoring other sheets of the run.
pub fn output_stem(name: &str, position: usize) -> String {
    let stem = sanitize_sheet_name(name);
    if stem.is_empty() {
        return format!("sheet_{position}");
    }
    if is_reserved_device_name(&stem) {
        return format!("_{stem}");
    }
    stem
}

/// Hands out file stems that are unique within one run, compared case-insensitively.
#[derive(Debug, Default)]
pub struct StemAllocator {
    used: HashSet<String>,
}

impl StemAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stem for the sheet at 1-based `position`. A stem already handed out gets `_<position>`
    /// appended.
    pub fn allocate(&mut self, name: &str, position: usize) -> String {
        let base = output_stem(name, position);
        let mut candidate = base.clone();
        let mut attempt = 1;
        while !self.used.insert(candidate.to_lowercase()) {
            candidate = if attempt == 1 {
                format!("{base}_{position}")
            } else {
                format!("{base}_{position}_{attempt}")
            };
            attempt += 1;
        }
        candidate
    }
}
