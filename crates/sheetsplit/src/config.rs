use clap::ValueEnum;

use crate::XlsxPackageLimits;

/// What to do when an output file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ExistingFilePolicy {
    /// Replace the existing file.
    #[default]
    Overwrite,
    /// Treat an existing file as a failure for that sheet.
    Fail,
    /// Write to the first free `<stem> (n).xlsx` instead.
    Suffix,
}

/// What to do when a single sheet cannot be split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SheetErrorPolicy {
    /// Stop at the first failing sheet.
    #[default]
    Abort,
    /// Record the failure and carry on with the next sheet.
    Continue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitOptions {
    pub existing: ExistingFilePolicy,
    pub on_error: SheetErrorPolicy,
    pub limits: XlsxPackageLimits,
}
