//! Split an XLSX workbook into one standalone workbook per sheet.
//!
//! The crate operates at the Open Packaging Convention layer: a workbook is loaded as a map of
//! ZIP parts, every sheet except the target is removed from `xl/workbook.xml` and its
//! relationships, and parts that are no longer reachable are dropped. Styles and theme are
//! carried over byte for byte, so formatting survives untouched. The shared-string table is cut
//! down to the kept sheet's strings, so no text from a removed sheet stays behind.
//!
//! ```no_run
//! use sheetsplit::{split_file, SplitOptions};
//!
//! # fn main() -> Result<(), sheetsplit::SplitError> {
//! let report = split_file("Books/Sales2024.xlsx", &SplitOptions::default())?;
//! for written in &report.written {
//!     println!("{} -> {}", written.sheet, written.path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod content_types;
pub mod docprops;
mod error;
pub mod openxml;
pub mod package;
pub mod pivots;
pub mod prune;
pub mod resolve;
pub mod sanitize;
pub mod shared_strings;
pub mod split;
pub mod workbook;
mod zip_util;

pub use config::{ExistingFilePolicy, SheetErrorPolicy, SplitOptions};
pub use error::{Result, SplitError};
pub use package::{XlsxPackage, XlsxPackageLimits};
pub use resolve::{
    clean_input_path, output_dir_for, prepare_output_dir, resolve_input_path, OutputDirState,
};
pub use sanitize::{sanitize_sheet_name, StemAllocator};
pub use split::{
    sheet_names, split_file, split_workbook, SheetFailure, SheetOutput, SplitEvent, SplitReport,
};
pub use workbook::WorkbookSheetInfo;
