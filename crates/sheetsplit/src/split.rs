//! The per-sheet extraction loop.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use sheetsplit_fs::{atomic_write, first_free_path, AtomicWriteError, ReplaceMode};

use crate::package::read_workbook_sheets;
use crate::resolve::{output_dir_for, prepare_output_dir};
use crate::{
    ExistingFilePolicy, SheetErrorPolicy, SplitError, SplitOptions, StemAllocator, XlsxPackage,
    XlsxPackageLimits,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetOutput {
    /// 1-based position of the sheet in workbook order.
    pub position: usize,
    pub sheet: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct SheetFailure {
    pub position: usize,
    pub sheet: String,
    pub error: SplitError,
}

#[derive(Debug)]
pub struct SplitReport {
    pub output_dir: PathBuf,
    pub total: usize,
    pub written: Vec<SheetOutput>,
    pub failed: Vec<SheetFailure>,
}

impl SplitReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.written.len() == self.total
    }
}

/// Progress notifications emitted by [`split_workbook`].
#[derive(Debug)]
pub enum SplitEvent<'a> {
    Processing {
        position: usize,
        total: usize,
        sheet: &'a str,
    },
    Written(&'a SheetOutput),
    Failed(&'a SheetFailure),
}

/// List the sheet names of a workbook in order.
///
/// Only the package relationships and the workbook part are read.
pub fn sheet_names(
    input: impl AsRef<Path>,
    limits: XlsxPackageLimits,
) -> Result<Vec<String>, SplitError> {
    let input = input.as_ref();
    let read = || -> Result<Vec<String>, SplitError> {
        let file = File::open(input)?;
        let sheets = read_workbook_sheets(BufReader::new(file), limits)?;
        Ok(sheets.into_iter().map(|sheet| sheet.name).collect())
    };
    read().map_err(|err| SplitError::open(input, err))
}

/// Write one single-sheet workbook per entry of `sheets` into `output_dir`.
///
/// The input is re-read from disk for every sheet. With [`SheetErrorPolicy::Abort`] the first
/// failure is returned as the error; files written before it stay in place.
pub fn split_workbook(
    input: &Path,
    output_dir: &Path,
    sheets: &[String],
    options: &SplitOptions,
    mut on_event: impl FnMut(SplitEvent<'_>),
) -> Result<SplitReport, SplitError> {
    let total = sheets.len();
    let mut report = SplitReport {
        output_dir: output_dir.to_path_buf(),
        total,
        written: Vec::with_capacity(total),
        failed: Vec::new(),
    };
    let mut stems = StemAllocator::new();

    for (idx, sheet) in sheets.iter().enumerate() {
        let position = idx + 1;
        on_event(SplitEvent::Processing {
            position,
            total,
            sheet,
        });

        let stem = stems.allocate(sheet, position);
        match split_one(input, output_dir, sheet, &stem, options) {
            Ok(path) => {
                debug!("wrote sheet '{sheet}' to {}", path.display());
                let output = SheetOutput {
                    position,
                    sheet: sheet.clone(),
                    path,
                };
                on_event(SplitEvent::Written(&output));
                report.written.push(output);
            }
            Err(err) => {
                let err = SplitError::sheet(sheet.as_str(), err);
                if options.on_error == SheetErrorPolicy::Abort {
                    return Err(err);
                }
                warn!("{err}");
                let failure = SheetFailure {
                    position,
                    sheet: sheet.clone(),
                    error: err,
                };
                on_event(SplitEvent::Failed(&failure));
                report.failed.push(failure);
            }
        }
    }

    Ok(report)
}

fn split_one(
    input: &Path,
    output_dir: &Path,
    sheet: &str,
    stem: &str,
    options: &SplitOptions,
) -> Result<PathBuf, SplitError> {
    let mut pkg = XlsxPackage::open(input, options.limits)?;
    let extension = if pkg.is_macro_enabled()? { "xlsm" } else { "xlsx" };
    pkg.retain_only_sheet(sheet)?;

    let dest = output_dir.join(format!("{stem}.{extension}"));
    let (dest, mode) = match options.existing {
        ExistingFilePolicy::Overwrite => (dest, ReplaceMode::Overwrite),
        ExistingFilePolicy::Fail => (dest, ReplaceMode::NoClobber),
        ExistingFilePolicy::Suffix => (first_free_path(&dest), ReplaceMode::NoClobber),
    };

    atomic_write(&dest, mode, |file| pkg.write_to(file)).map_err(|err| match err {
        AtomicWriteError::Io(err) => SplitError::Io(err),
        AtomicWriteError::Writer(err) => err,
        AtomicWriteError::AlreadyExists(path) => SplitError::OutputExists(path),
    })?;
    Ok(dest)
}

/// Split `input` into `<input_dir>/<input_stem>/<sheet>.xlsx`, one file per sheet.
pub fn split_file(input: impl AsRef<Path>, options: &SplitOptions) -> Result<SplitReport, SplitError> {
    let input = input.as_ref();
    if !input.exists() {
        return Err(SplitError::InputNotFound(input.to_path_buf()));
    }
    let output_dir = output_dir_for(input)?;
    prepare_output_dir(&output_dir)?;
    let sheets = sheet_names(input, options.limits)?;
    split_workbook(input, &output_dir, &sheets, options, |_| {})
}
