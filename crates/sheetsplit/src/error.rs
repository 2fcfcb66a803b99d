use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SplitError>;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("missing required attribute: {0}")]
    MissingAttr(&'static str),
    #[error("missing xlsx part: {0}")]
    MissingPart(String),
    #[error("invalid xlsx: {0}")]
    Invalid(String),
    #[error("sheet '{sheet}' not found. Available sheets: {available}")]
    SheetNotFound { sheet: String, available: String },
    #[error(
        "xlsx package part is too large to load safely: {part} is {size} bytes (max {max} bytes)"
    )]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("xlsx package is too large to load safely: {total} bytes uncompressed (max {max})")]
    PackageTooLarge { total: u64, max: u64 },
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("output file already exists: {}", .0.display())]
    OutputExists(PathBuf),
    #[error("failed to open workbook {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Box<SplitError>,
    },
    #[error("failed to split sheet '{sheet}': {source}")]
    Sheet {
        sheet: String,
        #[source]
        source: Box<SplitError>,
    },
}

impl SplitError {
    pub(crate) fn open(path: impl Into<PathBuf>, source: SplitError) -> Self {
        Self::Open {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn sheet(sheet: impl Into<String>, source: SplitError) -> Self {
        Self::Sheet {
            sheet: sheet.into(),
            source: Box::new(source),
        }
    }
}
