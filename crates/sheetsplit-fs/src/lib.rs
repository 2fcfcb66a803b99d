//! Filesystem helpers for writing split workbooks.
//!
//! Output files are written atomically:
//! - write to a temp file in the destination directory (avoids cross-device renames)
//! - flush + `sync_all`
//! - move it into place, either replacing an existing file or refusing to
//!
//! A half-written workbook therefore never shows up under its final name, and an existing file
//! is only touched once the replacement is complete.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// How the final rename treats a file that already exists at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Replace the existing file.
    Overwrite,
    /// Leave the existing file alone and fail with [`AtomicWriteError::AlreadyExists`].
    NoClobber,
}

#[derive(Debug)]
pub enum AtomicWriteError<E> {
    Io(io::Error),
    Writer(E),
    AlreadyExists(PathBuf),
}

impl<E> From<io::Error> for AtomicWriteError<E> {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl<E: std::fmt::Display> std::fmt::Display for AtomicWriteError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtomicWriteError::Io(err) => write!(f, "io error: {err}"),
            AtomicWriteError::Writer(err) => write!(f, "write error: {err}"),
            AtomicWriteError::AlreadyExists(path) => {
                write!(f, "file already exists: {}", path.display())
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AtomicWriteError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AtomicWriteError::Io(err) => Some(err),
            AtomicWriteError::Writer(err) => Some(err),
            AtomicWriteError::AlreadyExists(_) => None,
        }
    }
}

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` returns `Some("")` for bare relative file names like `Jan.xlsx`.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Atomically write a file by:
/// - creating parent directories (if needed)
/// - writing to a temp file in the same directory
/// - flushing + syncing the temp file
/// - moving it into place according to `mode`
///
/// If `write_fn` returns an error, the destination file is left untouched and the temp file is
/// removed.
pub fn atomic_write<T, E>(
    dest: impl AsRef<Path>,
    mode: ReplaceMode,
    write_fn: impl FnOnce(&mut File) -> Result<T, E>,
) -> Result<T, AtomicWriteError<E>> {
    let dest = dest.as_ref();
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir).map_err(AtomicWriteError::Io)?;

    if mode == ReplaceMode::NoClobber && dest.exists() {
        return Err(AtomicWriteError::AlreadyExists(dest.to_path_buf()));
    }

    let mut tmp = NamedTempFile::new_in(dir).map_err(AtomicWriteError::Io)?;
    let out = write_fn(tmp.as_file_mut()).map_err(AtomicWriteError::Writer)?;

    tmp.as_file_mut().flush().map_err(AtomicWriteError::Io)?;
    tmp.as_file().sync_all().map_err(AtomicWriteError::Io)?;

    let persisted = match mode {
        ReplaceMode::Overwrite => tmp.persist(dest),
        ReplaceMode::NoClobber => tmp.persist_noclobber(dest),
    };
    if let Err(err) = persisted {
        // Dropping `err.file` removes the temp file.
        return Err(match err.error.kind() {
            io::ErrorKind::AlreadyExists if mode == ReplaceMode::NoClobber => {
                AtomicWriteError::AlreadyExists(dest.to_path_buf())
            }
            _ => AtomicWriteError::Io(err.error),
        });
    }

    // Best-effort: the file is already in place.
    let _ = sync_parent_dir(dest);

    Ok(out)
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = parent_dir_or_dot(path);
    // Opening a directory as a file works on most Unix platforms; elsewhere this is a no-op error.
    let dir = File::open(parent)?;
    dir.sync_all()
}

/// Return `path` if nothing exists there, otherwise the first free sibling named
/// `<stem> (2).<ext>`, `<stem> (3).<ext>`, ...
pub fn first_free_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if !path.exists() {
        return path.to_path_buf();
    }

    let dir = parent_dir_or_dot(path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut n: u32 = 2;
    loop {
        let file_name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        n = n.saturating_add(1);
    }
}
