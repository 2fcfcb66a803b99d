use std::io::{Read, Seek};

use zip::ZipArchive;

use crate::SplitError;

/// Default maximum uncompressed size permitted for any single ZIP part inflated into memory.
///
/// Guards against ZIP bombs (tiny compressed size, huge uncompressed size) and forged ZIP
/// metadata (e.g. an incorrect `uncompressed_size` field).
pub(crate) const DEFAULT_MAX_ZIP_PART_BYTES: u64 = 256 * 1024 * 1024; // 256MiB

/// Default maximum total uncompressed bytes permitted when a whole package is inflated.
pub(crate) const DEFAULT_MAX_ZIP_TOTAL_BYTES: u64 = 512 * 1024 * 1024; // 512MiB

/// Canonical form of a part name for case- and separator-insensitive comparison:
/// - percent-decodes valid `%xx` sequences
/// - strips leading path separators (`/` or `\`), including when percent-encoded
/// - normalizes `\` to `/`
/// - ASCII-lowercases
pub(crate) fn zip_part_name_lookup_key(name: &str) -> Vec<u8> {
    fn hex_val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let mut bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_leading_separators = true;
    while let Some(&b) = bytes.first() {
        let decoded = if b == b'%' && bytes.len() >= 3 {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[1]), hex_val(bytes[2])) {
                bytes = &bytes[3..];
                (hi << 4) | lo
            } else {
                bytes = &bytes[1..];
                b
            }
        } else {
            bytes = &bytes[1..];
            b
        };

        if in_leading_separators && matches!(decoded, b'/' | b'\\') {
            continue;
        }
        in_leading_separators = false;

        let normalized = if decoded == b'\\' {
            b'/'
        } else {
            decoded.to_ascii_lowercase()
        };
        out.push(normalized);
    }
    out
}

pub(crate) fn zip_part_names_equivalent(a: &str, b: &str) -> bool {
    zip_part_name_lookup_key(a) == zip_part_name_lookup_key(b)
}

/// Find the archive index for a part name, tolerating common producer mistakes:
/// - leading `/` mismatch
/// - Windows-style `\` path separators
/// - ASCII case differences
///
/// An exact match always wins over an equivalent one.
pub(crate) fn find_zip_part<R: Read + Seek>(archive: &ZipArchive<R>, name: &str) -> Option<usize> {
    let mut candidate = None::<usize>;
    for (idx, entry) in archive.file_names().enumerate() {
        if entry == name {
            return archive.index_for_name(entry).or(Some(idx));
        }
        if candidate.is_none() && zip_part_names_equivalent(entry, name) {
            candidate = archive.index_for_name(entry).or(Some(idx));
        }
    }
    candidate
}

#[derive(Debug, Clone)]
pub(crate) struct ZipInflateBudget {
    max_total_bytes: u64,
    used_bytes: u64,
}

impl ZipInflateBudget {
    pub(crate) fn new(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes,
            used_bytes: 0,
        }
    }

    fn remaining_bytes(&self) -> u64 {
        self.max_total_bytes.saturating_sub(self.used_bytes)
    }

    fn consume(&mut self, bytes: u64) -> Result<(), SplitError> {
        self.used_bytes = self.used_bytes.checked_add(bytes).unwrap_or(u64::MAX);
        if self.used_bytes > self.max_total_bytes {
            return Err(SplitError::PackageTooLarge {
                total: self.used_bytes,
                max: self.max_total_bytes,
            });
        }
        Ok(())
    }
}

/// Inflate a ZIP entry into memory with an uncompressed size limit.
///
/// The declared size is checked first, then the read itself is capped at `max + 1` bytes so
/// forged metadata cannot cause an unbounded allocation.
pub(crate) fn read_zip_entry_limited(
    entry: &mut impl Read,
    declared_size: u64,
    part: &str,
    max_part_bytes: u64,
    mut budget: Option<&mut ZipInflateBudget>,
) -> Result<Vec<u8>, SplitError> {
    if declared_size > max_part_bytes {
        return Err(SplitError::PartTooLarge {
            part: part.to_string(),
            size: declared_size,
            max: max_part_bytes,
        });
    }

    let remaining_total = budget
        .as_ref()
        .map(|b| b.remaining_bytes())
        .unwrap_or(u64::MAX);
    let effective_max = max_part_bytes.min(remaining_total);

    let mut buf = Vec::new();
    let read_limit = effective_max.checked_add(1).unwrap_or(u64::MAX);
    entry.take(read_limit).read_to_end(&mut buf)?;

    let observed = buf.len() as u64;
    if let Some(budget) = budget.as_mut() {
        budget.consume(observed)?;
    }
    if observed > max_part_bytes {
        return Err(SplitError::PartTooLarge {
            part: part.to_string(),
            size: observed,
            max: max_part_bytes,
        });
    }

    Ok(buf)
}

/// Read a single part by name, returning `Ok(None)` when the entry does not exist.
pub(crate) fn read_zip_part_optional<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    max_part_bytes: u64,
) -> Result<Option<Vec<u8>>, SplitError> {
    let Some(idx) = find_zip_part(archive, name) else {
        return Ok(None);
    };
    let mut file = archive.by_index(idx)?;
    if file.is_dir() {
        return Ok(None);
    }
    let declared = file.size();
    let buf = read_zip_entry_limited(&mut file, declared, name, max_part_bytes, None)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Cursor, Write};

    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let cursor = Cursor::new(Vec::new());
        let mut zip = ZipWriter::new(cursor);
        let options =
            FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn equivalent_handles_case_separators_and_leading_slashes() {
        assert!(zip_part_names_equivalent("XL\\Workbook.xml", "xl/workbook.xml"));
        assert!(zip_part_names_equivalent("/xl/workbook.xml", "xl/workbook.xml"));
        assert!(zip_part_names_equivalent("\\xl\\workbook.xml", "xl/workbook.xml"));
        assert!(!zip_part_names_equivalent("xl/workbook.xml", "xl/workbook2.xml"));
    }

    #[test]
    fn equivalent_handles_percent_encoded_names() {
        assert!(zip_part_names_equivalent(
            "xl/worksheets/sheet 1.xml",
            "xl/worksheets/sheet%201.xml"
        ));
        assert!(zip_part_names_equivalent(
            "xl/worksheets/sheet1.xml",
            "%2Fxl%2Fworksheets%2Fsheet1.xml"
        ));
    }

    #[test]
    fn read_part_prefers_exact_over_equivalent() {
        let bytes = build_zip(&[
            ("XL\\Workbook.xml", b"equivalent"),
            ("xl/workbook.xml", b"exact"),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let part = read_zip_part_optional(&mut archive, "xl/workbook.xml", 1024)
            .unwrap()
            .unwrap();
        assert_eq!(part, b"exact");
    }

    #[test]
    fn read_part_handles_leading_slash_variant() {
        let bytes = build_zip(&[("/xl/workbook.xml", b"with_slash")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let part = read_zip_part_optional(&mut archive, "xl/workbook.xml", 1024)
            .unwrap()
            .unwrap();
        assert_eq!(part, b"with_slash");
    }

    #[test]
    fn read_part_missing_is_none() {
        let bytes = build_zip(&[("a.txt", b"hello")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert!(read_zip_part_optional(&mut archive, "b.txt", 1024)
            .unwrap()
            .is_none());
    }

    #[test]
    fn read_part_errors_when_too_large() {
        let bytes = build_zip(&[("a.txt", b"hello world")]); // 11 bytes
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let err = read_zip_part_optional(&mut archive, "a.txt", 10).unwrap_err();
        match err {
            SplitError::PartTooLarge { part, .. } => assert_eq!(part, "a.txt"),
            other => panic!("expected PartTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn budget_rejects_total_over_limit() {
        let mut budget = ZipInflateBudget::new(8);
        let mut first: &[u8] = b"12345";
        read_zip_entry_limited(&mut first, 5, "a", 100, Some(&mut budget)).unwrap();

        let mut second: &[u8] = b"67890";
        let err = read_zip_entry_limited(&mut second, 5, "b", 100, Some(&mut budget)).unwrap_err();
        assert!(
            matches!(err, SplitError::PackageTooLarge { max: 8, .. }),
            "unexpected error: {err:?}"
        );
    }
}
