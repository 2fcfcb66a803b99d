use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use log::{debug, warn};

use crate::content_types::{
    override_content_type, remove_dangling_overrides, CONTENT_TYPES_PART,
    WORKBOOK_MACRO_ENABLED_CONTENT_TYPE,
};
use crate::docprops::{strip_sheet_titles, DEFAULT_APP_PROPERTIES_PART};
use crate::openxml::{
    parse_relationships, rels_part_name, remove_relationships, resolve_target, Relationship,
    REL_TYPE_CALC_CHAIN, REL_TYPE_EXTENDED_PROPERTIES, REL_TYPE_OFFICE_DOCUMENT,
    REL_TYPE_PIVOT_TABLE, REL_TYPE_SHARED_STRINGS, ROOT_RELS_PART,
};
use crate::pivots::{pivot_table_cache_id, retain_pivot_caches};
use crate::prune::prune_unreachable_parts;
use crate::shared_strings::{compact_shared_strings, remap_shared_string_cells};
use crate::workbook::{parse_workbook_sheets, retain_single_sheet, WorkbookSheetInfo};
use crate::zip_util::{
    read_zip_entry_limited, read_zip_part_optional, zip_part_names_equivalent, ZipInflateBudget,
    DEFAULT_MAX_ZIP_PART_BYTES, DEFAULT_MAX_ZIP_TOTAL_BYTES,
};
use crate::SplitError;

const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// Size limits enforced while inflating a package into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XlsxPackageLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for XlsxPackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: DEFAULT_MAX_ZIP_PART_BYTES,
            max_total_bytes: DEFAULT_MAX_ZIP_TOTAL_BYTES,
        }
    }
}

/// An XLSX/XLSM package held in memory as raw parts.
///
/// Part names are stored exactly as they appear in the ZIP container. Lookups tolerate a
/// leading `/`, `\` separators and ASCII case differences.
#[derive(Debug, Clone, Default)]
pub struct XlsxPackage {
    parts: BTreeMap<String, Vec<u8>>,
}

impl XlsxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SplitError> {
        Self::from_bytes_limited(bytes, XlsxPackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: XlsxPackageLimits) -> Result<Self, SplitError> {
        Self::from_reader_limited(Cursor::new(bytes), limits)
    }

    pub fn from_reader_limited<R: Read + Seek>(
        reader: R,
        limits: XlsxPackageLimits,
    ) -> Result<Self, SplitError> {
        let mut zip = zip::ZipArchive::new(reader)?;

        let mut parts = BTreeMap::new();
        let mut budget = ZipInflateBudget::new(limits.max_total_bytes);
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }

            let name = file.name().to_string();
            let declared = file.size();
            let buf = read_zip_entry_limited(
                &mut file,
                declared,
                &name,
                limits.max_part_bytes,
                Some(&mut budget),
            )?;
            parts.insert(name, buf);
        }

        Ok(Self { parts })
    }

    /// Read a package from disk.
    pub fn open(path: impl AsRef<Path>, limits: XlsxPackageLimits) -> Result<Self, SplitError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        Self::from_reader_limited(std::io::BufReader::new(file), limits)
    }

    /// The stored name of the part equivalent to `name`, if any.
    pub fn part_key(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.parts.get_key_value(name) {
            return Some(key.as_str());
        }
        if let Some(stripped) = name.strip_prefix('/') {
            if let Some((key, _)) = self.parts.get_key_value(stripped) {
                return Some(key.as_str());
            }
        }
        // Non-canonical producer output (`\` separators, `XL/Workbook.xml`, `/xl/...`).
        self.parts
            .keys()
            .find(|key| zip_part_names_equivalent(key, name))
            .map(String::as_str)
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        let key = self.part_key(name)?;
        self.parts.get(key).map(Vec::as_slice)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    /// Insert or replace a part. An existing equivalent part keeps its stored name.
    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        let key = self
            .part_key(&name)
            .map(str::to_string)
            .unwrap_or(name);
        self.parts.insert(key, bytes);
    }

    pub fn remove_part(&mut self, name: &str) -> Option<Vec<u8>> {
        let key = self.part_key(name)?.to_string();
        self.parts.remove(&key)
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, SplitError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), SplitError> {
        let cursor = Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        // `[Content_Types].xml` goes first; some consumers sniff it at the start of the archive.
        let content_types_key = self.part_key(CONTENT_TYPES_PART);
        if let Some(key) = content_types_key {
            zip.start_file(key, options)?;
            zip.write_all(&self.parts[key])?;
        }
        for (name, bytes) in &self.parts {
            if Some(name.as_str()) == content_types_key {
                continue;
            }
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        let cursor = zip.finish()?;
        w.write_all(&cursor.into_inner())?;
        Ok(())
    }

    fn relationships_of(&self, source: &str) -> Result<Vec<Relationship>, SplitError> {
        let rels_name = rels_part_name(source);
        match self.part(&rels_name) {
            Some(bytes) => parse_relationships(bytes, &rels_name),
            None => Ok(Vec::new()),
        }
    }

    /// Resolve the workbook part through the package root relationships.
    pub fn workbook_part(&self) -> Result<String, SplitError> {
        let root_rels = self
            .part(ROOT_RELS_PART)
            .ok_or_else(|| SplitError::MissingPart(ROOT_RELS_PART.to_string()))?;
        let part = workbook_part_from_root_rels(root_rels)?;
        match self.part_key(&part) {
            Some(key) => Ok(key.to_string()),
            None => Err(SplitError::MissingPart(part)),
        }
    }

    /// Parse the ordered list of workbook sheets.
    pub fn workbook_sheets(&self) -> Result<Vec<WorkbookSheetInfo>, SplitError> {
        let workbook_part = self.workbook_part()?;
        let workbook_xml = self
            .part(&workbook_part)
            .ok_or_else(|| SplitError::MissingPart(workbook_part.clone()))?;
        parse_workbook_sheets(std::str::from_utf8(workbook_xml)?)
    }

    pub fn sheet_names(&self) -> Result<Vec<String>, SplitError> {
        Ok(self
            .workbook_sheets()?
            .into_iter()
            .map(|sheet| sheet.name)
            .collect())
    }

    /// Whether `[Content_Types].xml` declares the workbook as macro-enabled.
    pub fn is_macro_enabled(&self) -> Result<bool, SplitError> {
        let Some(content_types) = self.part(CONTENT_TYPES_PART) else {
            return Ok(false);
        };
        let workbook_part = self.workbook_part()?;
        let content_type = override_content_type(content_types, &workbook_part)?;
        Ok(content_type.as_deref() == Some(WORKBOOK_MACRO_ENABLED_CONTENT_TYPE))
    }

    /// Remove every sheet except `sheet_name` and everything only those sheets used.
    ///
    /// Styles and the theme are not rewritten. The shared-string table is cut down to the
    /// strings the kept sheet uses, which renumbers the sheet's `t="s"` cell values; the rest
    /// of the sheet part is left as is. Pivot caches that no remaining pivot table uses are
    /// dropped.
    pub fn retain_only_sheet(&mut self, sheet_name: &str) -> Result<(), SplitError> {
        let workbook_part = self.workbook_part()?;
        let sheets = self.workbook_sheets()?;
        let keep = sheets
            .iter()
            .position(|sheet| sheet.name == sheet_name)
            .ok_or_else(|| SplitError::SheetNotFound {
                sheet: sheet_name.to_string(),
                available: sheets
                    .iter()
                    .map(|sheet| sheet.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;
        let kept = &sheets[keep];

        let workbook_rels_name = rels_part_name(&workbook_part);
        let relationships = self.relationships_of(&workbook_part)?;
        let rel_by_id: HashMap<&str, &Relationship> = relationships
            .iter()
            .map(|rel| (rel.id.as_str(), rel))
            .collect();
        let kept_rel = rel_by_id.get(kept.rel_id.as_str()).ok_or_else(|| {
            SplitError::Invalid(format!(
                "missing relationship {} for sheet '{}'",
                kept.rel_id, kept.name
            ))
        })?;
        let kept_part = resolve_target(&workbook_part, &kept_rel.target);
        if self.part(&kept_part).is_none() {
            return Err(SplitError::MissingPart(kept_part));
        }
        let kept_caches = self.pivot_cache_ids(&kept_part)?;

        let mut removed_ids: HashSet<String> = sheets
            .iter()
            .filter(|sheet| sheet.rel_id != kept.rel_id)
            .map(|sheet| sheet.rel_id.clone())
            .collect();
        removed_ids.extend(
            relationships
                .iter()
                .filter(|rel| rel.type_uri == REL_TYPE_CALC_CHAIN)
                .map(|rel| rel.id.clone()),
        );

        let workbook_xml = self
            .part(&workbook_part)
            .ok_or_else(|| SplitError::MissingPart(workbook_part.clone()))?;
        let workbook_xml = retain_single_sheet(workbook_xml, &sheets, keep)?;
        let (workbook_xml, dropped_caches) = retain_pivot_caches(&workbook_xml, &kept_caches)?;
        removed_ids.extend(dropped_caches);
        self.set_part(workbook_part.as_str(), workbook_xml);

        if let Some(rels) = self.part(&workbook_rels_name) {
            let rels = remove_relationships(rels, &removed_ids)?;
            self.set_part(workbook_rels_name, rels);
        }

        let pruned = prune_unreachable_parts(self)?;
        debug!(
            "kept sheet '{}' ({kept_part}), pruned {} parts",
            kept.name,
            pruned.len()
        );

        self.shrink_shared_strings(&workbook_part, &kept_part)?;

        if let Some(content_types) = self.part(CONTENT_TYPES_PART) {
            let rewritten = remove_dangling_overrides(content_types, |name| {
                self.part_key(name).is_some()
            })?;
            if let Some(rewritten) = rewritten {
                self.set_part(CONTENT_TYPES_PART, rewritten);
            }
        }

        let app_part = self.app_properties_part()?;
        if let Some(app_xml) = self.part(&app_part) {
            if let Some(stripped) = strip_sheet_titles(app_xml)? {
                self.set_part(app_part, stripped);
            }
        }

        Ok(())
    }

    /// Cache ids of the pivot tables on `sheet_part`.
    fn pivot_cache_ids(&self, sheet_part: &str) -> Result<HashSet<u32>, SplitError> {
        let mut ids = HashSet::new();
        for rel in self.relationships_of(sheet_part)? {
            if rel.type_uri != REL_TYPE_PIVOT_TABLE || rel.is_external() {
                continue;
            }
            let part = resolve_target(sheet_part, &rel.target);
            if let Some(xml) = self.part(&part) {
                ids.extend(pivot_table_cache_id(xml)?);
            }
        }
        Ok(ids)
    }

    fn shrink_shared_strings(
        &mut self,
        workbook_part: &str,
        sheet_part: &str,
    ) -> Result<(), SplitError> {
        let rel = self
            .relationships_of(workbook_part)?
            .into_iter()
            .find(|rel| rel.type_uri == REL_TYPE_SHARED_STRINGS && !rel.is_external());
        let Some(rel) = rel else {
            return Ok(());
        };
        let sst_part = resolve_target(workbook_part, &rel.target);
        let Some(sst_xml) = self.part(&sst_part) else {
            return Ok(());
        };
        let sheet_xml = self
            .part(sheet_part)
            .ok_or_else(|| SplitError::MissingPart(sheet_part.to_string()))?;

        let usage = remap_shared_string_cells(sheet_xml)?;
        let compacted = compact_shared_strings(sst_xml, &usage.order, usage.references)?;
        debug!(
            "kept {} shared strings for {sheet_part} ({} references)",
            usage.order.len(),
            usage.references
        );
        if let Some(sheet_xml) = usage.sheet_xml {
            self.set_part(sheet_part, sheet_xml);
        }
        self.set_part(sst_part, compacted);
        Ok(())
    }

    fn app_properties_part(&self) -> Result<String, SplitError> {
        let rel = self
            .relationships_of("")?
            .into_iter()
            .find(|rel| rel.type_uri == REL_TYPE_EXTENDED_PROPERTIES && !rel.is_external());
        Ok(match rel {
            Some(rel) => resolve_target("", &rel.target),
            None => DEFAULT_APP_PROPERTIES_PART.to_string(),
        })
    }
}

fn workbook_part_from_root_rels(root_rels: &[u8]) -> Result<String, SplitError> {
    let relationships = parse_relationships(root_rels, ROOT_RELS_PART)?;
    let office_document = relationships
        .iter()
        .find(|rel| rel.type_uri == REL_TYPE_OFFICE_DOCUMENT && !rel.is_external());
    match office_document {
        Some(rel) => Ok(resolve_target("", &rel.target)),
        None => {
            warn!("no officeDocument relationship in {ROOT_RELS_PART}, assuming {DEFAULT_WORKBOOK_PART}");
            Ok(DEFAULT_WORKBOOK_PART.to_string())
        }
    }
}

/// Read the ordered sheet list without inflating the whole package.
///
/// Only the root relationships and the workbook part are read from the archive.
pub fn read_workbook_sheets<R: Read + Seek>(
    reader: R,
    limits: XlsxPackageLimits,
) -> Result<Vec<WorkbookSheetInfo>, SplitError> {
    let mut archive = zip::ZipArchive::new(reader)?;

    let workbook_part = match read_zip_part_optional(&mut archive, ROOT_RELS_PART, limits.max_part_bytes)? {
        Some(root_rels) => workbook_part_from_root_rels(&root_rels)?,
        None => {
            warn!("package has no {ROOT_RELS_PART}, assuming {DEFAULT_WORKBOOK_PART}");
            DEFAULT_WORKBOOK_PART.to_string()
        }
    };
    let workbook_xml = read_zip_part_optional(&mut archive, &workbook_part, limits.max_part_bytes)?
        .ok_or(SplitError::MissingPart(workbook_part))?;
    parse_workbook_sheets(std::str::from_utf8(&workbook_xml)?)
}

/// Write a one-part package with the linked ZIP codec and read it back.
pub fn codec_self_check() -> Result<(), SplitError> {
    const SAMPLE_PART: &str = "selfcheck/sample.xml";
    let sample = b"<?xml version=\"1.0\"?><sample>sheetsplit</sample>".repeat(8);

    let mut pkg = XlsxPackage::default();
    pkg.set_part(SAMPLE_PART, sample.clone());
    let bytes = pkg.write_to_bytes()?;
    let reread = XlsxPackage::from_bytes(&bytes)?;
    match reread.part(SAMPLE_PART) {
        Some(bytes) if bytes == sample.as_slice() => Ok(()),
        Some(_) => Err(SplitError::Invalid(
            "zip codec self-check: part content changed after a round trip".to_string(),
        )),
        None => Err(SplitError::MissingPart(SAMPLE_PART.to_string())),
    }
}
