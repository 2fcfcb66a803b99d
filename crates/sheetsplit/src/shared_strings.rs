//! Shrinking `xl/sharedStrings.xml` down to the strings one worksheet uses.
//!
//! Cells with `t="s"` store an index into the workbook-wide table. After the other sheets are
//! gone the table still holds their text, so it is rebuilt from the entries the kept sheet
//! references and the sheet's indexes are renumbered to match. `<si>` entries are copied
//! verbatim, rich text runs and phonetic data included.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::SplitError;

/// How a worksheet uses the shared-string table.
#[derive(Debug, Default)]
pub struct SharedStringUse {
    /// Original table indexes in first-use order. The position in this list is the new index.
    pub order: Vec<usize>,
    /// Number of `t="s"` cells.
    pub references: usize,
    /// The worksheet rewritten against the compacted table. `None` when no index moved.
    pub sheet_xml: Option<Vec<u8>>,
}

fn is_shared_string_cell(e: &BytesStart<'_>) -> Result<bool, SplitError> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if attr.key.as_ref() == b"t" {
            return Ok(attr.value.as_ref() == b"s");
        }
    }
    Ok(false)
}

/// Renumber the `t="s"` cells of a worksheet in first-use order.
pub fn remap_shared_string_cells(sheet_xml: &[u8]) -> Result<SharedStringUse, SplitError> {
    let mut reader = Reader::from_reader(sheet_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(sheet_xml.len()));
    let mut buf = Vec::new();

    let mut usage = SharedStringUse::default();
    let mut new_index: HashMap<usize, usize> = HashMap::new();
    let mut moved = false;
    let mut in_shared_cell = false;
    let mut in_value = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let mut replacement = None;
        match &event {
            Event::Eof => break,
            Event::Start(e) if local_name(e.name().as_ref()) == b"c" => {
                in_shared_cell = is_shared_string_cell(e)?;
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"c" => in_shared_cell = false,
            Event::Start(e) if in_shared_cell && local_name(e.name().as_ref()) == b"v" => {
                in_value = true;
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"v" => in_value = false,
            Event::Text(text) if in_value => {
                let raw = text.unescape()?;
                let old = raw.trim().parse::<usize>().map_err(|_| {
                    SplitError::Invalid(format!("shared string index {:?} is not a number", raw.trim()))
                })?;
                let next = usage.order.len();
                let order = &mut usage.order;
                let new = *new_index.entry(old).or_insert_with(|| {
                    order.push(old);
                    next
                });
                usage.references += 1;
                moved |= new != old;
                replacement = Some(new.to_string());
            }
            _ => {}
        }

        match replacement {
            Some(value) => writer.write_event(Event::Text(BytesText::new(&value)))?,
            None => writer.write_event(event)?,
        }
        buf.clear();
    }

    if moved {
        usage.sheet_xml = Some(writer.into_inner());
    }
    Ok(usage)
}

fn with_counts(
    e: &BytesStart<'_>,
    count: usize,
    unique_count: usize,
) -> Result<BytesStart<'static>, SplitError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        match attr.key.as_ref() {
            b"count" => out.push_attribute(("count", count.to_string().as_str())),
            b"uniqueCount" => {
                out.push_attribute(("uniqueCount", unique_count.to_string().as_str()))
            }
            _ => out.push_attribute((attr.key.as_ref(), attr.value.as_ref())),
        }
    }
    Ok(out)
}

/// Rewrite a shared-string table so it holds only the entries in `order`, in that order.
///
/// `count`/`uniqueCount` on `<sst>` are updated when present. Everything outside the `<si>`
/// entries (namespaces, `extLst`) is kept.
pub fn compact_shared_strings(
    sst_xml: &[u8],
    order: &[usize],
    references: usize,
) -> Result<Vec<u8>, SplitError> {
    let mut reader = Reader::from_reader(sst_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(sst_xml.len()));
    let mut buf = Vec::new();

    let mut items: Vec<Vec<u8>> = Vec::new();
    let mut item: Option<Writer<Vec<u8>>> = None;
    let mut item_depth = 0usize;
    // Where the kept entries go in the output.
    let mut insert_at: Option<usize> = None;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        if let Some(current) = item.as_mut() {
            match &event {
                Event::Start(_) => item_depth += 1,
                Event::End(_) => item_depth -= 1,
                Event::Eof => {
                    return Err(SplitError::Invalid(
                        "unterminated <si> in shared strings".to_string(),
                    ))
                }
                _ => {}
            }
            current.write_event(event)?;
            if item_depth == 0 {
                if let Some(done) = item.take() {
                    items.push(done.into_inner());
                }
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(ref e) if local_name(e.name().as_ref()) == b"si" => {
                insert_at.get_or_insert(writer.get_ref().len());
                let mut current = Writer::new(Vec::new());
                current.write_event(Event::Start(e.to_owned()))?;
                item = Some(current);
                item_depth = 1;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"si" => {
                insert_at.get_or_insert(writer.get_ref().len());
                let mut current = Writer::new(Vec::new());
                current.write_event(Event::Empty(e.to_owned()))?;
                items.push(current.into_inner());
            }
            Event::Start(ref e) if local_name(e.name().as_ref()) == b"sst" => {
                writer.write_event(Event::Start(with_counts(e, references, order.len())?))?;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"sst" => {
                writer.write_event(Event::Empty(with_counts(e, references, order.len())?))?;
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"sst" => {
                insert_at.get_or_insert(writer.get_ref().len());
                writer.write_event(Event::End(e))?;
            }
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    if let Some(&missing) = order.iter().find(|&&idx| idx >= items.len()) {
        return Err(SplitError::Invalid(format!(
            "shared string index {missing} out of range ({} strings)",
            items.len()
        )));
    }

    let mut out = writer.into_inner();
    let kept: Vec<u8> = order
        .iter()
        .flat_map(|&idx| items[idx].iter().copied())
        .collect();
    let at = insert_at.unwrap_or(out.len());
    out.splice(at..at, kept);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const SST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="6" uniqueCount="4"><si><t>Region</t></si><si><t>CEO salary 9,999,999</t></si><si><r><rPr><b/></rPr><t>North</t></r><r><t xml:space="preserve"> &amp; South</t></r></si><si><t>hello</t></si></sst>"#;

    const SHEET: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" s="1" t="s"><v>3</v></c><c r="B1" t="s"><v>0</v></c><c r="C1"><v>3</v></c></row><row r="2"><c r="A2" t="s"><v>3</v></c><c r="B2" t="str"><f>A1</f><v>hello</v></c><c r="C2" t="s"><v>2</v></c></row></sheetData></worksheet>"#;

    #[test]
    fn renumbers_shared_string_cells_in_first_use_order() {
        let usage = remap_shared_string_cells(SHEET.as_bytes()).unwrap();
        assert_eq!(usage.order, vec![3, 0, 2]);
        assert_eq!(usage.references, 4);

        let sheet = String::from_utf8(usage.sheet_xml.unwrap()).unwrap();
        assert_eq!(
            sheet,
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" s="1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1"><v>3</v></c></row><row r="2"><c r="A2" t="s"><v>0</v></c><c r="B2" t="str"><f>A1</f><v>hello</v></c><c r="C2" t="s"><v>2</v></c></row></sheetData></worksheet>"#
        );
    }

    #[test]
    fn sheet_is_left_alone_when_indexes_do_not_move() {
        let sheet = r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="A2" t="s"><v>1</v></c><c r="A3" t="s"><v>0</v></c></row></sheetData></worksheet>"#;
        let usage = remap_shared_string_cells(sheet.as_bytes()).unwrap();
        assert_eq!(usage.order, vec![0, 1]);
        assert_eq!(usage.references, 3);
        assert!(usage.sheet_xml.is_none());
    }

    #[test]
    fn non_numeric_index_is_an_error() {
        let sheet = r#"<worksheet><sheetData><row><c t="s"><v>x</v></c></row></sheetData></worksheet>"#;
        let err = remap_shared_string_cells(sheet.as_bytes()).unwrap_err();
        assert!(matches!(err, SplitError::Invalid(_)), "{err:?}");
    }

    #[test]
    fn compacted_table_keeps_only_used_entries() {
        let out = compact_shared_strings(SST.as_bytes(), &[3, 0, 2], 4).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="4" uniqueCount="3"><si><t>hello</t></si><si><t>Region</t></si><si><r><rPr><b/></rPr><t>North</t></r><r><t xml:space="preserve"> &amp; South</t></r></si></sst>"#
        );
    }

    #[test]
    fn empty_selection_leaves_an_empty_table() {
        let out = compact_shared_strings(SST.as_bytes(), &[], 0).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"count="0" uniqueCount="0"></sst>"#), "{out}");
        assert!(!out.contains("<si>"), "{out}");
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let err = compact_shared_strings(SST.as_bytes(), &[7], 1).unwrap_err();
        assert!(
            matches!(err, SplitError::Invalid(ref msg) if msg.contains("out of range")),
            "{err:?}"
        );
    }
}
