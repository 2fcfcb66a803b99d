//! Reading and rewriting the sheet list of `xl/workbook.xml`.

use std::collections::HashSet;

use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::SplitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSheetInfo {
    pub name: String,
    pub rel_id: String,
}

/// Parse the ordered `<sheet>` entries of a workbook part.
pub fn parse_workbook_sheets(workbook_xml: &str) -> Result<Vec<WorkbookSheetInfo>, SplitError> {
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    let mut in_sheets = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"sheets" => in_sheets = true,
            Event::End(e) if e.local_name().as_ref() == b"sheets" => in_sheets = false,
            Event::Empty(e) | Event::Start(e)
                if in_sheets && e.local_name().as_ref() == b"sheet" =>
            {
                sheets.push(parse_sheet_element(&e)?);
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

// `sheetId` and `state` are not needed to locate a sheet and are left unvalidated.
fn parse_sheet_element(e: &BytesStart<'_>) -> Result<WorkbookSheetInfo, SplitError> {
    let mut name: Option<String> = None;
    let mut rel_id: Option<String> = None;

    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        match key {
            b"name" => name = Some(attr.unescape_value()?.to_string()),
            _ if local_name(key) == b"id" => rel_id = Some(attr.unescape_value()?.to_string()),
            _ => {}
        }
    }

    Ok(WorkbookSheetInfo {
        name: name.ok_or(SplitError::MissingAttr("name"))?,
        rel_id: rel_id.ok_or(SplitError::MissingAttr("r:id"))?,
    })
}

/// Rewrite a workbook part so that `sheets[keep]` is its only sheet.
///
/// Besides dropping the other `<sheet>` entries this:
/// - clears `state` on the kept sheet (a workbook needs one visible sheet)
/// - removes `activeTab`/`firstSheet` from `<workbookView>`
/// - drops defined names scoped to removed sheets and re-scopes the kept sheet's names to index 0
/// - drops workbook-scoped defined names whose formula references a removed sheet
/// - removes `<definedNames>` entirely when nothing is left in it
pub fn retain_single_sheet(
    workbook_xml: &[u8],
    sheets: &[WorkbookSheetInfo],
    keep: usize,
) -> Result<Vec<u8>, SplitError> {
    let removed: HashSet<String> = sheets
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != keep)
        .map(|(_, sheet)| sheet.name.to_lowercase())
        .collect();

    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(workbook_xml.len()));
    let mut buf = Vec::new();

    let mut in_sheets = false;
    let mut sheet_pos = 0usize;
    let mut skip_depth = 0usize;

    // `<definedNames>` is buffered so it can be dropped when it ends up empty.
    let mut defined_names_start: Option<BytesStart<'static>> = None;
    let mut kept_names: Vec<Event<'static>> = Vec::new();
    let mut name_start: Option<BytesStart<'static>> = None;
    let mut name_body: Vec<Event<'static>> = Vec::new();
    let mut name_formula = String::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Eof => break,

            Event::End(e)
                if name_start.is_some() && local_name(e.name().as_ref()) == b"definedName" =>
            {
                if let Some(start) = name_start.take() {
                    let retargeted =
                        retarget_defined_name(&start, keep, &removed, &name_formula)?;
                    if let Some(start) = retargeted {
                        kept_names.push(Event::Start(start));
                        kept_names.append(&mut name_body);
                        kept_names.push(Event::End(e.into_owned()));
                    }
                }
                name_body.clear();
                name_formula.clear();
            }
            Event::Text(e) if name_start.is_some() => {
                name_formula.push_str(&e.unescape()?);
                name_body.push(Event::Text(e.into_owned()));
            }
            Event::CData(e) if name_start.is_some() => {
                name_formula.push_str(std::str::from_utf8(&e)?);
                name_body.push(Event::CData(e.into_owned()));
            }
            other if name_start.is_some() => name_body.push(other.into_owned()),

            Event::Start(e) if local_name(e.name().as_ref()) == b"definedNames" => {
                defined_names_start = Some(e.into_owned());
                kept_names.clear();
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"definedNames" => {}
            Event::End(e)
                if defined_names_start.is_some()
                    && local_name(e.name().as_ref()) == b"definedNames" =>
            {
                if let Some(start) = defined_names_start.take() {
                    if !kept_names.is_empty() {
                        writer.write_event(Event::Start(start))?;
                        for kept in kept_names.drain(..) {
                            writer.write_event(kept)?;
                        }
                        writer.write_event(Event::End(e))?;
                    }
                }
            }
            Event::Start(e)
                if defined_names_start.is_some()
                    && local_name(e.name().as_ref()) == b"definedName" =>
            {
                name_start = Some(e.into_owned());
            }
            Event::Empty(e)
                if defined_names_start.is_some()
                    && local_name(e.name().as_ref()) == b"definedName" =>
            {
                if let Some(start) = retarget_defined_name(&e, keep, &removed, "")? {
                    kept_names.push(Event::Empty(start));
                }
            }
            // Whitespace and comments between defined names.
            _ if defined_names_start.is_some() => {}

            Event::Start(e) if local_name(e.name().as_ref()) == b"sheets" => {
                in_sheets = true;
                writer.write_event(Event::Start(e))?;
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"sheets" => {
                in_sheets = false;
                writer.write_event(Event::End(e))?;
            }
            Event::Empty(ref e) | Event::Start(ref e)
                if in_sheets && local_name(e.name().as_ref()) == b"sheet" =>
            {
                let is_start = matches!(event, Event::Start(_));
                let pos = sheet_pos;
                sheet_pos += 1;
                if pos == keep {
                    let kept = copy_without_attributes(e, &[b"state"])?;
                    if is_start {
                        writer.write_event(Event::Start(kept))?;
                    } else {
                        writer.write_event(Event::Empty(kept))?;
                    }
                } else if is_start {
                    skip_depth = 1;
                }
            }
            Event::Empty(ref e) | Event::Start(ref e)
                if local_name(e.name().as_ref()) == b"workbookView" =>
            {
                let view = copy_without_attributes(e, &[b"activeTab", b"firstSheet"])?;
                if matches!(event, Event::Start(_)) {
                    writer.write_event(Event::Start(view))?;
                } else {
                    writer.write_event(Event::Empty(view))?;
                }
            }
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn copy_without_attributes(
    e: &BytesStart<'_>,
    dropped: &[&[u8]],
) -> Result<BytesStart<'static>, SplitError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if dropped.contains(&local_name(attr.key.as_ref())) {
            continue;
        }
        out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
    }
    Ok(out)
}

/// Decide what happens to one `<definedName>` start tag. `None` drops the name.
fn retarget_defined_name(
    e: &BytesStart<'_>,
    keep: usize,
    removed: &HashSet<String>,
    formula: &str,
) -> Result<Option<BytesStart<'static>>, SplitError> {
    let mut name = String::new();
    let mut local_sheet_id = None;
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        match local_name(attr.key.as_ref()) {
            b"name" => name = attr.unescape_value()?.into_owned(),
            b"localSheetId" => local_sheet_id = attr.unescape_value()?.trim().parse::<usize>().ok(),
            _ => {}
        }
    }

    match local_sheet_id {
        Some(idx) if idx != keep => {
            debug!("dropping defined name {name:?} scoped to removed sheet #{idx}");
            Ok(None)
        }
        Some(_) => {
            let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
            let mut out = BytesStart::new(tag);
            for attr in e.attributes().with_checks(false) {
                let attr = attr?;
                if local_name(attr.key.as_ref()) == b"localSheetId" {
                    out.push_attribute((attr.key.as_ref(), b"0".as_slice()));
                } else {
                    out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
                }
            }
            Ok(Some(out))
        }
        None => {
            let dangling = referenced_sheet_names(formula)
                .iter()
                .any(|sheet| removed.contains(&sheet.to_lowercase()));
            if dangling {
                debug!("dropping defined name {name:?} referencing a removed sheet: {formula}");
                Ok(None)
            } else {
                Ok(Some(e.clone().into_owned()))
            }
        }
    }
}

/// Sheet names referenced by a formula (`Sheet1!A1`, `'My Sheet'!A1`, `Jan:Mar!A1`).
///
/// References into external workbooks (`[1]Sheet1!A1`) and `#REF!` are ignored.
pub(crate) fn referenced_sheet_names(formula: &str) -> Vec<String> {
    fn push_names(token: &str, out: &mut Vec<String>) {
        if token.contains(']') {
            return;
        }
        out.extend(
            token
                .split(':')
                .filter(|part| !part.is_empty())
                .map(str::to_string),
        );
    }

    let chars: Vec<char> = formula.chars().collect();
    let mut out = Vec::new();
    let mut word = String::new();
    let mut word_prefix: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '"' => {
                // String literal; `""` is an escaped quote.
                i += 1;
                while i < chars.len() {
                    if chars[i] == '"' {
                        if chars.get(i + 1) == Some(&'"') {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                word.clear();
            }
            '\'' => {
                let mut quoted = String::new();
                i += 1;
                while i < chars.len() {
                    if chars[i] == '\'' {
                        if chars.get(i + 1) == Some(&'\'') {
                            quoted.push('\'');
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    quoted.push(chars[i]);
                    i += 1;
                }
                if chars.get(i + 1) == Some(&'!') {
                    push_names(&quoted, &mut out);
                }
                word.clear();
            }
            '!' => {
                if !word.is_empty() && !matches!(word_prefix, Some(']') | Some('#')) {
                    push_names(&word, &mut out);
                }
                word.clear();
            }
            c if c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '\\') => {
                if word.is_empty() {
                    word_prefix = i.checked_sub(1).map(|prev| chars[prev]);
                }
                word.push(c);
            }
            _ => word.clear(),
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const WORKBOOK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView xWindow="240" yWindow="15" windowWidth="16095" windowHeight="9660" activeTab="2" firstSheet="1"/></bookViews><sheets><sheet name="Jan" sheetId="1" r:id="rId1"/><sheet name="Feb" sheetId="2" state="hidden" r:id="rId2"/><sheet name="Q1 &amp; Q2" sheetId="5" r:id="rId3"/></sheets><definedNames><definedName name="_xlnm.Print_Area" localSheetId="0">Jan!$A$1:$B$10</definedName><definedName name="_xlnm.Print_Area" localSheetId="1">Feb!$A$1:$C$4</definedName><definedName name="FebTotal">Feb!$B$5</definedName><definedName name="Rate">0.25</definedName><definedName name="Both">'Q1 &amp; Q2'!$A$1</definedName></definedNames><calcPr calcId="191029"/></workbook>"#;

    fn sheets() -> Vec<WorkbookSheetInfo> {
        parse_workbook_sheets(WORKBOOK_XML).unwrap()
    }

    #[test]
    fn parses_sheets_in_order() {
        let sheets = sheets();
        assert_eq!(
            sheets,
            vec![
                WorkbookSheetInfo {
                    name: "Jan".to_string(),
                    rel_id: "rId1".to_string(),
                },
                WorkbookSheetInfo {
                    name: "Feb".to_string(),
                    rel_id: "rId2".to_string(),
                },
                WorkbookSheetInfo {
                    name: "Q1 & Q2".to_string(),
                    rel_id: "rId3".to_string(),
                },
            ]
        );
    }

    #[test]
    fn malformed_sheet_id_does_not_block_enumeration() {
        let xml = r#"<workbook xmlns:r="r"><sheets><sheet name="A" sheetId="x" r:id="rId1"/><sheet name="B" r:id="rId2"/></sheets></workbook>"#;
        let names: Vec<String> = parse_workbook_sheets(xml)
            .unwrap()
            .into_iter()
            .map(|sheet| sheet.name)
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn missing_relationship_id_is_an_error() {
        let xml = r#"<workbook><sheets><sheet name="A" sheetId="1"/></sheets></workbook>"#;
        let err = parse_workbook_sheets(xml).unwrap_err();
        assert!(matches!(err, SplitError::MissingAttr("r:id")), "{err:?}");
    }

    #[test]
    fn retain_first_sheet() {
        let out = retain_single_sheet(WORKBOOK_XML.as_bytes(), &sheets(), 0).unwrap();
        let out = String::from_utf8(out).unwrap();

        let remaining = parse_workbook_sheets(&out).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "Jan");

        assert!(out.contains(r#"<definedName name="_xlnm.Print_Area" localSheetId="0">Jan!$A$1:$B$10</definedName>"#), "{out}");
        assert!(!out.contains("Feb!"), "{out}");
        assert!(!out.contains("Q1 &amp; Q2"), "{out}");
        assert!(out.contains(r#"<definedName name="Rate">0.25</definedName>"#), "{out}");
        assert!(!out.contains("activeTab"), "{out}");
        assert!(!out.contains("firstSheet"), "{out}");
        assert!(out.contains(r#"windowWidth="16095""#), "{out}");
        assert!(out.contains(r#"<calcPr calcId="191029"/>"#), "{out}");
    }

    #[test]
    fn retain_hidden_sheet_makes_it_visible_and_rescopes_names() {
        let out = retain_single_sheet(WORKBOOK_XML.as_bytes(), &sheets(), 1).unwrap();
        let out = String::from_utf8(out).unwrap();

        let remaining = parse_workbook_sheets(&out).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "Feb");
        assert!(!out.contains("state="), "{out}");

        assert!(out.contains(r#"<definedName name="_xlnm.Print_Area" localSheetId="0">Feb!$A$1:$C$4</definedName>"#), "{out}");
        assert!(out.contains(r#"<definedName name="FebTotal">Feb!$B$5</definedName>"#), "{out}");
        assert!(!out.contains("Jan!"), "{out}");
    }

    #[test]
    fn retain_sheet_with_escaped_name_keeps_references_to_it() {
        let out = retain_single_sheet(WORKBOOK_XML.as_bytes(), &sheets(), 2).unwrap();
        let out = String::from_utf8(out).unwrap();

        let remaining = parse_workbook_sheets(&out).unwrap();
        assert_eq!(remaining[0].name, "Q1 & Q2");
        assert!(out.contains(r#"<definedName name="Both">'Q1 &amp; Q2'!$A$1</definedName>"#), "{out}");
        assert!(!out.contains("_xlnm.Print_Area"), "{out}");
    }

    #[test]
    fn empty_defined_names_container_is_removed() {
        let xml = r#"<workbook xmlns:r="r"><sheets><sheet name="A" sheetId="1" r:id="rId1"/><sheet name="B" sheetId="2" r:id="rId2"/></sheets><definedNames><definedName name="OnlyB">B!$A$1</definedName></definedNames></workbook>"#;
        let sheets = parse_workbook_sheets(xml).unwrap();
        let out = retain_single_sheet(xml.as_bytes(), &sheets, 0).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            r#"<workbook xmlns:r="r"><sheets><sheet name="A" sheetId="1" r:id="rId1"/></sheets></workbook>"#
        );
    }

    #[test]
    fn referenced_sheet_names_handles_quoting_and_ranges() {
        assert_eq!(referenced_sheet_names("Sheet1!$A$1"), vec!["Sheet1"]);
        assert_eq!(
            referenced_sheet_names("SUM('My ''Best'' Sheet'!A1:B2)"),
            vec!["My 'Best' Sheet"]
        );
        assert_eq!(referenced_sheet_names("SUM(Jan:Mar!B2)"), vec!["Jan", "Mar"]);
        assert_eq!(
            referenced_sheet_names("Jan!A1+Feb!A1"),
            vec!["Jan", "Feb"]
        );
    }

    #[test]
    fn referenced_sheet_names_ignores_literals_external_and_ref_errors() {
        assert!(referenced_sheet_names("\"Jan!A1\"").is_empty());
        assert!(referenced_sheet_names("[1]Jan!A1").is_empty());
        assert!(referenced_sheet_names("'[Book.xlsx]Jan'!A1").is_empty());
        assert!(referenced_sheet_names("#REF!").is_empty());
        assert!(referenced_sheet_names("0.25").is_empty());
    }
}
