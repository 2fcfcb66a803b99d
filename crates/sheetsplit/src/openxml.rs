//! Open Packaging Convention relationship helpers.

use std::collections::HashSet;

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use roxmltree::Document;

use crate::SplitError;

pub const REL_TYPE_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub const REL_TYPE_EXTENDED_PROPERTIES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties";
pub const REL_TYPE_CALC_CHAIN: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain";
pub const REL_TYPE_SHARED_STRINGS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
pub const REL_TYPE_PIVOT_TABLE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotTable";

/// Name of the relationships part that belongs to the package root.
pub const ROOT_RELS_PART: &str = "_rels/.rels";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }
}

/// Relationships part for `part_name`. The package root is the empty part name.
pub fn rels_part_name(part_name: &str) -> String {
    let part_name = part_name.strip_prefix('/').unwrap_or(part_name);
    let (dir, file) = part_name.rsplit_once('/').unwrap_or(("", part_name));
    if dir.is_empty() {
        format!("_rels/{file}.rels")
    } else {
        format!("{dir}/_rels/{file}.rels")
    }
}

/// Resolve a relationship target against the part that owns the relationship.
pub fn resolve_target(base_part: &str, target: &str) -> String {
    // Relationship targets are URIs; OPC part names do not include fragments.
    let target = target
        .split_once('#')
        .map(|(base, _)| base)
        .unwrap_or(target);
    if target.is_empty() {
        return base_part
            .strip_prefix('/')
            .unwrap_or(base_part)
            .to_string();
    }

    // Absolute targets are rooted at the package root.
    let (target, is_absolute) = match target.strip_prefix('/') {
        Some(target) => (target, true),
        None => (target, false),
    };
    let base_dir = if is_absolute {
        ""
    } else {
        base_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    };

    let mut components: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            _ => components.push(segment),
        }
    }

    components.join("/")
}

pub fn parse_relationships(xml: &[u8], part_name: &str) -> Result<Vec<Relationship>, SplitError> {
    let xml = std::str::from_utf8(xml)?;
    let doc = Document::parse(xml)
        .map_err(|e| SplitError::Invalid(format!("{part_name}: {e}")))?;

    let mut rels = Vec::new();
    for node in doc.descendants().filter(|n| n.is_element()) {
        if node.tag_name().name() != "Relationship" {
            continue;
        }

        let (Some(id), Some(type_uri), Some(target)) = (
            node.attribute("Id"),
            node.attribute("Type"),
            node.attribute("Target"),
        ) else {
            continue;
        };
        rels.push(Relationship {
            id: id.to_string(),
            type_uri: type_uri.to_string(),
            target: target.to_string(),
            target_mode: node.attribute("TargetMode").map(str::to_string),
        });
    }

    Ok(rels)
}

/// Rewrite a `.rels` part without the relationships whose `Id` is in `ids`.
pub fn remove_relationships(xml: &[u8], ids: &HashSet<String>) -> Result<Vec<u8>, SplitError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));

    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(_) if skip_depth > 0 => skip_depth += 1,
            Event::End(_) if skip_depth > 0 => skip_depth -= 1,
            _ if skip_depth > 0 => {}
            Event::Empty(ref e) | Event::Start(ref e)
                if local_name(e.name().as_ref()) == b"Relationship" =>
            {
                let mut id = None;
                for attr in e.attributes().with_checks(false) {
                    let attr = attr?;
                    if local_name(attr.key.as_ref()) == b"Id" {
                        id = Some(attr.unescape_value()?.into_owned());
                    }
                }
                let is_start = matches!(event, Event::Start(_));
                if id.is_some_and(|id| ids.contains(&id)) {
                    if is_start {
                        skip_depth = 1;
                    }
                } else if is_start {
                    writer.write_event(Event::Start(e.to_owned()))?;
                } else {
                    writer.write_event(Event::Empty(e.to_owned()))?;
                }
            }
            other => writer.write_event(other.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

pub fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKBOOK_RELS: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com" TargetMode="External"/></Relationships>"#;

    #[test]
    fn rels_part_name_for_root_and_nested_parts() {
        assert_eq!(rels_part_name(""), ROOT_RELS_PART);
        assert_eq!(rels_part_name("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
        assert_eq!(
            rels_part_name("/xl/worksheets/sheet1.xml"),
            "xl/worksheets/_rels/sheet1.xml.rels"
        );
    }

    #[test]
    fn resolve_target_relative_absolute_and_dot_segments() {
        assert_eq!(resolve_target("", "xl/workbook.xml"), "xl/workbook.xml");
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "../drawings/drawing1.xml"),
            "xl/drawings/drawing1.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "/xl/worksheets/./sheet2.xml"),
            "xl/worksheets/sheet2.xml"
        );
        assert_eq!(
            resolve_target("xl/metadata.xml", "richData/rd1.xml#frag"),
            "xl/richData/rd1.xml"
        );
        assert_eq!(resolve_target("/xl/metadata.xml", "#frag"), "xl/metadata.xml");
    }

    #[test]
    fn parse_relationships_captures_target_mode() {
        let rels = parse_relationships(WORKBOOK_RELS, "xl/_rels/workbook.xml.rels").unwrap();
        assert_eq!(rels.len(), 4);
        assert_eq!(rels[0].id, "rId1");
        assert_eq!(rels[0].target, "worksheets/sheet1.xml");
        assert!(!rels[0].is_external());
        assert_eq!(rels[3].target_mode.as_deref(), Some("External"));
        assert!(rels[3].is_external());
    }

    #[test]
    fn remove_relationships_drops_only_requested_ids() {
        let ids: HashSet<String> = ["rId2".to_string()].into_iter().collect();
        let out = remove_relationships(WORKBOOK_RELS, &ids).unwrap();

        let rels = parse_relationships(&out, "xl/_rels/workbook.xml.rels").unwrap();
        let kept: Vec<&str> = rels.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(kept, vec!["rId1", "rId3", "rId4"]);

        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(!text.contains("sheet2.xml"));
    }

    #[test]
    fn remove_relationships_handles_prefixed_elements() {
        let xml = br#"<pr:Relationships xmlns:pr="http://schemas.openxmlformats.org/package/2006/relationships"><pr:Relationship Id="rId1" Type="t" Target="a.xml"></pr:Relationship><pr:Relationship Id="rId2" Type="t" Target="b.xml"/></pr:Relationships>"#;
        let ids: HashSet<String> = ["rId1".to_string()].into_iter().collect();
        let out = remove_relationships(xml, &ids).unwrap();
        let text = std::str::from_utf8(&out).unwrap();
        assert!(!text.contains("a.xml"), "{text}");
        assert!(text.contains("b.xml"), "{text}");
    }
}
