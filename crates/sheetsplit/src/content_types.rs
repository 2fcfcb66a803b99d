//! `[Content_Types].xml` helpers.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::SplitError;

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

pub const WORKBOOK_MACRO_ENABLED_CONTENT_TYPE: &str =
    "application/vnd.ms-excel.sheet.macroEnabled.main+xml";

fn override_attrs(e: &BytesStart<'_>) -> Result<(Option<String>, Option<String>), SplitError> {
    let mut part_name = None;
    let mut content_type = None;
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        match local_name(attr.key.as_ref()) {
            b"PartName" => part_name = Some(attr.unescape_value()?.into_owned()),
            b"ContentType" => content_type = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }
    Ok((part_name, content_type))
}

/// Content type declared for `part_name` by an `<Override>` entry.
pub fn override_content_type(
    content_types_xml: &[u8],
    part_name: &str,
) -> Result<Option<String>, SplitError> {
    let wanted = part_name.strip_prefix('/').unwrap_or(part_name);
    let mut reader = Reader::from_reader(content_types_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => return Ok(None),
            Event::Start(ref e) | Event::Empty(ref e)
                if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Override") =>
            {
                if let (Some(name), content_type) = override_attrs(e)? {
                    let name = name.strip_prefix('/').unwrap_or(&name);
                    if crate::zip_util::zip_part_names_equivalent(name, wanted) {
                        return Ok(content_type);
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }
}

/// Rewrite `[Content_Types].xml` without `<Override>` entries for parts that `exists` rejects.
///
/// `<Default>` entries are extension based and are left alone. Returns `Ok(None)` when no entry
/// had to be removed.
pub fn remove_dangling_overrides(
    content_types_xml: &[u8],
    exists: impl Fn(&str) -> bool,
) -> Result<Option<Vec<u8>>, SplitError> {
    let mut reader = Reader::from_reader(content_types_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(content_types_xml.len()));
    let mut buf = Vec::new();

    let mut changed = false;
    let mut skip_depth = 0usize;
    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(_) if skip_depth > 0 => skip_depth += 1,
            Event::End(_) if skip_depth > 0 => skip_depth -= 1,
            _ if skip_depth > 0 => {}
            Event::Start(ref e) | Event::Empty(ref e)
                if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Override") =>
            {
                let is_start = matches!(event, Event::Start(_));
                let dangling = match override_attrs(e)? {
                    (Some(part_name), _) => {
                        !exists(part_name.strip_prefix('/').unwrap_or(&part_name))
                    }
                    (None, _) => false,
                };
                if dangling {
                    changed = true;
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

    if changed {
        Ok(Some(writer.into_inner()))
    } else {
        Ok(None)
    }
}
