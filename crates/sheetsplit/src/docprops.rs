//! Extended document properties (`docProps/app.xml`).
//!
//! `HeadingPairs` and `TitlesOfParts` cache the sheet list of the workbook that produced the
//! file. After sheets are removed the cache is stale, so both vectors are dropped and Excel
//! rebuilds them on the next save.

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::SplitError;

pub const DEFAULT_APP_PROPERTIES_PART: &str = "docProps/app.xml";

const STALE_ELEMENTS: [&[u8]; 2] = [b"HeadingPairs", b"TitlesOfParts"];

/// Strip the cached sheet titles from an extended properties part.
///
/// Returns `Ok(None)` when the part does not carry them.
pub fn strip_sheet_titles(app_xml: &[u8]) -> Result<Option<Vec<u8>>, SplitError> {
    let mut reader = Reader::from_reader(app_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(app_xml.len()));
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
            Event::Start(ref e) if STALE_ELEMENTS.contains(&local_name(e.name().as_ref())) => {
                changed = true;
                skip_depth = 1;
            }
            Event::Empty(ref e) if STALE_ELEMENTS.contains(&local_name(e.name().as_ref())) => {
                changed = true;
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

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn drops_heading_pairs_and_titles() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties" xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes"><Application>Microsoft Excel</Application><HeadingPairs><vt:vector size="2" baseType="variant"><vt:variant><vt:lpstr>Worksheets</vt:lpstr></vt:variant><vt:variant><vt:i4>2</vt:i4></vt:variant></vt:vector></HeadingPairs><TitlesOfParts><vt:vector size="2" baseType="lpstr"><vt:lpstr>Jan</vt:lpstr><vt:lpstr>Feb</vt:lpstr></vt:vector></TitlesOfParts><Company>Acme</Company></Properties>"#;

        let out = strip_sheet_titles(xml.as_bytes()).unwrap().expect("changed");
        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties" xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes"><Application>Microsoft Excel</Application><Company>Acme</Company></Properties>"#
        );
    }

    #[test]
    fn untouched_without_sheet_titles() {
        let xml = br#"<Properties><Application>Microsoft Excel</Application></Properties>"#;
        assert!(strip_sheet_titles(xml).unwrap().is_none());
    }
}
