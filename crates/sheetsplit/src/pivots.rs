//! Pivot cache bookkeeping for the workbook part.

use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::SplitError;

/// The `cacheId` a pivot table definition part points at.
pub fn pivot_table_cache_id(xml: &[u8]) -> Result<Option<u32>, SplitError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e)
                if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"pivotTableDefinition") =>
            {
                return Ok(pivot_cache_attrs(e)?.0);
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn pivot_cache_attrs(e: &BytesStart<'_>) -> Result<(Option<u32>, Option<String>), SplitError> {
    let mut cache_id = None;
    let mut rel_id = None;
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        let key = local_name(attr.key.as_ref());
        if key.eq_ignore_ascii_case(b"cacheId") {
            cache_id = attr.unescape_value()?.trim().parse::<u32>().ok();
        } else if key.eq_ignore_ascii_case(b"id") {
            rel_id = Some(attr.unescape_value()?.into_owned());
        }
    }
    Ok((cache_id, rel_id))
}

/// Drop the workbook's `<pivotCache>` entries whose `cacheId` is not in `keep`.
///
/// Returns the rewritten workbook part and the relationship ids of the dropped caches. The
/// `<pivotCaches>` element is removed when no cache is left. Entries without a parsable
/// `cacheId` are kept, and so are the extension lists under `extLst`.
pub fn retain_pivot_caches(
    workbook_xml: &[u8],
    keep: &HashSet<u32>,
) -> Result<(Vec<u8>, HashSet<String>), SplitError> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(workbook_xml.len()));
    let mut buf = Vec::new();

    let mut dropped = HashSet::new();
    let mut depth = 0usize;
    let mut skip_depth = 0usize;
    let mut caches_start: Option<BytesStart<'static>> = None;
    let mut kept: Vec<Event<'static>> = Vec::new();
    let mut kept_caches = 0usize;

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
            Event::Start(e)
                if depth == 1 && local_name(e.name().as_ref()) == b"pivotCaches" =>
            {
                depth += 1;
                caches_start = Some(e.into_owned());
                kept.clear();
                kept_caches = 0;
            }
            Event::End(e)
                if depth == 2
                    && caches_start.is_some()
                    && local_name(e.name().as_ref()) == b"pivotCaches" =>
            {
                depth -= 1;
                if let Some(start) = caches_start.take() {
                    if kept_caches > 0 {
                        writer.write_event(Event::Start(start))?;
                        for event in kept.drain(..) {
                            writer.write_event(event)?;
                        }
                        writer.write_event(Event::End(e))?;
                    }
                }
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if depth == 2
                    && caches_start.is_some()
                    && local_name(e.name().as_ref()) == b"pivotCache" =>
            {
                let is_start = matches!(event, Event::Start(_));
                let (cache_id, rel_id) = pivot_cache_attrs(e)?;
                if matches!(cache_id, Some(id) if !keep.contains(&id)) {
                    dropped.extend(rel_id);
                    if is_start {
                        skip_depth = 1;
                    }
                } else {
                    kept_caches += 1;
                    if is_start {
                        depth += 1;
                        kept.push(Event::Start(e.clone().into_owned()));
                    } else {
                        kept.push(Event::Empty(e.clone().into_owned()));
                    }
                }
            }
            other if caches_start.is_some() => {
                match &other {
                    Event::Start(_) => depth += 1,
                    Event::End(_) => depth = depth.saturating_sub(1),
                    _ => {}
                }
                kept.push(other.into_owned());
            }
            other => {
                match &other {
                    Event::Start(_) => depth += 1,
                    Event::End(_) => depth = depth.saturating_sub(1),
                    _ => {}
                }
                writer.write_event(other)?;
            }
        }
        buf.clear();
    }

    Ok((writer.into_inner(), dropped))
}
