use std::collections::{BTreeSet, HashSet, VecDeque};

use log::{debug, warn};

use crate::content_types::CONTENT_TYPES_PART;
use crate::openxml::{parse_relationships, rels_part_name, resolve_target, ROOT_RELS_PART};
use crate::{SplitError, XlsxPackage};

/// Collect every part reachable from the package root through `.rels` files.
///
/// The result holds stored part names and includes:
/// - `[Content_Types].xml` (never the target of a relationship)
/// - every `.rels` part that belongs to the root or to a reachable part
/// - every internal relationship target that exists in the package, recursively
///
/// External targets and targets missing from the package are skipped. A malformed `.rels`
/// part is logged and treated as having no relationships.
pub fn reachable_parts(pkg: &XlsxPackage) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = BTreeSet::new();
    if let Some(key) = pkg.part_key(CONTENT_TYPES_PART) {
        out.insert(key.to_string());
    }

    // The empty name stands for the package root.
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::from([String::new()]);

    while let Some(source) = queue.pop_front() {
        if !visited.insert(source.clone()) {
            continue;
        }

        let rels_name = rels_part_name(&source);
        let Some(rels_key) = pkg.part_key(&rels_name) else {
            continue;
        };
        out.insert(rels_key.to_string());
        let Some(rels_bytes) = pkg.part(rels_key) else {
            continue;
        };

        let relationships = match parse_relationships(rels_bytes, rels_key) {
            Ok(rels) => rels,
            Err(err) => {
                warn!("ignoring malformed relationships part {rels_key}: {err}");
                continue;
            }
        };

        for rel in relationships {
            if rel.is_external() {
                continue;
            }
            let target = resolve_target(&source, &rel.target);
            if let Some(key) = pkg.part_key(&target) {
                out.insert(key.to_string());
                queue.push_back(key.to_string());
            }
        }
    }

    out
}

/// Remove every part that [`reachable_parts`] does not reach. Returns the removed names.
pub fn prune_unreachable_parts(pkg: &mut XlsxPackage) -> Result<Vec<String>, SplitError> {
    if pkg.part_key(ROOT_RELS_PART).is_none() {
        return Err(SplitError::MissingPart(ROOT_RELS_PART.to_string()));
    }
    let reachable = reachable_parts(pkg);

    let unreachable: Vec<String> = pkg
        .part_names()
        .filter(|name| !reachable.contains(*name))
        .map(str::to_string)
        .collect();
    for name in &unreachable {
        debug!("pruning unreachable part {name}");
        pkg.remove_part(name);
    }
    Ok(unreachable)
}
