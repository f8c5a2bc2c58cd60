use super::error::{PdfError, PdfResult};
use super::primitives::{Dict, PdfObject, Ref};
use super::xref::XRef;
use log::debug;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// Preloads every byte range needed to walk the subgraph reachable from the
/// given keys of a dictionary, so later synchronous traversal cannot hit
/// `DataMissing`.
///
/// The walk is depth-first with a visited-ref set. References whose fetch
/// fails on missing bytes are parked; each round batches the pending ranges
/// into one loader request, re-arms the parked refs and walks again until
/// nothing is pending.
pub struct ObjectLoader;

impl ObjectLoader {
    pub fn load(xref: &mut XRef, dict: &Dict, keys: &[&str]) -> PdfResult<()> {
        // Fully resident (or not progressively loaded at all): nothing to do.
        if xref.stream_is_loaded() {
            return Ok(());
        }

        let mut ref_set: FxHashSet<Ref> = FxHashSet::default();
        let mut nodes: Vec<PdfObject> = keys
            .iter()
            .filter_map(|key| dict.get_raw(key).cloned())
            .collect();

        let mut rounds = 0;
        loop {
            let mut pending: SmallVec<[(usize, usize); 8]> = SmallVec::new();
            let mut revisit: Vec<Ref> = Vec::new();

            while let Some(node) = nodes.pop() {
                match node {
                    PdfObject::Reference(r) => {
                        if !ref_set.insert(r) {
                            continue;
                        }
                        match xref.fetch(r) {
                            Ok(obj) => nodes.push((*obj).clone()),
                            Err(PdfError::DataMissing { begin, end }) => {
                                revisit.push(r);
                                pending.push((begin, end));
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    PdfObject::Dictionary(dict) => {
                        push_children(&mut nodes, dict.values());
                    }
                    PdfObject::Array(items) => {
                        push_children(&mut nodes, items.iter());
                    }
                    PdfObject::Stream(stream) => {
                        push_children(&mut nodes, stream.dict.values());
                    }
                    _ => {}
                }
            }

            if pending.is_empty() {
                return Ok(());
            }

            rounds += 1;
            debug!(
                "object loader: round {} requesting {} ranges",
                rounds,
                pending.len()
            );
            xref.request_ranges(&pending)?;

            // The parked refs get fetched again now that their bytes exist.
            for r in revisit {
                ref_set.remove(&r);
                nodes.push(PdfObject::Reference(r));
            }
        }
    }
}

fn may_have_children(obj: &PdfObject) -> bool {
    matches!(
        obj,
        PdfObject::Reference(_)
            | PdfObject::Dictionary(_)
            | PdfObject::Array(_)
            | PdfObject::Stream(_)
    )
}

fn push_children<'a>(nodes: &mut Vec<PdfObject>, children: impl Iterator<Item = &'a PdfObject>) {
    for child in children {
        if may_have_children(child) {
            nodes.push(child.clone());
        }
    }
}
