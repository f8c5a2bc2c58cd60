use super::error::{PdfError, PdfResult};
use super::primitives::{Dict, PdfObject};
use super::xref::XRef;
use indexmap::IndexMap;
use log::warn;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

/// Trees nested deeper than this are treated as not-found; a sane balanced
/// tree never gets close, a corrupt self-referential one would not terminate.
const MAX_TREE_DEPTH: usize = 10;

/// Name tree: balanced lookup structure with byte-string keys and `Names`
/// leaf arrays of alternating keys and values.
pub struct NameTree {
    root: PdfObject,
}

impl NameTree {
    pub fn new(root: PdfObject) -> Self {
        NameTree { root }
    }

    /// Single-key lookup by `Limits`-guided descent with a binary search at
    /// the leaf. Falls back to a warned linear scan for out-of-order leaves.
    pub fn get(&self, xref: &mut XRef, key: &[u8]) -> PdfResult<Option<PdfObject>> {
        tree_get(xref, &self.root, "Names", &parse_name_key, &key.to_vec())
    }

    /// Full enumeration. Values are returned raw (references unresolved).
    pub fn get_all(&self, xref: &mut XRef) -> PdfResult<IndexMap<Vec<u8>, PdfObject>> {
        let mut map = IndexMap::new();
        for (key_obj, value) in tree_get_all(xref, &self.root, "Names")? {
            match key_obj {
                PdfObject::String(bytes) => {
                    map.insert(bytes, value);
                }
                other => warn!("name tree: ignoring non-string key {:?}", other),
            }
        }
        Ok(map)
    }
}

/// Number tree: the same structure keyed by integers with `Nums` leaves.
pub struct NumberTree {
    root: PdfObject,
}

impl NumberTree {
    pub fn new(root: PdfObject) -> Self {
        NumberTree { root }
    }

    pub fn get(&self, xref: &mut XRef, key: i64) -> PdfResult<Option<PdfObject>> {
        tree_get(xref, &self.root, "Nums", &parse_number_key, &key)
    }

    pub fn get_all(&self, xref: &mut XRef) -> PdfResult<IndexMap<i64, PdfObject>> {
        let mut map = IndexMap::new();
        for (key_obj, value) in tree_get_all(xref, &self.root, "Nums")? {
            match key_obj.as_i64() {
                Some(key) => {
                    map.insert(key, value);
                }
                None => warn!("number tree: ignoring non-integer key {:?}", key_obj),
            }
        }
        Ok(map)
    }
}

fn parse_name_key(obj: &PdfObject) -> Option<Vec<u8>> {
    obj.as_string_bytes().map(<[u8]>::to_vec)
}

fn parse_number_key(obj: &PdfObject) -> Option<i64> {
    obj.as_i64()
}

/// Resolves the two-element `Limits` of an intermediate node.
fn node_limits<K>(
    xref: &mut XRef,
    node: &Dict,
    parse_key: &dyn Fn(&PdfObject) -> Option<K>,
) -> PdfResult<Option<(K, K)>> {
    let Some(limits) = node.get_array(xref, "Limits")? else {
        return Ok(None);
    };
    if limits.len() < 2 {
        return Ok(None);
    }
    let low = xref.fetch_if_ref(&limits[0])?;
    let high = xref.fetch_if_ref(&limits[1])?;
    Ok(match (parse_key(&low), parse_key(&high)) {
        (Some(low), Some(high)) => Some((low, high)),
        _ => None,
    })
}

fn tree_get<K: Ord>(
    xref: &mut XRef,
    root: &PdfObject,
    leaf_key: &str,
    parse_key: &dyn Fn(&PdfObject) -> Option<K>,
    target: &K,
) -> PdfResult<Option<PdfObject>> {
    let mut node = match xref.fetch_if_ref(root)? {
        PdfObject::Dictionary(dict) => dict,
        _ => return Ok(None),
    };

    // Descend to the leaf that may hold the key, binary-searching the kids
    // through their Limits intervals.
    let mut depth = 0;
    while node.has("Kids") {
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            warn!("name/number tree exceeds depth {}, giving up", MAX_TREE_DEPTH);
            return Ok(None);
        }

        let Some(kids) = node.get_array(xref, "Kids")? else {
            return Ok(None);
        };
        if kids.is_empty() {
            return Ok(None);
        }

        let mut lo: isize = 0;
        let mut hi: isize = kids.len() as isize - 1;
        let mut next: Option<Dict> = None;
        while lo <= hi {
            let mid = (lo + hi) / 2;
            let kid = match xref.fetch_if_ref(&kids[mid as usize])? {
                PdfObject::Dictionary(dict) => dict,
                _ => return Ok(None),
            };
            let Some((low, high)) = node_limits(xref, &kid, parse_key)? else {
                warn!("name/number tree node without usable Limits");
                return Ok(None);
            };
            if *target < low {
                hi = mid - 1;
            } else if *target > high {
                lo = mid + 1;
            } else {
                next = Some(kid);
                break;
            }
        }
        match next {
            Some(kid) => node = kid,
            None => return Ok(None),
        }
    }

    let Some(entries) = node.get_array(xref, leaf_key)? else {
        return Ok(None);
    };

    // Binary search over the even (key) slots.
    let pair_count = entries.len() / 2;
    if pair_count > 0 {
        let mut lo: isize = 0;
        let mut hi: isize = pair_count as isize - 1;
        while lo <= hi {
            let mid = (lo + hi) / 2;
            let key_obj = xref.fetch_if_ref(&entries[2 * mid as usize])?;
            let Some(key) = parse_key(&key_obj) else {
                break;
            };
            if *target < key {
                hi = mid - 1;
            } else if *target > key {
                lo = mid + 1;
            } else {
                let value = xref.fetch_if_ref(&entries[2 * mid as usize + 1])?;
                return Ok(Some(value));
            }
        }
    }

    // Corrupt files ship unsorted leaves; a linear pass still finds the key.
    for pair in entries.chunks_exact(2) {
        let key_obj = xref.fetch_if_ref(&pair[0])?;
        if parse_key(&key_obj).as_ref() == Some(target) {
            warn!("name/number tree key found by linear fallback (unsorted leaf)");
            return Ok(Some(xref.fetch_if_ref(&pair[1])?));
        }
    }

    Ok(None)
}

/// Breadth-first enumeration of every leaf pair. Kids are deduplicated by
/// reference; revisiting one means the tree is cyclic, which is a hard
/// format error rather than an infinite loop.
fn tree_get_all(
    xref: &mut XRef,
    root: &PdfObject,
    leaf_key: &str,
) -> PdfResult<Vec<(PdfObject, PdfObject)>> {
    let mut out = Vec::new();
    let mut processed = FxHashSet::default();
    if let Some(r) = root.as_reference() {
        processed.insert(r);
    }

    let root_dict = match xref.fetch_if_ref(root)? {
        PdfObject::Dictionary(dict) => dict,
        _ => return Ok(out),
    };

    let mut queue = VecDeque::new();
    queue.push_back(root_dict);

    while let Some(node) = queue.pop_front() {
        if node.has("Kids") {
            let Some(kids) = node.get_array(xref, "Kids")? else {
                continue;
            };
            for kid in &kids {
                if let Some(r) = kid.as_reference() {
                    if !processed.insert(r) {
                        return Err(PdfError::format(
                            "duplicate entries in name/number tree",
                        ));
                    }
                }
                if let PdfObject::Dictionary(dict) = xref.fetch_if_ref(kid)? {
                    queue.push_back(dict);
                }
            }
            continue;
        }

        if let Some(entries) = node.get_array(xref, leaf_key)? {
            for pair in entries.chunks_exact(2) {
                let key = xref.fetch_if_ref(&pair[0])?;
                out.push((key, pair[1].clone()));
            }
        }
    }

    Ok(out)
}
