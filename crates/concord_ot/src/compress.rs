//! History compression.

use crate::operation::{Operation, OperationKind};
use std::collections::BTreeMap;

/// Default window in which adjacent operations may be merged.
pub const DEFAULT_COMPRESS_WINDOW_MS: u64 = 1000;

/// Merges adjacent operations by the same user issued within `window_ms`
/// of each other.
///
/// Merged pairs are abutting inserts, forward or backward delete runs,
/// updates of one node and repeated writes to one attribute. The merged
/// operation keeps the first id and the last timestamp. Applying the output
/// always produces the same document as applying the input.
pub fn compress_operations(ops: &[Operation], window_ms: u64) -> Vec<Operation> {
    let mut out: Vec<Operation> = Vec::with_capacity(ops.len());
    for op in ops {
        let merged = out.last().and_then(|prev| {
            if prev.user_id != op.user_id
                || op.timestamp < prev.timestamp
                || op.timestamp - prev.timestamp > window_ms
            {
                return None;
            }
            merge(&prev.kind, &op.kind).map(|kind| Operation {
                id: prev.id.clone(),
                user_id: prev.user_id.clone(),
                timestamp: op.timestamp,
                kind,
            })
        });
        match merged {
            Some(m) => {
                if let Some(last) = out.last_mut() {
                    *last = m;
                }
            }
            None => out.push(op.clone()),
        }
    }
    out
}

fn concat(first: &Option<String>, second: &Option<String>) -> Option<String> {
    match (first, second) {
        (Some(a), Some(b)) => Some(format!("{a}{b}")),
        _ => None,
    }
}

fn merge(prev: &OperationKind, next: &OperationKind) -> Option<OperationKind> {
    use OperationKind::*;

    match (prev, next) {
        (
            Insert { position: p, text: s },
            Insert { position: q, text: t },
        ) => {
            if *q == p + s.chars().count() {
                Some(Insert {
                    position: *p,
                    text: format!("{s}{t}"),
                })
            } else if q == p {
                Some(Insert {
                    position: *p,
                    text: format!("{t}{s}"),
                })
            } else {
                None
            }
        }
        (
            Delete {
                position: p,
                length: n,
                removed: r1,
            },
            Delete {
                position: q,
                length: m,
                removed: r2,
            },
        ) => {
            if q == p {
                Some(Delete {
                    position: *p,
                    length: n + m,
                    removed: concat(r1, r2),
                })
            } else if q + m == *p {
                Some(Delete {
                    position: *q,
                    length: n + m,
                    removed: concat(r2, r1),
                })
            } else {
                None
            }
        }
        (
            UpdateNode {
                node: a,
                fields: f1,
                previous: p1,
            },
            UpdateNode {
                node: b,
                fields: f2,
                previous: p2,
            },
        ) if a == b => {
            let mut fields = f1.clone();
            fields.extend(f2.iter().map(|(k, v)| (k.clone(), v.clone())));
            let previous = match (p1, p2) {
                (Some(p1), Some(p2)) => {
                    let mut merged: BTreeMap<_, _> = p2.clone();
                    merged.extend(p1.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Some(merged)
                }
                _ => None,
            };
            Some(UpdateNode {
                node: a.clone(),
                fields,
                previous,
            })
        }
        (prev, next) => merge_attribute(prev, next),
    }
}

fn merge_attribute(prev: &OperationKind, next: &OperationKind) -> Option<OperationKind> {
    use OperationKind::*;

    let (node, name, previous) = match prev {
        SetAttribute {
            node,
            name,
            previous,
            ..
        }
        | RemoveAttribute {
            node,
            name,
            previous,
        } => (node, name, previous),
        _ => return None,
    };

    match next {
        SetAttribute {
            node: n2,
            name: a2,
            value,
            ..
        } if n2 == node && a2 == name => Some(SetAttribute {
            node: node.clone(),
            name: name.clone(),
            value: value.clone(),
            previous: previous.clone(),
        }),
        RemoveAttribute {
            node: n2, name: a2, ..
        } if n2 == node && a2 == name => Some(RemoveAttribute {
            node: node.clone(),
            name: name.clone(),
            previous: previous.clone(),
        }),
        _ => None,
    }
}
