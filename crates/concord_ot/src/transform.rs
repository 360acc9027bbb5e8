//! Operational transform.
//!
//! Insert, delete and replace share one algebra: each is a replacement of
//! `length` characters at `position` by `text`. For two such edits `x` and
//! `r` generated against the same text, `x` rewritten against `r` removes
//! what `x` removed and nothing `r` already removed, swallows what `r`
//! inserted inside the range `x` deletes, and keeps its own insertion in the
//! order decided by rank. This gives convergence for every pair.
//!
//! Moves are handled on a best-effort basis: the moved span and its
//! destination are mapped through the other edit, and two overlapping moves
//! keep only the earlier-ranked one.

use crate::ids::NodeId;
use crate::operation::{Operation, OperationKind, RemovedNode};
use serde_json::Value;
use std::collections::BTreeMap;

/// Transforms two concurrent operations against each other.
///
/// Returns `(a', b')` where `a'` applies after `b` and `b'` applies after
/// `a`. Two operations with the same id are the same edit delivered twice;
/// both come back voided.
pub fn transform(a: &Operation, b: &Operation) -> (Operation, Operation) {
    if a.id == b.id {
        return (a.voided(), b.voided());
    }
    (transform_against(a, b), transform_against(b, a))
}

/// Rewrites `op` so that it applies to a document on which `reference` has
/// already been applied. Pairings that do not interact return `op`
/// unchanged.
pub fn transform_against(op: &Operation, reference: &Operation) -> Operation {
    if op.is_noop() || reference.is_noop() {
        return op.clone();
    }
    if op.id == reference.id {
        return op.voided();
    }

    let op_first = op.precedes(reference);
    let kind = if let Some(edit) = TextEdit::from_kind(&op.kind) {
        text_against(edit, &op.kind, &reference.kind, op_first)
    } else {
        match &op.kind {
            OperationKind::Move { from, length, to } => {
                move_against(*from, *length, *to, &reference.kind, op_first)
            }
            OperationKind::SetAttribute { .. } | OperationKind::RemoveAttribute { .. } => {
                attribute_against(&op.kind, &reference.kind, op_first)
            }
            OperationKind::UpdateNode { .. } => update_against(&op.kind, &reference.kind, op_first),
            OperationKind::CreateNode { .. } => create_against(&op.kind, &reference.kind, op_first),
            OperationKind::DeleteNode { .. } => delete_against(&op.kind, &reference.kind),
            other => other.clone(),
        }
    };
    op.with_kind(kind)
}

#[derive(Debug, Clone)]
struct TextEdit {
    position: usize,
    length: usize,
    text: String,
    removed: Option<String>,
}

impl TextEdit {
    fn from_kind(kind: &OperationKind) -> Option<Self> {
        match kind {
            OperationKind::Insert { position, text } => Some(Self {
                position: *position,
                length: 0,
                text: text.clone(),
                removed: Some(String::new()),
            }),
            OperationKind::Delete {
                position,
                length,
                removed,
            } => Some(Self {
                position: *position,
                length: *length,
                text: String::new(),
                removed: removed.clone(),
            }),
            OperationKind::Replace {
                position,
                length,
                text,
                replaced,
            } => Some(Self {
                position: *position,
                length: *length,
                text: text.clone(),
                removed: replaced.clone(),
            }),
            _ => None,
        }
    }

    fn text_len(&self) -> usize {
        self.text.chars().count()
    }

    fn into_kind(self, original: &OperationKind) -> OperationKind {
        if self.length == 0 && self.text.is_empty() {
            return OperationKind::Noop;
        }
        let is_replace = matches!(original, OperationKind::Replace { .. });
        if !is_replace && self.length == 0 {
            OperationKind::Insert {
                position: self.position,
                text: self.text,
            }
        } else if !is_replace && self.text.is_empty() {
            OperationKind::Delete {
                position: self.position,
                length: self.length,
                removed: self.removed,
            }
        } else {
            OperationKind::Replace {
                position: self.position,
                length: self.length,
                text: self.text,
                replaced: self.removed,
            }
        }
    }
}

fn take(s: &Option<String>, n: usize) -> Option<String> {
    s.as_ref().map(|s| s.chars().take(n).collect())
}

fn skip(s: &Option<String>, n: usize) -> Option<String> {
    s.as_ref().map(|s| s.chars().skip(n).collect())
}

fn edit_against_edit(x: &TextEdit, r: &TextEdit, x_first: bool) -> TextEdit {
    let (p, n) = (x.position, x.length);
    let (q, m) = (r.position, r.length);
    let t = r.text_len();

    if p == q {
        // Shorter range goes first, rank breaks ties.
        if n < m || (n == m && x_first) {
            TextEdit {
                position: p,
                length: 0,
                text: x.text.clone(),
                removed: Some(String::new()),
            }
        } else {
            TextEdit {
                position: p + t,
                length: n - m,
                text: x.text.clone(),
                removed: skip(&x.removed, m),
            }
        }
    } else if p < q {
        if q < p + n {
            let removed = match (take(&x.removed, q - p), skip(&x.removed, q + m - p)) {
                (Some(head), Some(tail)) => Some(format!("{head}{}{tail}", r.text)),
                _ => None,
            };
            TextEdit {
                position: p,
                length: (q - p) + t + (p + n).saturating_sub(q + m),
                text: x.text.clone(),
                removed,
            }
        } else {
            x.clone()
        }
    } else if p < q + m {
        TextEdit {
            position: q + t,
            length: (p + n).saturating_sub(q + m),
            text: String::new(),
            removed: skip(&x.removed, q + m - p),
        }
    } else {
        TextEdit {
            position: p - m + t,
            ..x.clone()
        }
    }
}

/// Maps a position through a text edit. A point inside the replaced range
/// lands after the new text; a point at the start of a non-empty range
/// stays before it.
fn map_point(x: usize, r: &TextEdit) -> usize {
    let (q, m, t) = (r.position, r.length, r.text_len());
    if x < q || (x == q && m > 0) {
        x
    } else if x < q + m || x == q {
        q + t
    } else {
        x - m + t
    }
}

fn cut_point(x: usize, from: usize, length: usize) -> usize {
    if x <= from {
        x
    } else if x >= from + length {
        x - length
    } else {
        from
    }
}

fn map_point_through_move(x: usize, from: usize, length: usize, to: usize) -> usize {
    if x > from && x < from + length {
        return to + (x - from);
    }
    let c = cut_point(x, from, length);
    if c <= to {
        c
    } else {
        c + length
    }
}

fn text_against(
    edit: TextEdit,
    original: &OperationKind,
    reference: &OperationKind,
    op_first: bool,
) -> OperationKind {
    if let Some(r) = TextEdit::from_kind(reference) {
        return edit_against_edit(&edit, &r, op_first).into_kind(original);
    }
    match reference {
        OperationKind::Move { from, length, to } => {
            edit_against_move(&edit, *from, *length, *to).into_kind(original)
        }
        _ => original.clone(),
    }
}

fn edit_against_move(x: &TextEdit, from: usize, length: usize, to: usize) -> TextEdit {
    if length == 0 || to == from {
        return x.clone();
    }
    let (p, n) = (x.position, x.length);
    let inside = if n > 0 {
        p >= from && p + n <= from + length
    } else {
        p > from && p < from + length
    };
    if inside {
        return TextEdit {
            position: to + (p - from),
            ..x.clone()
        };
    }

    let start = cut_point(p, from, length);
    let end = cut_point(p + n, from, length);
    let removed = x.removed.as_ref().map(|r| {
        r.chars()
            .enumerate()
            .filter(|(i, _)| p + i < from || p + i >= from + length)
            .map(|(_, c)| c)
            .collect::<String>()
    });

    if n == 0 {
        let position = if start <= to { start } else { start + length };
        return TextEdit {
            position,
            length: 0,
            text: x.text.clone(),
            removed,
        };
    }

    if to <= start {
        TextEdit {
            position: start + length,
            length: end - start,
            text: x.text.clone(),
            removed,
        }
    } else if to >= end {
        TextEdit {
            position: start,
            length: end - start,
            text: x.text.clone(),
            removed,
        }
    } else {
        // The moved span lands inside the range; keep the part before it.
        TextEdit {
            position: start,
            length: to - start,
            text: x.text.clone(),
            removed: take(&removed, to - start),
        }
    }
}

fn move_against(
    from: usize,
    length: usize,
    to: usize,
    reference: &OperationKind,
    op_first: bool,
) -> OperationKind {
    let unchanged = OperationKind::Move { from, length, to };
    let origin = if to <= from { to } else { to + length };

    let (new_from, new_length, mapped) = if let Some(r) = TextEdit::from_kind(reference) {
        let span = TextEdit {
            position: from,
            length,
            text: String::new(),
            removed: None,
        };
        let span = edit_against_edit(&span, &r, op_first);
        (span.position, span.length, map_point(origin, &r))
    } else if let OperationKind::Move {
        from: f2,
        length: l2,
        to: d2,
    } = reference
    {
        let (f2, l2, d2) = (*f2, *l2, *d2);
        if from < f2 + l2 && f2 < from + length {
            return if op_first {
                unchanged
            } else {
                OperationKind::Noop
            };
        }
        let mut start = cut_point(from, f2, l2);
        let mut end = cut_point(from + length, f2, l2);
        if d2 <= start {
            start += l2;
            end += l2;
        } else if d2 < end {
            end += l2;
        }
        (start, end - start, map_point_through_move(origin, f2, l2, d2))
    } else {
        return unchanged;
    };

    if new_length == 0 {
        return OperationKind::Noop;
    }
    let to = if mapped <= new_from {
        mapped
    } else if mapped >= new_from + new_length {
        mapped - new_length
    } else {
        new_from
    };
    OperationKind::Move {
        from: new_from,
        length: new_length,
        to,
    }
}

/// Returns true if a delete of `root` (with optional captured subtree)
/// removes `target`.
fn covers(root: &NodeId, removed: &Option<RemovedNode>, target: &NodeId) -> bool {
    match removed {
        Some(r) => r.node.contains(target),
        None => root == target,
    }
}

fn attribute_against(kind: &OperationKind, reference: &OperationKind, op_first: bool) -> OperationKind {
    let (node, name) = match kind {
        OperationKind::SetAttribute { node, name, .. }
        | OperationKind::RemoveAttribute { node, name, .. } => (node, name),
        other => return other.clone(),
    };

    let winner_value = match reference {
        OperationKind::SetAttribute {
            node: n2,
            name: a2,
            value,
            ..
        } if n2 == node && a2 == name => Some(value.clone()),
        OperationKind::RemoveAttribute {
            node: n2, name: a2, ..
        } if n2 == node && a2 == name => None,
        OperationKind::DeleteNode { node: n2, removed } if covers(n2, removed, node) => {
            return OperationKind::Noop;
        }
        _ => return kind.clone(),
    };

    if op_first {
        return OperationKind::Noop;
    }
    match kind {
        OperationKind::SetAttribute {
            node, name, value, ..
        } => OperationKind::SetAttribute {
            node: node.clone(),
            name: name.clone(),
            value: value.clone(),
            previous: winner_value,
        },
        OperationKind::RemoveAttribute { node, name, .. } => OperationKind::RemoveAttribute {
            node: node.clone(),
            name: name.clone(),
            previous: winner_value,
        },
        other => other.clone(),
    }
}

fn update_against(kind: &OperationKind, reference: &OperationKind, op_first: bool) -> OperationKind {
    let OperationKind::UpdateNode {
        node,
        fields,
        previous,
    } = kind
    else {
        return kind.clone();
    };

    match reference {
        OperationKind::DeleteNode { node: n2, removed } if covers(n2, removed, node) => {
            OperationKind::Noop
        }
        OperationKind::UpdateNode {
            node: n2,
            fields: other,
            ..
        } if n2 == node => {
            if op_first {
                // Fields the later writer also set are dropped.
                let fields: BTreeMap<_, _> = fields
                    .iter()
                    .filter(|(k, _)| !other.contains_key(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if fields.is_empty() {
                    return OperationKind::Noop;
                }
                let previous = previous.as_ref().map(|p| {
                    p.iter()
                        .filter(|(k, _)| fields.contains_key(*k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                });
                OperationKind::UpdateNode {
                    node: node.clone(),
                    fields,
                    previous,
                }
            } else {
                let previous = previous.as_ref().map(|p| {
                    let mut p = p.clone();
                    for (k, v) in other {
                        if fields.contains_key(k) {
                            p.insert(k.clone(), v.clone());
                        }
                    }
                    p
                });
                OperationKind::UpdateNode {
                    node: node.clone(),
                    fields: fields.clone(),
                    previous,
                }
            }
        }
        _ => kind.clone(),
    }
}

fn create_against(kind: &OperationKind, reference: &OperationKind, op_first: bool) -> OperationKind {
    let OperationKind::CreateNode {
        parent,
        index,
        node,
    } = kind
    else {
        return kind.clone();
    };

    let index = match reference {
        OperationKind::DeleteNode { node: n2, removed } => {
            if let Some(p) = parent {
                if covers(n2, removed, p) {
                    return OperationKind::Noop;
                }
            }
            match removed {
                Some(r) if r.parent == *parent && r.index < *index => index - 1,
                _ => *index,
            }
        }
        OperationKind::CreateNode {
            parent: p2,
            index: i2,
            node: spec,
        } => {
            let other_ids = spec.ids();
            if node.ids().iter().any(|id| other_ids.contains(id)) {
                return if op_first {
                    kind.clone()
                } else {
                    OperationKind::Noop
                };
            }
            if p2 == parent && (*i2 < *index || (*i2 == *index && !op_first)) {
                index + 1
            } else {
                *index
            }
        }
        _ => *index,
    };

    OperationKind::CreateNode {
        parent: parent.clone(),
        index,
        node: node.clone(),
    }
}

fn delete_against(kind: &OperationKind, reference: &OperationKind) -> OperationKind {
    let OperationKind::DeleteNode { node, removed } = kind else {
        return kind.clone();
    };

    if let OperationKind::DeleteNode {
        node: n2,
        removed: r2,
    } = reference
    {
        if covers(n2, r2, node) {
            return OperationKind::Noop;
        }
    }

    let Some(mut snapshot) = removed.clone() else {
        return kind.clone();
    };

    match reference {
        OperationKind::DeleteNode {
            node: n2,
            removed: r2,
        } => {
            if !snapshot.node.remove_descendant(n2) {
                if let Some(r2) = r2 {
                    if r2.parent == snapshot.parent && r2.index < snapshot.index {
                        snapshot.index -= 1;
                    }
                }
            }
        }
        OperationKind::CreateNode {
            parent: p2,
            index: i2,
            node: spec,
        } => match p2 {
            Some(p2) if snapshot.node.contains(p2) => {
                snapshot.node.graft(p2, *i2, spec.clone());
            }
            _ => {
                if *p2 == snapshot.parent && *i2 <= snapshot.index {
                    snapshot.index += 1;
                }
            }
        },
        OperationKind::SetAttribute {
            node: n2,
            name,
            value,
            ..
        } => {
            if let Some(target) = snapshot.node.find_mut(n2) {
                target.attributes.insert(name.clone(), value.clone());
            }
        }
        OperationKind::RemoveAttribute { node: n2, name, .. } => {
            if let Some(target) = snapshot.node.find_mut(n2) {
                target.attributes.remove(name);
            }
        }
        OperationKind::UpdateNode {
            node: n2, fields, ..
        } => {
            if let Some(target) = snapshot.node.find_mut(n2) {
                apply_fields(&mut target.fields, fields);
            }
        }
        _ => {}
    }

    OperationKind::DeleteNode {
        node: node.clone(),
        removed: Some(snapshot),
    }
}

fn apply_fields(target: &mut BTreeMap<String, Value>, fields: &BTreeMap<String, Option<Value>>) {
    for (key, value) in fields {
        match value {
            Some(v) => target.insert(key.clone(), v.clone()),
            None => target.remove(key),
        };
    }
}
