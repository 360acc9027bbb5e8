//! Document replica: text buffer, node tree, version and bounded history.

use crate::compress::{compress_operations, DEFAULT_COMPRESS_WINDOW_MS};
use crate::error::{OtError, OtResult};
use crate::ids::{DocumentId, NodeId, OperationId};
use crate::operation::{NodeSpec, Operation, OperationKind};
use crate::tree::NodeTree;
use crate::undo::create_undo_operation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Default number of operations kept in a document's history.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Comparable value of a document: its text and its node forest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    /// Text content.
    pub content: String,
    /// Root nodes in order.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

impl DocumentState {
    /// Creates a text-only state.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            nodes: Vec::new(),
        }
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The operation changed the document and advanced the version.
    Applied,
    /// The operation id was already applied; nothing changed.
    Duplicate,
}

/// Bounded operation history.
///
/// When the limit is exceeded the history is compressed first and the
/// oldest entries are evicted only if compression did not free enough room.
#[derive(Debug, Clone)]
pub struct OperationLog {
    entries: VecDeque<Operation>,
    limit: usize,
    compress_window_ms: u64,
}

impl OperationLog {
    /// Creates an empty log holding at most `limit` operations.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
            compress_window_ms: DEFAULT_COMPRESS_WINDOW_MS,
        }
    }

    /// Sets the window used when compressing on overflow.
    pub fn with_compress_window(mut self, window_ms: u64) -> Self {
        self.compress_window_ms = window_ms;
        self
    }

    /// Appends an operation, compressing and evicting on overflow.
    pub fn push(&mut self, op: Operation) {
        self.entries.push_back(op);
        if self.entries.len() <= self.limit {
            return;
        }

        let ops: Vec<Operation> = self.entries.drain(..).collect();
        let before = ops.len();
        self.entries = compress_operations(&ops, self.compress_window_ms).into();
        let compressed = before - self.entries.len();
        let mut evicted = 0;
        while self.entries.len() > self.limit {
            self.entries.pop_front();
            evicted += 1;
        }
        tracing::trace!(compressed, evicted, "operation log trimmed");
    }

    /// Number of retained operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained operations.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Iterates over retained operations, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.entries.iter()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

/// Ids of the most recently applied operations, oldest evicted first.
#[derive(Debug, Clone)]
struct AppliedIds {
    ids: HashSet<OperationId>,
    order: VecDeque<OperationId>,
    limit: usize,
}

impl AppliedIds {
    fn new(limit: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    fn contains(&self, id: &OperationId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: OperationId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: &OperationId) {
        if self.ids.remove(id) {
            self.order.retain(|kept| kept != id);
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// A document replica.
///
/// All mutation goes through [`Document::apply_in_place`] (or the pure
/// [`apply`]), which validates the operation, skips ids that were already
/// applied and advances the version by exactly one otherwise.
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    content: String,
    nodes: NodeTree,
    version: u64,
    log: OperationLog,
    applied: AppliedIds,
}

impl Document {
    /// Creates a text document at version 0.
    pub fn new(id: impl Into<DocumentId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            nodes: NodeTree::new(),
            version: 0,
            log: OperationLog::default(),
            applied: AppliedIds::new(DEFAULT_HISTORY_LIMIT),
        }
    }

    /// Creates a document from a full state at a given version.
    pub fn from_state(id: impl Into<DocumentId>, state: DocumentState, version: u64) -> OtResult<Self> {
        Ok(Self {
            id: id.into(),
            content: state.content,
            nodes: NodeTree::from_specs(&state.nodes)?,
            version,
            log: OperationLog::default(),
            applied: AppliedIds::new(DEFAULT_HISTORY_LIMIT),
        })
    }

    /// Replaces the history with an empty log of the given bounds.
    ///
    /// Duplicate detection remembers the same number of operation ids.
    pub fn with_history(mut self, limit: usize, compress_window_ms: u64) -> Self {
        self.log = OperationLog::new(limit).with_compress_window(compress_window_ms);
        let mut applied = AppliedIds::new(limit);
        for id in self.applied.order.drain(..) {
            applied.insert(id);
        }
        self.applied = applied;
        self
    }

    /// Replaces the history with an empty log of the given size.
    pub fn with_history_limit(self, limit: usize) -> Self {
        self.with_history(limit, DEFAULT_COMPRESS_WINDOW_MS)
    }

    /// Records operations that are already reflected in the content, as
    /// when restoring a snapshot. Their ids count as applied.
    pub fn with_recorded(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        for op in operations {
            self.applied.insert(op.id.clone());
            self.log.push(op);
        }
        self
    }

    /// Document id.
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Text content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Content length in characters.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    /// Node tree.
    pub fn nodes(&self) -> &NodeTree {
        &self.nodes
    }

    /// Number of operations applied to this replica.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Bounded history.
    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    /// Returns true if the operation id has been applied recently enough
    /// to still be remembered.
    pub fn has_applied(&self, id: &OperationId) -> bool {
        self.applied.contains(id)
    }

    /// Number of remembered operation ids. Never exceeds the history limit.
    pub fn remembered_ids(&self) -> usize {
        self.applied.len()
    }

    /// Element type of a node.
    pub fn node_type(&self, id: &NodeId) -> Option<&str> {
        self.nodes.get(id).map(|n| n.node_type.as_str())
    }

    /// Comparable state.
    pub fn state(&self) -> DocumentState {
        DocumentState {
            content: self.content.clone(),
            nodes: self.nodes.to_specs(),
        }
    }

    /// Checks that the operation fits the current state.
    pub fn validate(&self, op: &Operation) -> OtResult<()> {
        let len = self.char_len();
        let range_ok = |position: usize, length: usize| {
            position
                .checked_add(length)
                .map(|end| end <= len)
                .unwrap_or(false)
        };

        match &op.kind {
            OperationKind::Insert { position, text } => {
                if *position > len {
                    return Err(OtError::out_of_bounds(&op.id, *position, text.chars().count(), len));
                }
            }
            OperationKind::Delete {
                position, length, ..
            }
            | OperationKind::Replace {
                position, length, ..
            } => {
                if !range_ok(*position, *length) {
                    return Err(OtError::out_of_bounds(&op.id, *position, *length, len));
                }
            }
            OperationKind::Move { from, length, to } => {
                if !range_ok(*from, *length) || *to > len - length {
                    return Err(OtError::out_of_bounds(&op.id, *from, *length, len));
                }
            }
            OperationKind::SetAttribute { node, .. }
            | OperationKind::RemoveAttribute { node, .. }
            | OperationKind::DeleteNode { node, .. }
            | OperationKind::UpdateNode { node, .. } => {
                if !self.nodes.contains(node) {
                    return Err(OtError::UnknownNode(node.clone()));
                }
            }
            OperationKind::CreateNode {
                parent,
                index,
                node,
            } => self.nodes.check_insert(parent.as_ref(), *index, node)?,
            OperationKind::Noop => {}
        }
        Ok(())
    }

    /// Validates the operation and returns a copy carrying the state it
    /// overwrites, which makes it invertible.
    ///
    /// A `SetAttribute` whose attribute is currently absent keeps
    /// `previous: None`; its inverse is a removal.
    pub fn capture(&self, op: &Operation) -> OtResult<Operation> {
        self.validate(op)?;
        let kind = match &op.kind {
            OperationKind::Delete {
                position, length, ..
            } => OperationKind::Delete {
                position: *position,
                length: *length,
                removed: Some(self.slice(*position, *length)),
            },
            OperationKind::Replace {
                position,
                length,
                text,
                ..
            } => OperationKind::Replace {
                position: *position,
                length: *length,
                text: text.clone(),
                replaced: Some(self.slice(*position, *length)),
            },
            OperationKind::SetAttribute {
                node, name, value, ..
            } => OperationKind::SetAttribute {
                node: node.clone(),
                name: name.clone(),
                value: value.clone(),
                previous: self.attribute(node, name),
            },
            OperationKind::RemoveAttribute { node, name, .. } => OperationKind::RemoveAttribute {
                node: node.clone(),
                name: name.clone(),
                previous: self.attribute(node, name),
            },
            OperationKind::DeleteNode { node, .. } => OperationKind::DeleteNode {
                node: node.clone(),
                removed: Some(self.nodes.removed_snapshot(node)?),
            },
            OperationKind::UpdateNode { node, fields, .. } => {
                let record = self.nodes.get(node).ok_or_else(|| OtError::UnknownNode(node.clone()))?;
                let previous: BTreeMap<_, _> = fields
                    .keys()
                    .map(|k| (k.clone(), record.fields.get(k).cloned()))
                    .collect();
                OperationKind::UpdateNode {
                    node: node.clone(),
                    fields: fields.clone(),
                    previous: Some(previous),
                }
            }
            other => other.clone(),
        };
        Ok(op.with_kind(kind))
    }

    /// Applies an operation in place.
    pub fn apply_in_place(&mut self, op: &Operation) -> OtResult<ApplyOutcome> {
        if self.applied.contains(&op.id) {
            return Ok(ApplyOutcome::Duplicate);
        }
        self.validate(op)?;
        self.mutate(&op.kind)?;
        self.version += 1;
        self.log.push(op.clone());
        self.applied.insert(op.id.clone());
        Ok(ApplyOutcome::Applied)
    }

    /// Undoes a previously applied operation by applying its inverse, and
    /// forgets the original id so that it can be applied again later.
    pub fn revert(&mut self, op: &Operation) -> OtResult<()> {
        let inverse = create_undo_operation(op)?;
        self.apply_in_place(&inverse)?;
        self.applied.remove(&op.id);
        Ok(())
    }

    fn mutate(&mut self, kind: &OperationKind) -> OtResult<()> {
        match kind {
            OperationKind::Insert { position, text } => self.splice(*position, 0, text),
            OperationKind::Delete {
                position, length, ..
            } => self.splice(*position, *length, ""),
            OperationKind::Replace {
                position,
                length,
                text,
                ..
            } => self.splice(*position, *length, text),
            OperationKind::Move { from, length, to } => {
                let moved = self.slice(*from, *length);
                self.splice(*from, *length, "");
                self.splice(*to, 0, &moved);
            }
            OperationKind::SetAttribute {
                node, name, value, ..
            } => {
                self.nodes.get_mut(node)?.attributes.insert(name.clone(), value.clone());
            }
            OperationKind::RemoveAttribute { node, name, .. } => {
                self.nodes.get_mut(node)?.attributes.remove(name);
            }
            OperationKind::CreateNode {
                parent,
                index,
                node,
            } => self.nodes.insert_subtree(parent.clone(), *index, node.clone())?,
            OperationKind::DeleteNode { node, .. } => {
                self.nodes.remove_subtree(node)?;
            }
            OperationKind::UpdateNode { node, fields, .. } => {
                let record = self.nodes.get_mut(node)?;
                for (key, value) in fields {
                    match value {
                        Some(v) => record.fields.insert(key.clone(), v.clone()),
                        None => record.fields.remove(key),
                    };
                }
            }
            OperationKind::Noop => {}
        }
        Ok(())
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<serde_json::Value> {
        self.nodes.get(node)?.attributes.get(name).cloned()
    }

    fn byte_offset(&self, chars: usize) -> usize {
        self.content
            .char_indices()
            .nth(chars)
            .map(|(b, _)| b)
            .unwrap_or(self.content.len())
    }

    fn slice(&self, position: usize, length: usize) -> String {
        self.content.chars().skip(position).take(length).collect()
    }

    fn splice(&mut self, position: usize, length: usize, text: &str) {
        let start = self.byte_offset(position);
        let end = self.byte_offset(position + length);
        self.content.replace_range(start..end, text);
    }
}

/// Applies an operation to a copy of the document.
pub fn apply(document: &Document, op: &Operation) -> OtResult<Document> {
    let mut next = document.clone();
    next.apply_in_place(op)?;
    Ok(next)
}

/// Checks that an operation fits the document.
pub fn validate(op: &Operation, document: &Document) -> OtResult<()> {
    document.validate(op)
}
