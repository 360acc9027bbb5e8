//! Operations.

use crate::ids::{NodeId, OperationId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Description of a node subtree, used to create nodes and to capture
/// deleted ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node id.
    pub id: NodeId,
    /// Element type (e.g. `paragraph`, `image`).
    pub node_type: String,
    /// Structured fields.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Presentation attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Ordered children.
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    /// Creates a leaf spec with no fields or attributes.
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            fields: BTreeMap::new(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Sets a field.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Sets an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Appends a child.
    pub fn with_child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    /// Returns all node ids in the subtree, pre-order.
    pub fn ids(&self) -> Vec<&NodeId> {
        let mut out = vec![&self.id];
        for child in &self.children {
            out.extend(child.ids());
        }
        out
    }

    /// Returns true if `id` is this node or one of its descendants.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.id == *id || self.children.iter().any(|c| c.contains(id))
    }

    /// Finds a node in the subtree.
    pub fn find_mut(&mut self, id: &NodeId) -> Option<&mut NodeSpec> {
        if self.id == *id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Removes a strict descendant. Returns true if it was found.
    pub fn remove_descendant(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.children.iter().position(|c| c.id == *id) {
            self.children.remove(pos);
            return true;
        }
        self.children.iter_mut().any(|c| c.remove_descendant(id))
    }

    /// Inserts `spec` as a child of `parent` somewhere in the subtree.
    pub fn graft(&mut self, parent: &NodeId, index: usize, spec: NodeSpec) -> bool {
        match self.find_mut(parent) {
            Some(node) => {
                let index = index.min(node.children.len());
                node.children.insert(index, spec);
                true
            }
            None => false,
        }
    }
}

/// Captured position and content of a deleted node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedNode {
    /// Parent at deletion time (`None` for a root node).
    pub parent: Option<NodeId>,
    /// Index among its siblings.
    pub index: usize,
    /// The deleted subtree.
    pub node: NodeSpec,
}

/// The kind of an operation with its typed payload.
///
/// Text positions count Unicode scalar values. Optional `removed`,
/// `replaced` and `previous` fields hold captured state; they are filled
/// by [`Document::capture`](crate::Document::capture) and make the
/// operation invertible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OperationKind {
    /// Inserts `text` at `position`.
    Insert {
        /// Insertion point.
        position: usize,
        /// Inserted text.
        text: String,
    },
    /// Deletes `length` characters starting at `position`.
    Delete {
        /// Start of the range.
        position: usize,
        /// Number of characters.
        length: usize,
        /// Captured deleted text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<String>,
    },
    /// Replaces `length` characters at `position` with `text`.
    Replace {
        /// Start of the range.
        position: usize,
        /// Number of characters replaced.
        length: usize,
        /// Replacement text.
        text: String,
        /// Captured replaced text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replaced: Option<String>,
    },
    /// Moves `length` characters at `from` to `to`, where `to` is measured
    /// in the text after the span has been cut out.
    Move {
        /// Start of the moved span.
        from: usize,
        /// Length of the moved span.
        length: usize,
        /// Destination after the cut.
        to: usize,
    },
    /// Sets an attribute on a node.
    SetAttribute {
        /// Target node.
        node: NodeId,
        /// Attribute name.
        name: String,
        /// New value.
        value: Value,
        /// Captured value before the change.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<Value>,
    },
    /// Removes an attribute from a node.
    RemoveAttribute {
        /// Target node.
        node: NodeId,
        /// Attribute name.
        name: String,
        /// Captured value before the change.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<Value>,
    },
    /// Creates a node subtree under `parent` at `index`.
    CreateNode {
        /// Parent node (`None` for the root list).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<NodeId>,
        /// Index among the parent's children.
        index: usize,
        /// The created subtree.
        node: NodeSpec,
    },
    /// Deletes a node and its subtree.
    DeleteNode {
        /// Target node.
        node: NodeId,
        /// Captured subtree and position.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<RemovedNode>,
    },
    /// Updates node fields. A `None` value removes the field.
    UpdateNode {
        /// Target node.
        node: NodeId,
        /// Field changes.
        fields: BTreeMap<String, Option<Value>>,
        /// Captured field values before the change.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<BTreeMap<String, Option<Value>>>,
    },
    /// A voided operation. Applying it only advances the version.
    Noop,
}

impl OperationKind {
    /// Returns the kebab-case type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            OperationKind::Insert { .. } => "insert",
            OperationKind::Delete { .. } => "delete",
            OperationKind::Replace { .. } => "replace",
            OperationKind::Move { .. } => "move",
            OperationKind::SetAttribute { .. } => "set-attribute",
            OperationKind::RemoveAttribute { .. } => "remove-attribute",
            OperationKind::CreateNode { .. } => "create-node",
            OperationKind::DeleteNode { .. } => "delete-node",
            OperationKind::UpdateNode { .. } => "update-node",
            OperationKind::Noop => "noop",
        }
    }
}

/// A single edit produced by one user.
///
/// Operations are immutable once created: transforms and captures return
/// new values carrying the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique operation id.
    pub id: OperationId,
    /// Author.
    pub user_id: UserId,
    /// Creation time in milliseconds.
    pub timestamp: u64,
    /// Typed payload.
    pub kind: OperationKind,
}

impl Operation {
    /// Creates an operation with a freshly generated id.
    pub fn new(user_id: impl Into<UserId>, timestamp: u64, kind: OperationKind) -> Self {
        Self {
            id: OperationId::generate(),
            user_id: user_id.into(),
            timestamp,
            kind,
        }
    }

    /// Creates an insert operation.
    pub fn insert(
        user_id: impl Into<UserId>,
        timestamp: u64,
        position: usize,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            timestamp,
            OperationKind::Insert {
                position,
                text: text.into(),
            },
        )
    }

    /// Creates a delete operation.
    pub fn delete(user_id: impl Into<UserId>, timestamp: u64, position: usize, length: usize) -> Self {
        Self::new(
            user_id,
            timestamp,
            OperationKind::Delete {
                position,
                length,
                removed: None,
            },
        )
    }

    /// Creates a replace operation.
    pub fn replace(
        user_id: impl Into<UserId>,
        timestamp: u64,
        position: usize,
        length: usize,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            timestamp,
            OperationKind::Replace {
                position,
                length,
                text: text.into(),
                replaced: None,
            },
        )
    }

    /// Creates a move operation.
    pub fn move_text(
        user_id: impl Into<UserId>,
        timestamp: u64,
        from: usize,
        length: usize,
        to: usize,
    ) -> Self {
        Self::new(user_id, timestamp, OperationKind::Move { from, length, to })
    }

    /// Creates a set-attribute operation.
    pub fn set_attribute(
        user_id: impl Into<UserId>,
        timestamp: u64,
        node: impl Into<NodeId>,
        name: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::new(
            user_id,
            timestamp,
            OperationKind::SetAttribute {
                node: node.into(),
                name: name.into(),
                value,
                previous: None,
            },
        )
    }

    /// Creates a remove-attribute operation.
    pub fn remove_attribute(
        user_id: impl Into<UserId>,
        timestamp: u64,
        node: impl Into<NodeId>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            timestamp,
            OperationKind::RemoveAttribute {
                node: node.into(),
                name: name.into(),
                previous: None,
            },
        )
    }

    /// Creates a create-node operation.
    pub fn create_node(
        user_id: impl Into<UserId>,
        timestamp: u64,
        parent: Option<NodeId>,
        index: usize,
        node: NodeSpec,
    ) -> Self {
        Self::new(
            user_id,
            timestamp,
            OperationKind::CreateNode {
                parent,
                index,
                node,
            },
        )
    }

    /// Creates a delete-node operation.
    pub fn delete_node(user_id: impl Into<UserId>, timestamp: u64, node: impl Into<NodeId>) -> Self {
        Self::new(
            user_id,
            timestamp,
            OperationKind::DeleteNode {
                node: node.into(),
                removed: None,
            },
        )
    }

    /// Creates an update-node operation setting the given fields.
    pub fn update_node(
        user_id: impl Into<UserId>,
        timestamp: u64,
        node: impl Into<NodeId>,
        fields: impl IntoIterator<Item = (String, Option<Value>)>,
    ) -> Self {
        Self::new(
            user_id,
            timestamp,
            OperationKind::UpdateNode {
                node: node.into(),
                fields: fields.into_iter().collect(),
                previous: None,
            },
        )
    }

    /// Replaces the generated id.
    pub fn with_id(mut self, id: impl Into<OperationId>) -> Self {
        self.id = id.into();
        self
    }

    /// Returns a copy with a different payload, keeping id, author and time.
    pub fn with_kind(&self, kind: OperationKind) -> Self {
        Self {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            timestamp: self.timestamp,
            kind,
        }
    }

    /// Returns the voided form of this operation.
    pub fn voided(&self) -> Self {
        self.with_kind(OperationKind::Noop)
    }

    /// Returns true if the operation has been voided.
    pub fn is_noop(&self) -> bool {
        matches!(self.kind, OperationKind::Noop)
    }

    /// Returns true for insert, delete and replace.
    pub fn is_text_edit(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::Insert { .. } | OperationKind::Delete { .. } | OperationKind::Replace { .. }
        )
    }

    /// Returns true for operations on attributes.
    pub fn is_attribute(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::SetAttribute { .. } | OperationKind::RemoveAttribute { .. }
        )
    }

    /// Returns true for node creation and deletion.
    pub fn is_structural(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::CreateNode { .. } | OperationKind::DeleteNode { .. }
        )
    }

    /// Text position, if the operation has one.
    pub fn position(&self) -> Option<usize> {
        match &self.kind {
            OperationKind::Insert { position, .. }
            | OperationKind::Delete { position, .. }
            | OperationKind::Replace { position, .. } => Some(*position),
            OperationKind::Move { from, .. } => Some(*from),
            _ => None,
        }
    }

    /// Length of the affected text range, if any.
    pub fn length(&self) -> Option<usize> {
        match &self.kind {
            OperationKind::Insert { text, .. } => Some(text.chars().count()),
            OperationKind::Delete { length, .. }
            | OperationKind::Replace { length, .. }
            | OperationKind::Move { length, .. } => Some(*length),
            _ => None,
        }
    }

    /// Inserted text, if any.
    pub fn content(&self) -> Option<&str> {
        match &self.kind {
            OperationKind::Insert { text, .. } | OperationKind::Replace { text, .. } => Some(text),
            _ => None,
        }
    }

    /// The node an attribute or node operation targets.
    pub fn target_node(&self) -> Option<&NodeId> {
        match &self.kind {
            OperationKind::SetAttribute { node, .. }
            | OperationKind::RemoveAttribute { node, .. }
            | OperationKind::DeleteNode { node, .. }
            | OperationKind::UpdateNode { node, .. } => Some(node),
            OperationKind::CreateNode { node, .. } => Some(&node.id),
            _ => None,
        }
    }

    /// Total order used to arbitrate concurrent operations:
    /// timestamp, then user id, then operation id.
    ///
    /// Generated ids are random, so comparing users before ids keeps
    /// same-instant edits of different users in a stable order.
    pub fn rank_cmp(&self, other: &Operation) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.user_id.cmp(&other.user_id))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Returns true if this operation ranks before `other`.
    pub fn precedes(&self, other: &Operation) -> bool {
        self.rank_cmp(other) == Ordering::Less
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rank_orders_by_timestamp_then_user_then_id() {
        let early = Operation::insert("z", 10, 0, "a").with_id("op-z");
        let late = Operation::insert("a", 20, 0, "b").with_id("op-a");
        assert!(early.precedes(&late));

        let a = Operation::insert("a", 10, 0, "a").with_id("op-2");
        let b = Operation::insert("b", 10, 0, "b").with_id("op-1");
        assert!(a.precedes(&b));

        let c = Operation::insert("a", 10, 0, "c").with_id("op-3");
        assert!(a.precedes(&c));
        assert_eq!(a.rank_cmp(&a), Ordering::Equal);

        for _ in 0..16 {
            let x = Operation::insert("a", 10, 0, "x");
            let y = Operation::insert("b", 10, 0, "y");
            assert!(x.precedes(&y));
        }
    }

    #[test]
    fn accessors() {
        let op = Operation::insert("u", 1, 4, "héllo");
        assert_eq!(op.position(), Some(4));
        assert_eq!(op.length(), Some(5));
        assert_eq!(op.content(), Some("héllo"));
        assert!(op.is_text_edit());

        let op = Operation::set_attribute("u", 1, "n1", "bold", json!(true));
        assert_eq!(op.target_node(), Some(&NodeId::new("n1")));
        assert_eq!(op.position(), None);
        assert!(op.is_attribute());
    }

    #[test]
    fn voided_keeps_identity() {
        let op = Operation::delete("u", 5, 0, 3);
        let void = op.voided();
        assert_eq!(void.id, op.id);
        assert_eq!(void.timestamp, 5);
        assert!(void.is_noop());
    }

    #[test]
    fn node_spec_tree_helpers() {
        let mut spec = NodeSpec::new("root", "section")
            .with_child(NodeSpec::new("a", "paragraph"))
            .with_child(NodeSpec::new("b", "paragraph").with_child(NodeSpec::new("c", "span")));

        assert!(spec.contains(&NodeId::new("c")));
        assert_eq!(spec.ids().len(), 4);

        assert!(spec.graft(&NodeId::new("b"), 0, NodeSpec::new("d", "span")));
        assert_eq!(spec.children[1].children[0].id, NodeId::new("d"));

        assert!(spec.remove_descendant(&NodeId::new("c")));
        assert!(!spec.contains(&NodeId::new("c")));
        assert!(!spec.remove_descendant(&NodeId::new("missing")));
    }

    #[test]
    fn kind_serializes_with_type_tag() {
        let op = Operation::delete("u", 1, 2, 3).with_id("op-1");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"]["type"], "delete");
        assert_eq!(json["kind"]["length"], 3);
        assert!(json["kind"].get("removed").is_none());
    }
}
