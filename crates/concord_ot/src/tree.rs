//! Structured node tree.

use crate::error::{OtError, OtResult};
use crate::ids::NodeId;
use crate::operation::{NodeSpec, RemovedNode};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A single node stored in a [`NodeTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Element type.
    pub node_type: String,
    /// Parent node, `None` for roots.
    pub parent: Option<NodeId>,
    /// Ordered child ids.
    pub children: Vec<NodeId>,
    /// Structured fields.
    pub fields: BTreeMap<String, Value>,
    /// Presentation attributes.
    pub attributes: BTreeMap<String, Value>,
}

/// Ordered forest of nodes indexed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTree {
    nodes: HashMap<NodeId, NodeRecord>,
    roots: Vec<NodeId>,
}

impl NodeTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from root specs.
    pub fn from_specs(specs: &[NodeSpec]) -> OtResult<Self> {
        let mut tree = Self::new();
        for (index, spec) in specs.iter().enumerate() {
            tree.insert_subtree(None, index, spec.clone())?;
        }
        Ok(tree)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the node exists.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Looks up a node.
    pub fn get(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    /// Child list of `parent`, or the root list for `None`.
    pub fn children_of(&self, parent: Option<&NodeId>) -> Option<&[NodeId]> {
        match parent {
            None => Some(self.roots.as_slice()),
            Some(id) => self.nodes.get(id).map(|n| n.children.as_slice()),
        }
    }

    /// Position of a node among its siblings.
    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        let record = self.nodes.get(id)?;
        self.children_of(record.parent.as_ref())?
            .iter()
            .position(|c| c == id)
    }

    /// Checks that `spec` can be inserted under `parent` at `index`.
    pub fn check_insert(&self, parent: Option<&NodeId>, index: usize, spec: &NodeSpec) -> OtResult<()> {
        let siblings = match parent {
            None => self.roots.as_slice(),
            Some(p) => self
                .nodes
                .get(p)
                .map(|n| n.children.as_slice())
                .ok_or_else(|| OtError::UnknownNode(p.clone()))?,
        };
        if index > siblings.len() {
            return Err(OtError::InvalidIndex {
                parent: parent.cloned(),
                index,
                len: siblings.len(),
            });
        }
        let mut seen = HashSet::new();
        for id in spec.ids() {
            if self.nodes.contains_key(id) || !seen.insert(id) {
                return Err(OtError::DuplicateNode(id.clone()));
            }
        }
        Ok(())
    }

    /// Inserts a subtree.
    pub fn insert_subtree(&mut self, parent: Option<NodeId>, index: usize, spec: NodeSpec) -> OtResult<()> {
        self.check_insert(parent.as_ref(), index, &spec)?;
        let id = spec.id.clone();
        self.insert_unchecked(parent.clone(), spec);
        let siblings = match &parent {
            None => &mut self.roots,
            Some(p) => match self.nodes.get_mut(p) {
                Some(record) => &mut record.children,
                None => return Err(OtError::UnknownNode(p.clone())),
            },
        };
        siblings.insert(index, id);
        Ok(())
    }

    fn insert_unchecked(&mut self, parent: Option<NodeId>, spec: NodeSpec) {
        let children = spec.children.iter().map(|c| c.id.clone()).collect();
        let id = spec.id.clone();
        for child in spec.children {
            self.insert_unchecked(Some(id.clone()), child);
        }
        self.nodes.insert(
            id,
            NodeRecord {
                node_type: spec.node_type,
                parent,
                children,
                fields: spec.fields,
                attributes: spec.attributes,
            },
        );
    }

    /// Removes a node and its subtree, returning what was removed.
    pub fn remove_subtree(&mut self, id: &NodeId) -> OtResult<RemovedNode> {
        let removed = self.removed_snapshot(id)?;
        let siblings = match &removed.parent {
            None => &mut self.roots,
            Some(p) => match self.nodes.get_mut(p) {
                Some(record) => &mut record.children,
                None => return Err(OtError::UnknownNode(p.clone())),
            },
        };
        siblings.retain(|c| c != id);
        for node_id in removed.node.ids() {
            self.nodes.remove(node_id);
        }
        Ok(removed)
    }

    /// Captures a node's subtree and position without removing it.
    pub fn removed_snapshot(&self, id: &NodeId) -> OtResult<RemovedNode> {
        let record = self.nodes.get(id).ok_or_else(|| OtError::UnknownNode(id.clone()))?;
        let index = self.index_of(id).ok_or_else(|| OtError::UnknownNode(id.clone()))?;
        let node = self.snapshot(id).ok_or_else(|| OtError::UnknownNode(id.clone()))?;
        Ok(RemovedNode {
            parent: record.parent.clone(),
            index,
            node,
        })
    }

    /// Returns the subtree rooted at `id` as a spec.
    pub fn snapshot(&self, id: &NodeId) -> Option<NodeSpec> {
        let record = self.nodes.get(id)?;
        let children = record
            .children
            .iter()
            .filter_map(|c| self.snapshot(c))
            .collect();
        Some(NodeSpec {
            id: id.clone(),
            node_type: record.node_type.clone(),
            fields: record.fields.clone(),
            attributes: record.attributes.clone(),
            children,
        })
    }

    /// Returns the whole forest as specs, in order.
    pub fn to_specs(&self) -> Vec<NodeSpec> {
        self.roots.iter().filter_map(|id| self.snapshot(id)).collect()
    }

    /// Mutable access to a node.
    pub fn get_mut(&mut self, id: &NodeId) -> OtResult<&mut NodeRecord> {
        self.nodes.get_mut(id).ok_or_else(|| OtError::UnknownNode(id.clone()))
    }
}
