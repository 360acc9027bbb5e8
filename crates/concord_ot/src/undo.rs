//! Inverse operations.

use crate::error::{OtError, OtResult};
use crate::ids::OperationId;
use crate::operation::{Operation, OperationKind, RemovedNode};

/// Builds the exact inverse of an operation.
///
/// Destructive operations need their captured state (see
/// [`Document::capture`](crate::Document::capture)); without it this
/// returns [`OtError::NotInvertible`]. The inverse gets a fresh id and keeps
/// the author and timestamp of the original.
pub fn create_undo_operation(op: &Operation) -> OtResult<Operation> {
    let missing = || OtError::NotInvertible(op.id.clone());

    let kind = match &op.kind {
        OperationKind::Insert { position, text } => OperationKind::Delete {
            position: *position,
            length: text.chars().count(),
            removed: Some(text.clone()),
        },
        OperationKind::Delete {
            position, removed, ..
        } => OperationKind::Insert {
            position: *position,
            text: removed.clone().ok_or_else(missing)?,
        },
        OperationKind::Replace {
            position,
            text,
            replaced,
            ..
        } => {
            let replaced = replaced.clone().ok_or_else(missing)?;
            OperationKind::Replace {
                position: *position,
                length: text.chars().count(),
                text: replaced,
                replaced: Some(text.clone()),
            }
        }
        OperationKind::Move { from, length, to } => OperationKind::Move {
            from: *to,
            length: *length,
            to: *from,
        },
        OperationKind::SetAttribute {
            node,
            name,
            value,
            previous,
        } => match previous {
            Some(old) => OperationKind::SetAttribute {
                node: node.clone(),
                name: name.clone(),
                value: old.clone(),
                previous: Some(value.clone()),
            },
            None => OperationKind::RemoveAttribute {
                node: node.clone(),
                name: name.clone(),
                previous: Some(value.clone()),
            },
        },
        OperationKind::RemoveAttribute {
            node,
            name,
            previous,
        } => match previous {
            Some(old) => OperationKind::SetAttribute {
                node: node.clone(),
                name: name.clone(),
                value: old.clone(),
                previous: None,
            },
            None => OperationKind::Noop,
        },
        OperationKind::CreateNode {
            parent,
            index,
            node,
        } => OperationKind::DeleteNode {
            node: node.id.clone(),
            removed: Some(RemovedNode {
                parent: parent.clone(),
                index: *index,
                node: node.clone(),
            }),
        },
        OperationKind::DeleteNode { removed, .. } => {
            let removed = removed.clone().ok_or_else(missing)?;
            OperationKind::CreateNode {
                parent: removed.parent,
                index: removed.index,
                node: removed.node,
            }
        }
        OperationKind::UpdateNode {
            node,
            fields,
            previous,
        } => {
            let previous = previous.clone().ok_or_else(missing)?;
            OperationKind::UpdateNode {
                node: node.clone(),
                fields: previous,
                previous: Some(fields.clone()),
            }
        }
        OperationKind::Noop => OperationKind::Noop,
    };

    Ok(Operation {
        id: OperationId::generate(),
        user_id: op.user_id.clone(),
        timestamp: op.timestamp,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{apply, Document, DocumentState};
    use crate::ids::NodeId;
    use crate::operation::NodeSpec;
    use serde_json::json;

    fn doc() -> Document {
        let state = DocumentState {
            content: "abcdef".into(),
            nodes: vec![
                NodeSpec::new("p1", "paragraph")
                    .with_field("text", json!("one"))
                    .with_attribute("align", json!("left")),
                NodeSpec::new("p2", "paragraph").with_child(NodeSpec::new("s1", "span")),
            ],
        };
        Document::from_state("doc", state, 0).unwrap()
    }

    fn round_trip(op: Operation) {
        let original = doc();
        let op = original.capture(&op).unwrap();
        let changed = apply(&original, &op).unwrap();
        let undo = create_undo_operation(&op).unwrap();
        let restored = apply(&changed, &undo).unwrap();
        assert_eq!(restored.state(), original.state(), "round trip failed for {op:?}");
    }

    #[test]
    fn every_kind_round_trips() {
        round_trip(Operation::insert("u", 1, 3, "XYZ"));
        round_trip(Operation::delete("u", 1, 1, 4));
        round_trip(Operation::replace("u", 1, 2, 2, "long text"));
        round_trip(Operation::move_text("u", 1, 0, 2, 3));
        round_trip(Operation::move_text("u", 1, 3, 3, 0));
        round_trip(Operation::set_attribute("u", 1, "p1", "align", json!("right")));
        round_trip(Operation::set_attribute("u", 1, "p1", "color", json!("red")));
        round_trip(Operation::remove_attribute("u", 1, "p1", "align"));
        round_trip(Operation::remove_attribute("u", 1, "p1", "absent"));
        round_trip(Operation::create_node(
            "u",
            1,
            Some(NodeId::new("p2")),
            1,
            NodeSpec::new("s2", "span"),
        ));
        round_trip(Operation::delete_node("u", 1, "p2"));
        round_trip(Operation::update_node(
            "u",
            1,
            "p1",
            [
                ("text".to_string(), Some(json!("two"))),
                ("level".to_string(), Some(json!(2))),
            ],
        ));
        round_trip(Operation::insert("u", 1, 0, "x").voided());
    }

    #[test]
    fn uncaptured_destructive_ops_are_not_invertible() {
        let op = Operation::delete("u", 1, 0, 2);
        assert_eq!(
            create_undo_operation(&op).unwrap_err(),
            OtError::NotInvertible(op.id.clone())
        );
        assert!(create_undo_operation(&Operation::delete_node("u", 1, "p1")).is_err());
    }

    #[test]
    fn undo_gets_fresh_id() {
        let op = Operation::insert("u", 7, 0, "x");
        let undo = create_undo_operation(&op).unwrap();
        assert_ne!(undo.id, op.id);
        assert_eq!(undo.user_id, op.user_id);
        assert_eq!(undo.timestamp, 7);
    }
}
