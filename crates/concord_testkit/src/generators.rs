//! Property-based test generators using proptest.
//!
//! Provides strategies for generating documents and operations that are
//! valid for the document they are generated against.

use concord_ot::Operation;
use proptest::prelude::*;
use proptest::sample::Index;
use serde_json::{json, Value};

/// Strategy for generating document text, including multi-byte characters.
pub fn text_strategy(max_len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(prop_oneof![4 => prop::char::range('a', 'z'), 1 => Just('é'), 1 => Just(' ')], 0..=max_len)
        .prop_map(|chars| chars.into_iter().collect())
}

/// Strategy for generating short inserted text.
pub fn fragment_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z]{1,3}").expect("Invalid regex")
}

/// Strategy for generating an insert, delete or replace that fits a text
/// of `len` characters.
pub fn text_operation_strategy(user: &'static str, len: usize) -> BoxedStrategy<Operation> {
    let timestamp = 0u64..4;
    let insert = (timestamp.clone(), 0..=len, fragment_strategy())
        .prop_map(move |(ts, position, text)| Operation::insert(user, ts, position, text));
    if len == 0 {
        return insert.boxed();
    }

    let range = move || (0..len).prop_flat_map(move |position| (Just(position), 1..=len - position));
    prop_oneof![
        2 => insert,
        2 => (timestamp.clone(), range())
            .prop_map(move |(ts, (position, length))| Operation::delete(user, ts, position, length)),
        1 => (timestamp, range(), fragment_strategy()).prop_map(move |(ts, (position, length), text)| {
            Operation::replace(user, ts, position, length, text)
        }),
    ]
    .boxed()
}

/// Strategy for a text and two concurrent operations against it, authored
/// by `alice` (`op-a`) and `bob` (`op-b`).
pub fn concurrent_pair_strategy() -> impl Strategy<Value = (String, Operation, Operation)> {
    text_strategy(12).prop_flat_map(|text| {
        let len = text.chars().count();
        (
            Just(text),
            text_operation_strategy("alice", len).prop_map(|op| op.with_id("op-a")),
            text_operation_strategy("bob", len).prop_map(|op| op.with_id("op-b")),
        )
    })
}

fn field_name() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("color"), Just("size")]
}

fn field_value() -> impl Strategy<Value = Value> {
    (0i64..3).prop_map(|v| json!(v))
}

/// Strategy for an attribute write, attribute removal or field update on
/// the node `node`.
pub fn node_write_strategy(user: &'static str, node: &'static str) -> BoxedStrategy<Operation> {
    prop_oneof![
        (0u64..3, field_name(), field_value())
            .prop_map(move |(ts, name, value)| Operation::set_attribute(user, ts, node, name, value)),
        (0u64..3, field_name()).prop_map(move |(ts, name)| Operation::remove_attribute(user, ts, node, name)),
        (0u64..3, prop::collection::btree_map(field_name(), prop::option::of(field_value()), 1..=2)).prop_map(
            move |(ts, fields)| {
                Operation::update_node(user, ts, node, fields.into_iter().map(|(k, v)| (k.to_string(), v)))
            }
        ),
    ]
    .boxed()
}

/// Strategy for two concurrent writes on node `title`, authored by `alice`
/// (`op-a`) and `bob` (`op-b`).
pub fn node_write_pair_strategy() -> impl Strategy<Value = (Operation, Operation)> {
    (node_write_strategy("alice", "title"), node_write_strategy("bob", "title"))
        .prop_map(|(a, b)| (a.with_id("op-a"), b.with_id("op-b")))
}

/// One abstract editing step, resolved against the current text length by
/// [`resolve_script`].
#[derive(Debug, Clone)]
pub enum EditStep {
    /// Insert text at a relative position.
    Insert {
        /// Position selector.
        at: Index,
        /// Inserted text.
        text: String,
    },
    /// Delete characters at a relative position.
    Delete {
        /// Position selector.
        at: Index,
        /// Length selector.
        length: Index,
    },
}

/// Strategy for generating an editing script.
pub fn edit_script_strategy(max_steps: usize) -> impl Strategy<Value = Vec<EditStep>> {
    let step = prop_oneof![
        3 => (any::<Index>(), fragment_strategy()).prop_map(|(at, text)| EditStep::Insert { at, text }),
        2 => (any::<Index>(), any::<Index>()).prop_map(|(at, length)| EditStep::Delete { at, length }),
    ];
    prop::collection::vec(step, 1..=max_steps)
}

/// Turns a script into operations by one user, `step_ms` apart, starting
/// from a text of `len` characters. Deletes on empty text are skipped.
pub fn resolve_script(user: &str, len: usize, step_ms: u64, script: &[EditStep]) -> Vec<Operation> {
    let mut len = len;
    let mut ops = Vec::with_capacity(script.len());
    for (i, step) in script.iter().enumerate() {
        let timestamp = 1 + i as u64 * step_ms;
        match step {
            EditStep::Insert { at, text } => {
                ops.push(Operation::insert(user, timestamp, at.index(len + 1), text.clone()));
                len += text.chars().count();
            }
            EditStep::Delete { .. } if len == 0 => {}
            EditStep::Delete { at, length } => {
                let position = at.index(len);
                let length = 1 + length.index(len - position);
                ops.push(Operation::delete(user, timestamp, position, length));
                len -= length;
            }
        }
    }
    ops
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
