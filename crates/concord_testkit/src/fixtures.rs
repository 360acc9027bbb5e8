//! Document and operation fixtures.
//!
//! Provides ready-made documents and operation sequences for common test
//! scenarios.

use concord_ot::{Document, DocumentState, NodeSpec, Operation};
use serde_json::json;

/// Timestamp step between keystrokes produced by [`typing`].
pub const KEYSTROKE_MS: u64 = 10;

/// A plain text document.
pub fn text_document(content: &str) -> Document {
    Document::new("test-doc", content)
}

/// State with a single empty heading node.
pub fn heading_state(node_id: &str) -> DocumentState {
    DocumentState {
        content: String::new(),
        nodes: vec![NodeSpec::new(node_id, "heading")],
    }
}

/// State with a title, a section of `paragraphs` paragraphs and some text.
pub fn article_state(paragraphs: usize) -> DocumentState {
    let section = (0..paragraphs).fold(NodeSpec::new("section", "section"), |section, i| {
        section.with_child(
            NodeSpec::new(format!("p{i}"), "paragraph")
                .with_field("text", json!(format!("paragraph {i}")))
                .with_attribute("align", json!("left")),
        )
    });
    DocumentState {
        content: "The quick brown fox jumps over the lazy dog.".to_string(),
        nodes: vec![
            NodeSpec::new("title", "heading").with_attribute("level", json!(1)),
            section,
        ],
    }
}

/// A document built from [`article_state`].
pub fn article_document(paragraphs: usize) -> Document {
    // The fixture state is well formed.
    Document::from_state("article", article_state(paragraphs), 0).expect("valid article state")
}

/// One insert per character, appended at `position`, `KEYSTROKE_MS` apart.
pub fn typing(user: &str, position: usize, text: &str) -> Vec<Operation> {
    text.chars()
        .enumerate()
        .map(|(i, c)| Operation::insert(user, 1 + i as u64 * KEYSTROKE_MS, position + i, c.to_string()))
        .collect()
}

/// One single-character delete per step, backspacing from `end`.
pub fn backspacing(user: &str, end: usize, count: usize) -> Vec<Operation> {
    (0..count.min(end))
        .map(|i| Operation::delete(user, 1 + i as u64 * KEYSTROKE_MS, end - i - 1, 1))
        .collect()
}
