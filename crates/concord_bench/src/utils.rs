//! Benchmark utilities.

use concord_ot::Operation;

/// Text of `len` characters cycling through the alphabet.
pub fn text_of(len: usize) -> String {
    (b'a'..=b'z').cycle().take(len).map(char::from).collect()
}

/// `count` inserts by `user` spread over a text of `len` characters, each
/// generated against the text as left by the previous one.
pub fn spread_inserts(user: &str, len: usize, count: usize) -> Vec<Operation> {
    (0..count)
        .map(|i| {
            let position = (i * 7919) % (len + i + 1);
            Operation::insert(user, i as u64, position, "x")
        })
        .collect()
}

/// `count` concurrent single-character inserts by `user` against the same
/// text of `len` characters.
pub fn concurrent_inserts(user: &str, len: usize, count: usize) -> Vec<Operation> {
    (0..count)
        .map(|i| Operation::insert(user, i as u64, (i * 31) % (len + 1), "y"))
        .collect()
}
