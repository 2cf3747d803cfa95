use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the text with leading and trailing whitespace removed.
///
/// Two texts that only differ in padding share a hash, and therefore a
/// stored record.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.trim().as_bytes()))
}

/// Immutable text content identified by its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    pub hash: String,
    pub content: String,
}

impl Text {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            hash: content_hash(&content),
            content,
        }
    }
}

/// First ten words of `text`, with an ellipsis when anything was cut.
pub fn short_text(text: &str) -> String {
    let total = text.split_whitespace().count();
    let words: Vec<&str> = text.split_whitespace().take(10).collect();
    let mut out = words.join(" ");
    if words.len() < total {
        out.push_str("...");
    }
    out
}
