//! Text preparation for capture embeddings.
//!
//! Title, URL and page text are joined with spaces and cut to a character
//! limit; only a semantic fingerprint of the page is needed.

/// Builds the text submitted for a capture's embedding.
pub fn embedding_input(title: &str, url: &str, dom_text: &str, limit: usize) -> String {
    let content = format!("{} {} {}", title.trim(), url.trim(), dom_text.trim());
    truncate_chars(content.trim(), limit)
}

/// Truncate to at most `limit` characters without breaking UTF-8 sequences.
fn truncate_chars(content: &str, limit: usize) -> String {
    match content.char_indices().nth(limit) {
        Some((byte_idx, _)) => content[..byte_idx].to_string(),
        None => content.to_string(),
    }
}

/// Hash of the embedded fields, used to tell whether an index entry is current.
pub fn content_hash(title: &str, url: &str, dom_text: &str) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    title.trim().hash(&mut hasher);
    url.trim().hash(&mut hasher);
    dom_text.trim().hash(&mut hasher);
    hasher.finish()
}
