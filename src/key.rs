//! Cache key derivation.
//!
//! Object caches (notes, pages) are keyed by the entity's own identifier. Content caches (translations,
//! pronunciations) are keyed by a digest of the source text plus the target language:
//!
//! ```text
//! hex(blake3(first CONTENT_KEY_MAX_CHARS chars of text))[..32] + "_" + language
//! ```
//!
//! Only the leading [`CONTENT_KEY_MAX_CHARS`] characters are hashed. Two long texts that share that prefix produce the
//! same key; this bounds hashing cost and is an accepted collision.

use crate::types::TextProcessingMode;

/// Number of leading characters of a text that take part in its content key.
pub const CONTENT_KEY_MAX_CHARS: usize = 500;

const DIGEST_HEX_LEN: usize = 32;

/// Key of an identifier-keyed entity. The identifier itself.
#[inline]
pub fn entity_key(id: &str) -> String {
    id.to_owned()
}

pub fn content_key(text: &str, language: &str) -> String {
    let digest = blake3::hash(truncate_chars(text, CONTENT_KEY_MAX_CHARS).as_bytes());
    let hex = digest.to_hex();
    format!("{}_{language}", &hex.as_str()[..DIGEST_HEX_LEN])
}

pub fn processed_text_key(page_id: &str, mode: TextProcessingMode) -> String {
    format!("{page_id}_{mode}")
}

// Cut on a character boundary so multi-byte text never splits a code point.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
