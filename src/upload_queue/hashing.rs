//! SHA256 content keys for queued files.

use sha2::{Digest, Sha256};

/// Hex SHA256 of the file bytes; identifies content regardless of name or mtime
pub fn calculate_content_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
