//! Content digests: template versions, generated output, sentinel nonces.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Version token for template source text. Any edit changes it, which is
/// what the renderer's staleness check compares.
pub fn source_version(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// Digest of a rendered document, reported alongside it.
pub fn output_digest(content: &str) -> String {
    sha256_hex(content.as_bytes())
}
