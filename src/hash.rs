use sha2::{Digest, Sha256};

/// Digest a chunk's text into a self-describing `sha256:<hex>` string.
///
/// The algorithm tag makes the format portable across store backends; the
/// hex payload is the full 32-byte SHA-256 digest. Byte-identical text
/// always hashes identically — whitespace differences must be settled by
/// the normalizer before this point.
///
/// # Examples
///
/// ```
/// use quern::hash::content_hash;
///
/// let h = content_hash("hello world");
/// assert!(h.starts_with("sha256:"));
/// assert_eq!(h.len(), "sha256:".len() + 64);
/// ```
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    format!("sha256:{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
    }

    #[test]
    fn text_difference_changes_digest() {
        assert_ne!(content_hash("abc"), content_hash("abd"));
        // Whitespace is significant here; normalization happens upstream.
        assert_ne!(content_hash("a b"), content_hash("a  b"));
    }

    #[test]
    fn known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            content_hash(""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
