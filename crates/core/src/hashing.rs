//! Content hashing for storage object names.

use sha2::{Digest, Sha256};

/// Hex characters of the digest kept in object names.
const NAME_HASH_LEN: usize = 16;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Derive a content-addressed object name from the bytes and a suggested
/// name: `{prefix}{hash}.{ext}`, where `prefix` is everything in the
/// suggested stem up to and including its last `-` (e.g. `masked-`).
///
/// Identical bytes with the same suggestion always map to the same name.
pub fn content_name(data: &[u8], suggested_name: &str) -> String {
    let hash = sha256_hex(data);
    let hash = &hash[..NAME_HASH_LEN];

    let (stem, ext) = match suggested_name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem, Some(ext.to_ascii_lowercase())),
        _ => (suggested_name, None),
    };
    let prefix = stem.rsplit_once('-').map(|(p, _)| p).unwrap_or("");
    let prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}-")
    };

    match ext {
        Some(ext) => format!("{prefix}{hash}.{ext}"),
        None => format!("{prefix}{hash}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        let hash = sha256_hex(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn content_name_keeps_extension() {
        let name = content_name(b"", "generated.PNG");
        assert_eq!(name, "e3b0c44298fc1c14.png");
    }

    #[test]
    fn content_name_keeps_prefix() {
        let name = content_name(b"", "masked-video.mp4");
        assert_eq!(name, "masked-e3b0c44298fc1c14.mp4");
    }

    #[test]
    fn content_name_is_stable() {
        assert_eq!(content_name(b"abc", "a.jpg"), content_name(b"abc", "a.jpg"));
        assert_ne!(content_name(b"abc", "a.jpg"), content_name(b"abd", "a.jpg"));
    }
}
