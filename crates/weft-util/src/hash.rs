/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Hash a sequence of parts as one digest.
///
/// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
#[must_use]
pub fn blake3_parts<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().to_hex().to_string()
}

/// Truncate a hex digest to at most `len` characters.
#[must_use]
pub fn short(digest: &str, len: usize) -> &str {
    &digest[..len.min(digest.len())]
}
