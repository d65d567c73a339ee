//! Thin wrapper around the `xxhash-rust` crate providing the XXH64 API used
//! by the rest of this crate.
//!
//! Only XXH64 is needed: dictionary signatures are the sole hash consumer,
//! and they want a stable 64-bit digest that survives process restarts.

/// One-shot XXH64 hash of `data` with the given seed.
///
/// Dictionary signatures always use seed 0 so that a blob re-read from disk
/// hashes to the value recorded in its manifest.
#[inline]
pub fn xxh64_oneshot(data: &[u8], seed: u64) -> u64 {
    xxhash_rust::xxh64::xxh64(data, seed)
}

/// Signature of a dictionary blob as recorded in manifests.
#[inline]
pub fn dict_signature(dict_bytes: &[u8]) -> u64 {
    xxh64_oneshot(dict_bytes, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_reference_vector() {
        // Reference XXH64 of the empty string with seed 0.
        assert_eq!(xxh64_oneshot(b"", 0), 0xEF46_DB37_51D8_E999);
    }

    #[test]
    fn signature_is_stable_across_calls() {
        let blob = b"some dictionary bytes";
        assert_eq!(dict_signature(blob), dict_signature(blob));
        assert_ne!(dict_signature(blob), dict_signature(b"other bytes"));
    }
}
