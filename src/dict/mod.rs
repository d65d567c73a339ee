//! Dictionary lifecycle: metadata, routing table, manifest I/O, trainer,
//! and the retired-table garbage collector.

pub mod gc;
pub mod manifest;
pub mod table;
pub mod trainer;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use zstd::dict::{DecoderDictionary, EncoderDictionary};

use crate::xxhash::dict_signature;

/// A trained dictionary's identity and prepared codec handles.
///
/// Read-only after construction and shared across threads; consecutive
/// routing tables may reference the same `Meta` through its `Arc` during a
/// publication handover. The encoder and decoder handles live as long as
/// the `Meta` and are freed when the last table referencing it is reclaimed
/// by the GC.
pub struct Meta {
    id: u16,
    signature: u64,
    dict_path: PathBuf,
    manifest_path: PathBuf,
    prefixes: Vec<String>,
    created_at: OffsetDateTime,
    encoder: EncoderDictionary<'static>,
    decoder: DecoderDictionary<'static>,
    // Unix seconds of retirement; 0 while the Meta is live in the current
    // table. Stamped exactly once.
    retired_at: AtomicU64,
}

impl Meta {
    /// Builds a Meta from raw dictionary bytes, pre-digesting the encoder
    /// dictionary at `level`. The bytes themselves are not retained.
    pub fn new(
        id: u16,
        dict_bytes: &[u8],
        prefixes: Vec<String>,
        level: i32,
        dict_path: PathBuf,
        manifest_path: PathBuf,
        created_at: OffsetDateTime,
    ) -> Self {
        Meta {
            id,
            signature: dict_signature(dict_bytes),
            dict_path,
            manifest_path,
            prefixes,
            created_at,
            encoder: EncoderDictionary::copy(dict_bytes, level),
            decoder: DecoderDictionary::copy(dict_bytes),
            retired_at: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn signature(&self) -> u64 {
        self.signature
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn dict_path(&self) -> &Path {
        &self.dict_path
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn encoder(&self) -> &EncoderDictionary<'static> {
        &self.encoder
    }

    pub fn decoder(&self) -> &DecoderDictionary<'static> {
        &self.decoder
    }

    /// Stamps the retirement time once; later calls keep the first stamp.
    pub fn retire(&self, now_secs: u64) {
        let _ = self
            .retired_at
            .compare_exchange(0, now_secs, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Unix seconds of retirement, or 0 while live.
    pub fn retired_at(&self) -> u64 {
        self.retired_at.load(Ordering::Acquire)
    }

    /// Two Metas describe the same dictionary when both the id and the
    /// on-disk blob path match. Used by the GC to recognize a dictionary
    /// that is still referenced by the current table.
    pub fn same_identity(&self, id: u16, dict_path: &Path) -> bool {
        self.id == id && self.dict_path == dict_path
    }
}

impl std::fmt::Debug for Meta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meta")
            .field("id", &self.id)
            .field("signature", &format_args!("{:#018x}", self.signature))
            .field("prefixes", &self.prefixes)
            .field("dict_path", &self.dict_path)
            .field("retired_at", &self.retired_at.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dict() -> Vec<u8> {
        let samples: Vec<Vec<u8>> = (0..64)
            .map(|i| format!("sample record number {i} with common words").into_bytes())
            .collect();
        zstd::dict::from_samples(&samples, 8 * 1024).unwrap()
    }

    fn meta_from(bytes: &[u8], id: u16) -> Meta {
        Meta::new(
            id,
            bytes,
            vec!["u:".to_string()],
            3,
            PathBuf::from(format!("/tmp/d-{id:04x}.dict")),
            PathBuf::from(format!("/tmp/d-{id:04x}.mf")),
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn retire_stamps_once() {
        let meta = meta_from(&sample_dict(), 1);
        assert_eq!(meta.retired_at(), 0);
        meta.retire(100);
        meta.retire(200);
        assert_eq!(meta.retired_at(), 100);
    }

    #[test]
    fn identity_requires_id_and_path() {
        let bytes = sample_dict();
        let meta = meta_from(&bytes, 7);
        assert!(meta.same_identity(7, Path::new("/tmp/d-0007.dict")));
        assert!(!meta.same_identity(8, Path::new("/tmp/d-0007.dict")));
        assert!(!meta.same_identity(7, Path::new("/tmp/other.dict")));
    }

    #[test]
    fn signature_matches_blob_hash() {
        let bytes = sample_dict();
        let meta = meta_from(&bytes, 1);
        assert_eq!(meta.signature(), crate::xxhash::dict_signature(&bytes));
    }
}
