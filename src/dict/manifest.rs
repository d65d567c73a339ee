// manifest.rs - atomic dictionary/manifest file I/O and startup reload.
//
// Blobs land as `<dict_dir>/<stem>.dict`, manifests as `<dict_dir>/<stem>.mf`.
// Both are written via a sibling temp file, fsync, rename over the final
// path, fsync of the directory; a crash leaves either the old file or the
// new one, never a torn write.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::config::DICT_ID_MAX;
use crate::xxhash::dict_signature;

use super::Meta;

pub const DICT_EXT: &str = "dict";
pub const MANIFEST_EXT: &str = "mf";

/// Bumped when the manifest schema changes incompatibly.
pub const MANIFEST_VERSION: u32 = 1;

const CODEC_NAME: &str = "zstd";

/// On-disk description of one trained dictionary.
///
/// Parsing tolerates unknown trailing fields so newer writers stay readable
/// by older code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub id: u16,
    pub signature: u64,
    pub codec: String,
    pub format_version: u32,
    pub prefixes: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Manifest {
    pub fn new(id: u16, dict_bytes: &[u8], prefixes: Vec<String>, created_at: OffsetDateTime) -> Self {
        Manifest {
            id,
            signature: dict_signature(dict_bytes),
            codec: CODEC_NAME.to_string(),
            format_version: MANIFEST_VERSION,
            prefixes,
            created_at,
        }
    }
}

/// Writes `bytes` to `path` atomically: temp sibling, fsync, rename, fsync
/// of the containing directory. Mode 0644 on unix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "target path has no parent")
    })?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target path has no name"))?;
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let mut f = File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644))?;
    }
    drop(f);

    fs::rename(&tmp, path)?;
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

/// Persists a dictionary blob and its manifest under `dict_dir/<stem>`.
/// Returns the blob and manifest paths.
pub fn store_dictionary(
    dict_dir: &Path,
    stem: &str,
    dict_bytes: &[u8],
    manifest: &Manifest,
) -> io::Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dict_dir)?;
    let dict_path = dict_dir.join(format!("{stem}.{DICT_EXT}"));
    let manifest_path = dict_dir.join(format!("{stem}.{MANIFEST_EXT}"));

    write_atomic(&dict_path, dict_bytes)?;
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(&manifest_path, &json)?;
    Ok((dict_path, manifest_path))
}

/// Walks `dict_dir`, parses every manifest, and rebuilds the Metas, oldest
/// first. Entries with a missing blob, a bad signature, an out-of-range id,
/// or a foreign codec are skipped with a warning; one bad file never blocks
/// the rest of the reload.
pub fn load_dir(dict_dir: &Path, level: i32) -> io::Result<Vec<Arc<Meta>>> {
    let mut metas: Vec<Arc<Meta>> = Vec::new();
    let entries = match fs::read_dir(dict_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(metas),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let manifest_path = entry?.path();
        if manifest_path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXT) {
            continue;
        }
        match load_one(&manifest_path, level) {
            Ok(meta) => metas.push(meta),
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "skipping dictionary");
            }
        }
    }

    metas.sort_by_key(|m| (m.created_at(), m.id()));
    for window in metas.windows(2) {
        if window[0].id() == window[1].id() {
            warn!(id = window[0].id(), "duplicate dictionary id on disk; newest wins");
        }
    }
    debug!(count = metas.len(), dir = %dict_dir.display(), "dictionaries loaded");
    Ok(metas)
}

fn load_one(manifest_path: &Path, level: i32) -> anyhow::Result<Arc<Meta>> {
    use anyhow::{bail, Context};

    let json = fs::read(manifest_path).context("read manifest")?;
    let manifest: Manifest = serde_json::from_slice(&json).context("parse manifest")?;

    if manifest.codec != CODEC_NAME {
        bail!("unsupported codec `{}`", manifest.codec);
    }
    if manifest.id == 0 || manifest.id > DICT_ID_MAX {
        bail!("dictionary id {:#06x} out of range", manifest.id);
    }

    let dict_path = manifest_path.with_extension(DICT_EXT);
    let dict_bytes = fs::read(&dict_path)
        .with_context(|| format!("read dictionary blob {}", dict_path.display()))?;
    let signature = dict_signature(&dict_bytes);
    if signature != manifest.signature {
        bail!(
            "signature mismatch: manifest {:#018x}, blob {:#018x}",
            manifest.signature,
            signature
        );
    }

    Ok(Arc::new(Meta::new(
        manifest.id,
        &dict_bytes,
        manifest.prefixes,
        level,
        dict_path,
        manifest_path.to_path_buf(),
        manifest.created_at,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn trained_dict() -> Vec<u8> {
        let samples: Vec<Vec<u8>> = (0..64)
            .map(|i| format!("manifest io test record {i} shared structure").into_bytes())
            .collect();
        zstd::dict::from_samples(&samples, 8 * 1024).unwrap()
    }

    #[test]
    fn write_atomic_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.dict");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        // No temp litter left behind.
        let litter = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(litter, 0);
    }

    #[cfg(unix)]
    #[test]
    fn written_files_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.dict");
        write_atomic(&path, b"bytes").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn store_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let bytes = trained_dict();
        let manifest = Manifest::new(
            3,
            &bytes,
            vec!["u:".to_string()],
            OffsetDateTime::now_utc(),
        );
        store_dictionary(dir.path(), "u_-0003", &bytes, &manifest).unwrap();

        let metas = load_dir(dir.path(), 3).unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].id(), 3);
        assert_eq!(metas[0].prefixes(), &["u:".to_string()]);
        assert_eq!(metas[0].signature(), dict_signature(&bytes));
    }

    #[test]
    fn parser_tolerates_unknown_trailing_fields() {
        let json = r#"{
            "id": 9,
            "signature": 1234,
            "codec": "zstd",
            "format_version": 1,
            "prefixes": ["p:"],
            "created_at": "2026-07-01T12:00:00Z",
            "future_field": {"nested": true},
            "another": [1, 2, 3]
        }"#;
        let m: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.id, 9);
        assert_eq!(m.prefixes, vec!["p:".to_string()]);
    }

    #[test]
    fn corrupt_blob_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let bytes = trained_dict();
        let good = Manifest::new(1, &bytes, vec![], OffsetDateTime::now_utc());
        store_dictionary(dir.path(), "good-0001", &bytes, &good).unwrap();

        let bad = Manifest::new(2, &bytes, vec![], OffsetDateTime::now_utc());
        store_dictionary(dir.path(), "bad-0002", &bytes, &bad).unwrap();
        // Flip the blob after the manifest recorded its signature.
        fs::write(dir.path().join("bad-0002.dict"), b"not the dictionary").unwrap();

        let metas = load_dir(dir.path(), 3).unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].id(), 1);
    }

    #[test]
    fn out_of_range_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let bytes = trained_dict();
        for (stem, id) in [("zero-0000", 0u16), ("sentinel-ffff", 0xFFFF)] {
            let m = Manifest {
                id,
                signature: dict_signature(&bytes),
                codec: "zstd".to_string(),
                format_version: MANIFEST_VERSION,
                prefixes: vec![],
                created_at: OffsetDateTime::now_utc(),
            };
            store_dictionary(dir.path(), stem, &bytes, &m).unwrap();
        }
        assert!(load_dir(dir.path(), 3).unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-such-subdir");
        assert!(load_dir(&missing, 3).unwrap().is_empty());
    }
}
