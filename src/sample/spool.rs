// spool.rs - append-only on-disk sample spool.
//
// One spool file per namespace under `spool_dir`. The format is a plain
// sequence of length-prefixed records:
//
//   u32-LE key_len | key bytes | u32-LE value_len | value bytes
//
// Writes are best effort: a failing spool never blocks the write path, it
// just stops spooling for that namespace.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Upper bound on a single spooled field; larger prefixes mean a corrupt
/// or foreign file.
const FIELD_MAX: u32 = 64 * 1024 * 1024;

/// File-name stem for a namespace prefix: printable-safe characters kept,
/// everything else mapped to `_`, empty prefix spelled out.
pub(crate) fn prefix_file_stem(prefix: &str) -> String {
    if prefix.is_empty() {
        return "default".to_string();
    }
    prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Full spool path for a namespace.
pub fn spool_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}.spool", prefix_file_stem(prefix)))
}

/// Appends length-prefixed (key, value) records to one namespace's spool.
pub struct SpoolWriter {
    file: File,
}

impl SpoolWriter {
    pub fn open(dir: &Path, prefix: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(spool_path(dir, prefix))?;
        Ok(SpoolWriter { file })
    }

    pub fn append(&mut self, key: &[u8], value: &[u8]) -> io::Result<()> {
        // One buffered write per record so concurrent appenders from other
        // processes cannot interleave inside a record.
        let mut rec = Vec::with_capacity(8 + key.len() + value.len());
        rec.extend_from_slice(&(key.len() as u32).to_le_bytes());
        rec.extend_from_slice(key);
        rec.extend_from_slice(&(value.len() as u32).to_le_bytes());
        rec.extend_from_slice(value);
        self.file.write_all(&rec)
    }
}

/// Iterates the records of a spool file.
pub struct SpoolReader {
    reader: BufReader<File>,
}

impl SpoolReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(SpoolReader {
            reader: BufReader::new(File::open(path)?),
        })
    }

    fn read_field(&mut self, at_record_start: bool) -> io::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && at_record_start => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf);
        if len > FIELD_MAX {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("spool field length {len} exceeds limit"),
            ));
        }
        let mut field = vec![0u8; len as usize];
        self.reader.read_exact(&mut field)?;
        Ok(Some(field))
    }
}

impl Iterator for SpoolReader {
    type Item = io::Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = match self.read_field(true) {
            Ok(Some(k)) => k,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };
        match self.read_field(false) {
            Ok(Some(v)) => Some(Ok((key, v))),
            // A record with a key but no value is a truncated tail.
            Ok(None) => Some(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "spool record truncated",
            ))),
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stem_sanitizes_prefix() {
        assert_eq!(prefix_file_stem(""), "default");
        assert_eq!(prefix_file_stem("u:"), "u_");
        assert_eq!(prefix_file_stem("user.cache-1"), "user.cache-1");
        assert_eq!(prefix_file_stem("a/b"), "a_b");
    }

    #[test]
    fn writer_reader_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut w = SpoolWriter::open(dir.path(), "u:").unwrap();
        w.append(b"u:1", b"first value").unwrap();
        w.append(b"u:2", b"").unwrap();
        w.append(b"u:3", &[0u8; 300]).unwrap();
        drop(w);

        let records: Vec<_> = SpoolReader::open(&spool_path(dir.path(), "u:"))
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], (b"u:1".to_vec(), b"first value".to_vec()));
        assert_eq!(records[1].1, Vec::<u8>::new());
        assert_eq!(records[2].1.len(), 300);
    }

    #[test]
    fn reopen_appends() {
        let dir = TempDir::new().unwrap();
        SpoolWriter::open(dir.path(), "p:")
            .unwrap()
            .append(b"p:1", b"one")
            .unwrap();
        SpoolWriter::open(dir.path(), "p:")
            .unwrap()
            .append(b"p:2", b"two")
            .unwrap();

        let n = SpoolReader::open(&spool_path(dir.path(), "p:"))
            .unwrap()
            .count();
        assert_eq!(n, 2);
    }

    #[test]
    fn truncated_tail_is_an_error_not_a_panic() {
        let dir = TempDir::new().unwrap();
        let path = spool_path(dir.path(), "t:");
        SpoolWriter::open(dir.path(), "t:")
            .unwrap()
            .append(b"t:1", b"value")
            .unwrap();
        // Chop the last two bytes off the value.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let results: Vec<_> = SpoolReader::open(&path).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
