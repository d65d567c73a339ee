//! Per-thread codec contexts and the compression entry points.
//!
//! Each worker thread owns a dictionaryless `zstd` encoder/decoder pair and
//! one growable scratch buffer, all released at thread exit. Dictionary-bound
//! contexts are built per call from a Meta's prepared dictionary; the
//! prepared dictionary itself is referenced, never copied, so the digest
//! cost is paid once at Meta construction and shared by every thread.

pub mod header;
pub mod probe;

use std::cell::RefCell;
use std::io;

use zstd::bulk::{Compressor, Decompressor};
use zstd::dict::{DecoderDictionary, EncoderDictionary};

// Scratch starts at 64 KiB and grows to the largest value a thread has
// compressed; it is never shrunk.
const SCRATCH_INITIAL: usize = 64 * 1024;

struct CodecTls {
    // (level, context); rebuilt in place when the requested level changes.
    compressor: Option<(i32, Compressor<'static>)>,
    decompressor: Option<Decompressor<'static>>,
    scratch: Vec<u8>,
}

thread_local! {
    static CODEC_TLS: RefCell<CodecTls> = RefCell::new(CodecTls {
        compressor: None,
        decompressor: None,
        scratch: Vec::with_capacity(SCRATCH_INITIAL),
    });
}

impl CodecTls {
    fn compressor_at(&mut self, level: i32) -> io::Result<&mut Compressor<'static>> {
        let rebuild = !matches!(self.compressor, Some((l, _)) if l == level);
        if rebuild {
            self.compressor = Some((level, Compressor::new(level)?));
        }
        Ok(&mut self.compressor.as_mut().expect("compressor cached").1)
    }

    fn decompressor(&mut self) -> io::Result<&mut Decompressor<'static>> {
        if self.decompressor.is_none() {
            self.decompressor = Some(Decompressor::new()?);
        }
        Ok(self.decompressor.as_mut().expect("decompressor cached"))
    }
}

/// Compresses `src` into the calling thread's scratch buffer and hands the
/// compressed bytes to `consume`.
///
/// The closure receives a borrow of the scratch, so callers that reject the
/// result (for example because it did not shrink the value) pay no
/// allocation. `dict` selects a prepared dictionary; `None` compresses
/// dictionaryless with the thread's cached context at `level`.
pub fn compress_scratch<R>(
    src: &[u8],
    dict: Option<&EncoderDictionary<'static>>,
    level: i32,
    consume: impl FnOnce(&[u8]) -> R,
) -> io::Result<R> {
    CODEC_TLS.with(|cell| {
        let mut tls = cell.borrow_mut();
        let bound = zstd::zstd_safe::compress_bound(src.len());
        tls.scratch.clear();
        tls.scratch.reserve(bound);
        match dict {
            Some(prepared) => {
                let mut cctx = Compressor::with_prepared_dictionary(prepared)?;
                cctx.compress_to_buffer(src, &mut tls.scratch)?;
            }
            None => {
                // Split borrow: take the scratch out while the cached
                // context is in use.
                let mut scratch = std::mem::take(&mut tls.scratch);
                let res = tls
                    .compressor_at(level)
                    .and_then(|cctx| cctx.compress_to_buffer(src, &mut scratch));
                tls.scratch = scratch;
                res?;
            }
        }
        Ok(consume(&tls.scratch))
    })
}

/// Decompresses `payload` into a fresh buffer of at most `capacity` bytes.
///
/// `dict` selects the prepared dictionary named by the value header; `None`
/// decodes a dictionaryless frame with the thread's cached context.
pub fn decompress(
    payload: &[u8],
    dict: Option<&DecoderDictionary<'static>>,
    capacity: usize,
) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(capacity);
    match dict {
        Some(prepared) => {
            let mut dctx = Decompressor::with_prepared_dictionary(prepared)?;
            dctx.decompress_to_buffer(payload, &mut out)?;
        }
        None => {
            CODEC_TLS.with(|cell| {
                let mut tls = cell.borrow_mut();
                tls.decompressor()?.decompress_to_buffer(payload, &mut out)
            })?;
        }
    }
    Ok(out)
}

/// Compressed length of `sample` at the cheapest effort level. Used by the
/// incompressibility probe's trial step.
pub(crate) fn trial_compressed_len(sample: &[u8]) -> io::Result<usize> {
    compress_scratch(sample, None, 1, |out| out.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionaryless_roundtrip() {
        let src: Vec<u8> = b"abcd0123".iter().cycle().take(8 * 1024).copied().collect();
        let frame = compress_scratch(&src, None, 3, |out| out.to_vec()).unwrap();
        assert!(frame.len() < src.len());
        let back = decompress(&frame, None, src.len()).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn prepared_dictionary_roundtrip() {
        let samples: Vec<Vec<u8>> = (0..64)
            .map(|i| format!("{{\"user\":{i},\"name\":\"user-{i}\",\"flags\":[1,2,3]}}").into_bytes())
            .collect();
        let dict = zstd::dict::from_samples(&samples, 16 * 1024).unwrap();
        let enc = EncoderDictionary::copy(&dict, 3);
        let dec = DecoderDictionary::copy(&dict);

        let src = &samples[7];
        let frame = compress_scratch(src, Some(&enc), 3, |out| out.to_vec()).unwrap();
        let back = decompress(&frame, Some(&dec), src.len()).unwrap();
        assert_eq!(&back, src);
    }

    #[test]
    fn dictionary_frame_fails_without_dictionary() {
        let samples: Vec<Vec<u8>> = (0..64)
            .map(|i| format!("record {i} with shared structure and text").into_bytes())
            .collect();
        let dict = zstd::dict::from_samples(&samples, 16 * 1024).unwrap();
        let enc = EncoderDictionary::copy(&dict, 3);

        let frame = compress_scratch(&samples[0], Some(&enc), 3, |o| o.to_vec()).unwrap();
        assert!(decompress(&frame, None, 1024).is_err());
    }

    #[test]
    fn level_switch_reuses_thread_context() {
        let src: Vec<u8> = b"level switch ".iter().cycle().take(4096).copied().collect();
        let a = compress_scratch(&src, None, 1, |o| o.to_vec()).unwrap();
        let b = compress_scratch(&src, None, 19, |o| o.to_vec()).unwrap();
        assert_eq!(decompress(&a, None, src.len()).unwrap(), src);
        assert_eq!(decompress(&b, None, src.len()).unwrap(), src);
    }

    #[test]
    fn trial_len_shrinks_text() {
        let text: Vec<u8> = b"the quick brown fox ".iter().cycle().take(512).copied().collect();
        let n = trial_compressed_len(&text).unwrap();
        assert!(n < text.len());
    }
}
