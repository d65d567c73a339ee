// header.rs - the 2-byte value header and frame recognition helpers.
//
// Every encoded value starts with a big-endian u16 dictionary id:
//   0xFFFF          raw payload, stored verbatim
//   0x0000          compressed without a dictionary
//   0x0001..0xFFFE  compressed with the dictionary of that id
//
// The id space deliberately stops at 0xFFFE so the raw sentinel can never
// collide with a trained dictionary.

use crate::error::CodecError;

/// Size of the dictionary-id header preceding every encoded value.
pub const HEADER_SIZE: usize = 2;

/// Header value marking an uncompressed payload.
pub const RAW_SENTINEL: u16 = 0xFFFF;

/// Header value marking a payload compressed without a dictionary.
pub const NO_DICT_ID: u16 = 0;

// First four payload bytes of every zstd frame (magic 0xFD2FB528,
// little-endian on the wire).
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Appends the 2-byte header for `dict_id` to `out`.
#[inline]
pub fn write_header(out: &mut Vec<u8>, dict_id: u16) {
    out.extend_from_slice(&dict_id.to_be_bytes());
}

/// Splits an encoded value into `(dict_id, payload)`.
#[inline]
pub fn parse_header(encoded: &[u8]) -> Result<(u16, &[u8]), CodecError> {
    if encoded.len() < HEADER_SIZE {
        return Err(CodecError::TooShort(encoded.len()));
    }
    let id = u16::from_be_bytes([encoded[0], encoded[1]]);
    Ok((id, &encoded[HEADER_SIZE..]))
}

/// Returns true when `bytes` plausibly carry our header.
///
/// Guards against decoding a value that was stored raw without a header
/// (pass-through at write time). A raw-sentinel header always qualifies;
/// a compressed header only qualifies when the payload opens with the zstd
/// frame magic.
pub fn looks_compressed(bytes: &[u8]) -> bool {
    let Ok((id, payload)) = parse_header(bytes) else {
        return false;
    };
    if id == RAW_SENTINEL {
        return true;
    }
    payload.len() >= ZSTD_MAGIC.len() && payload[..ZSTD_MAGIC.len()] == ZSTD_MAGIC
}

/// Decoded length of an encoded value, when it can be determined without
/// decompressing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodedSize {
    /// Raw payload; length is exact.
    Raw(usize),
    /// Compressed frame with a recorded content size.
    Known(u64),
    /// Frame does not record its content size; the caller must decompress
    /// or treat the length as unknown.
    Unknown,
}

/// Reads the decoded length from the header and, for compressed payloads,
/// the zstd frame-content-size field.
pub fn decoded_size(encoded: &[u8]) -> Result<DecodedSize, CodecError> {
    let (id, payload) = parse_header(encoded)?;
    if id == RAW_SENTINEL {
        return Ok(DecodedSize::Raw(payload.len()));
    }
    match zstd::zstd_safe::get_frame_content_size(payload) {
        Ok(Some(n)) => Ok(DecodedSize::Known(n)),
        Ok(None) | Err(_) => Ok(DecodedSize::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf, 0x1234);
        buf.extend_from_slice(b"payload");
        let (id, payload) = parse_header(&buf).unwrap();
        assert_eq!(id, 0x1234);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn header_is_big_endian() {
        let mut buf = Vec::new();
        write_header(&mut buf, 0x0102);
        assert_eq!(&buf[..2], &[0x01, 0x02]);
    }

    #[test]
    fn too_short_rejected() {
        assert!(matches!(parse_header(&[0xFF]), Err(CodecError::TooShort(1))));
        assert!(matches!(parse_header(&[]), Err(CodecError::TooShort(0))));
    }

    #[test]
    fn raw_sentinel_recognized() {
        assert!(looks_compressed(&[0xFF, 0xFF, b'h', b'i']));
        // Two bytes alone are a valid raw frame with an empty payload.
        assert!(looks_compressed(&[0xFF, 0xFF]));
    }

    #[test]
    fn compressed_needs_frame_magic() {
        // Plausible id but garbage payload: not one of ours.
        assert!(!looks_compressed(&[0x00, 0x01, b'a', b'b', b'c', b'd']));
        let mut frame = vec![0x00, 0x01];
        frame.extend_from_slice(&ZSTD_MAGIC);
        assert!(looks_compressed(&frame));
    }

    #[test]
    fn decoded_size_of_raw_frame() {
        let v = [0xFF, 0xFF, 1, 2, 3];
        assert_eq!(decoded_size(&v).unwrap(), DecodedSize::Raw(3));
    }

    #[test]
    fn decoded_size_of_real_frame() {
        let payload = zstd::bulk::compress(&[7u8; 4096], 1).unwrap();
        let mut v = Vec::new();
        write_header(&mut v, NO_DICT_ID);
        v.extend_from_slice(&payload);
        assert_eq!(decoded_size(&v).unwrap(), DecodedSize::Known(4096));
    }
}
