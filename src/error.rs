//! Error types for the hot path, the trainer, and configuration loading.
//!
//! Hot-path failures are surfaced as explicit status values and counted in
//! the statistics registry; nothing on the encode side ever propagates a
//! panic or an opaque error to the host cache.

/// An error returned from the decode side of the codec.
///
/// Encode-side codec failures are swallowed into pass-through (the caller
/// stores the raw value), so only decode surfaces `CodecError` to the host.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum CodecError {
    /// The input is shorter than the 2-byte dictionary-id header.
    #[error("encoded value too short to carry a header ({0} bytes)")]
    TooShort(usize),

    /// The header selects a dictionary id that is not present in the
    /// current routing table. The host should treat the key as unreadable.
    #[error("dictionary {0:#06x} not present in the current routing table")]
    DictMiss(u16),

    /// The zstd decoder rejected the payload.
    #[error("zstd decompression failed")]
    Decompress(#[source] std::io::Error),
}

/// An error returned from a dictionary training cycle.
///
/// Training failures leave the previously published routing table
/// authoritative; the trainer logs, counts, and retries on the next tick.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum TrainerError {
    /// The reservoir did not hold enough sample bytes to train.
    #[error("reservoir holds {have} bytes, {need} required")]
    NotEnoughSamples { have: usize, need: usize },

    /// All ids in `1..=0xFFFE` are assigned to live dictionaries.
    #[error("dictionary id space exhausted")]
    IdSpaceExhausted,

    /// No dictionary directory is configured, so nothing can be published.
    #[error("no dict_dir configured")]
    NoDictDir,

    /// The zdict trainer rejected the sample set.
    #[error("zstd dictionary training failed")]
    Train(#[source] std::io::Error),

    /// Writing the dictionary blob or manifest failed.
    #[error("dictionary store I/O failed")]
    Io(#[source] std::io::Error),
}

/// A configuration load error. Fatal at module load time.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("unknown configuration key `{0}`")]
    UnknownKey(String),

    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: &'static str, value: String },

    #[error("`{key}` out of range: {reason}")]
    OutOfRange { key: &'static str, reason: &'static str },
}

/// Failure of an asynchronous command wrapper.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum AsyncError {
    /// The per-request timeout elapsed before a worker produced a result.
    /// The late result is discarded when it eventually arrives.
    #[error("asynchronous command timed out")]
    Timeout,

    /// The worker pool rejected the submission (bounded queue full and the
    /// pool is configured to fail fast) or shut down mid-flight.
    #[error("asynchronous command was not executed")]
    Rejected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_miss_formats_id_as_hex() {
        let msg = CodecError::DictMiss(0x002a).to_string();
        assert!(msg.contains("0x002a"), "got: {msg}");
    }

    #[test]
    fn not_enough_samples_reports_both_sides() {
        let msg = TrainerError::NotEnoughSamples { have: 10, need: 100 }.to_string();
        assert!(msg.contains("10") && msg.contains("100"));
    }
}
