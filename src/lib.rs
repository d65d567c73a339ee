// dictcache - dictionary-assisted zstd value compression for in-memory
// key-value caches.
//
// Values above a configurable size are compressed with a per-namespace
// trained dictionary and stored behind a 2-byte dictionary-id header; reads
// transparently decompress. A background trainer learns dictionaries from
// a sampled reservoir of live traffic and publishes them through an
// immutable routing table; a quarantined GC reclaims retired tables from
// memory and then from disk.

pub mod codec;
pub mod config;
pub mod dict;
pub mod engine;
pub mod error;
pub mod lorem;
pub mod sample;
pub mod stats;
pub mod threadpool;
pub mod timefn;
pub mod xxhash;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level re-exports for the common API surface.
// ─────────────────────────────────────────────────────────────────────────────

/// Engine configuration: recognized keys, defaults, and validation.
pub use config::{Config, TrainMode};

/// The engine and its encode result.
pub use engine::{EncodeOutcome, Engine, NeverReplicated, ReplicaOracle};

/// Hot-path, trainer, configuration, and async error types.
pub use error::{AsyncError, CodecError, ConfigError, TrainerError};

/// Wire-format helpers: header constants, the raw-frame recognizer, and
/// the no-decompress size query.
pub use codec::header::{
    decoded_size, looks_compressed, DecodedSize, HEADER_SIZE, NO_DICT_ID, RAW_SENTINEL,
};

/// Per-namespace counter snapshots.
pub use stats::StatsSnapshot;

/// Pending result of an asynchronous command.
pub use threadpool::AsyncReply;
