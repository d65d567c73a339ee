// config.rs - engine configuration: recognized keys, defaults, validation.
//
// The host cache passes configuration as textual `key value` pairs at module
// load; `Config::from_pairs` parses them and `Config::validate` rejects
// anything out of range before any thread is spawned. After load the struct
// is read-only; runtime mutation is not supported.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Numeric constants
// ---------------------------------------------------------------------------
pub const KB: usize = 1 << 10;
pub const MB: usize = 1 << 20;
pub const GB: usize = 1 << 30;

/// Target size for trained dictionaries. 110 KiB is the usual zstd choice.
pub const DICT_SIZE_DEFAULT: usize = 110 * KB;

/// Highest dictionary id the trainer may assign. `0xFFFF` is the raw
/// sentinel on the wire and must never identify a dictionary.
pub const DICT_ID_MAX: u16 = 0xFFFE;

/// Dictionary training mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainMode {
    /// Single-pass cover training. Cheap, good enough for rolling retrains.
    Fast,
    /// Multi-pass parameter optimization. Slower, slightly better ratios.
    Optimize,
}

/// Returns the default number of asynchronous worker threads: the physical
/// core count with a small share spared for the host cache's own threads.
pub fn default_nb_workers() -> usize {
    let nb_cores = num_cpus::get_physical();
    let spared = 1 + (nb_cores >> 3);
    if nb_cores <= spared {
        1
    } else {
        nb_cores - spared
    }
}

// ---------------------------------------------------------------------------
// Configuration struct
// ---------------------------------------------------------------------------

/// All tunable parameters for the compression engine, trainer, GC, sampler,
/// and worker pool.
#[derive(Clone, Debug)]
pub struct Config {
    /// Master switch for the encode path. Decode always stays available so
    /// values written before the switch remain readable. Default: true.
    pub enable_comp: bool,
    /// When false, compression runs without a dictionary (id 0 on the
    /// wire) even if trained dictionaries exist. Default: true.
    pub enable_dict: bool,
    /// Directory holding dictionary blobs and manifests. `None` disables
    /// persistence, training publication, and reload.
    pub dict_dir: Option<PathBuf>,
    /// Target trained dictionary size in bytes. Default: 110 KiB.
    pub dict_size: usize,
    /// zstd effort level, 1..=22. Default: 3.
    pub zstd_level: i32,
    /// Values shorter than this are stored raw without probing. Default: 64.
    pub min_comp_size: usize,
    /// Values longer than this are stored raw without probing. Default: 4 MiB.
    pub max_comp_size: usize,

    /// Whether the background trainer thread runs. Default: true.
    pub enable_training: bool,
    /// Minimum seconds between successful training runs. Default: 900.
    pub retraining_interval_s: u64,
    /// Reservoir bytes required before a namespace is trained. Default: 1 MiB.
    pub min_training_size: usize,
    /// Fast or optimize zdict invocation. Default: fast.
    pub train_mode: TrainMode,
    /// Samples older than this are dropped at the start of a training
    /// cycle. Default: 1 hour.
    pub training_window_duration: Duration,

    /// Drift-detector EWMA smoothing factor, in (0, 1]. Default: 0.2.
    pub ewma_alpha: f64,
    /// Relative ratio drift that arms a retrain signal. Default: 0.3.
    pub retrain_drop: f64,

    /// Time a retired routing table stays in memory before its
    /// dictionaries become reclaimable. Default: 60 s.
    pub gc_cool_period: Duration,
    /// Time after a dictionary's retirement before its files are
    /// unlinked. Default: 300 s.
    pub gc_quarantine_period: Duration,
    /// Trained dictionaries retained per namespace; older ones are retired
    /// when a new one is published. Default: 3.
    pub dict_retain_max: usize,

    /// Whether writes feed the sample reservoir. Default: true.
    pub enable_sampling: bool,
    /// Bernoulli probability that a write is considered for sampling, in
    /// [0, 1]. Default: 0.01.
    pub sample_p: f64,
    /// Reservoir wall-clock window. Default: 1 hour.
    pub sample_window_duration: Duration,
    /// Directory for the append-only sample spool. `None` keeps samples in
    /// memory only.
    pub spool_dir: Option<PathBuf>,
    /// Reservoir byte cap per namespace. Default: 8 MiB.
    pub spool_max_bytes: usize,

    /// Whether the asynchronous command wrappers get a worker pool.
    /// Default: false.
    pub async_cmd_enabled: bool,
    /// Worker threads in the pool. Default: derived from the core count.
    pub async_thread_pool_size: usize,
    /// Bounded submission queue length. Default: 64.
    pub async_queue_size: usize,
    /// On queue overflow, fail the submission instead of blocking the
    /// producer. Default: false (block).
    pub async_fail_fast: bool,

    /// Log verbosity hint for the host's tracing subscriber. 0 = errors
    /// only, 1 = info, 2 = debug, 3+ = trace. Default: 1.
    pub verbose: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enable_comp: true,
            enable_dict: true,
            dict_dir: None,
            dict_size: DICT_SIZE_DEFAULT,
            zstd_level: 3,
            min_comp_size: 64,
            max_comp_size: 4 * MB,
            enable_training: true,
            retraining_interval_s: 900,
            min_training_size: MB,
            train_mode: TrainMode::Fast,
            training_window_duration: Duration::from_secs(3600),
            ewma_alpha: 0.2,
            retrain_drop: 0.3,
            gc_cool_period: Duration::from_secs(60),
            gc_quarantine_period: Duration::from_secs(300),
            dict_retain_max: 3,
            enable_sampling: true,
            sample_p: 0.01,
            sample_window_duration: Duration::from_secs(3600),
            spool_dir: None,
            spool_max_bytes: 8 * MB,
            async_cmd_enabled: false,
            async_thread_pool_size: default_nb_workers(),
            async_queue_size: 64,
            async_fail_fast: false,
            verbose: 1,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a sequence of `(key, value)` pairs as passed by the host at
    /// module load, then validates the result. Any unrecognized key or
    /// malformed value is fatal.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut cfg = Config::default();
        for (key, value) in pairs {
            cfg.apply(key, value)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Applies a single textual `key value` setting.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "enable_comp" => self.enable_comp = parse_bool("enable_comp", value)?,
            "enable_dict" => self.enable_dict = parse_bool("enable_dict", value)?,
            "dict_dir" => self.dict_dir = parse_dir(value),
            "dict_size" => self.dict_size = parse_size("dict_size", value)?,
            "zstd_level" => self.zstd_level = parse_int("zstd_level", value)?,
            "min_comp_size" => self.min_comp_size = parse_size("min_comp_size", value)?,
            "max_comp_size" => self.max_comp_size = parse_size("max_comp_size", value)?,
            "enable_training" => self.enable_training = parse_bool("enable_training", value)?,
            "retraining_interval_s" => {
                self.retraining_interval_s = parse_int("retraining_interval_s", value)?
            }
            "min_training_size" => {
                self.min_training_size = parse_size("min_training_size", value)?
            }
            "train_mode" => {
                self.train_mode = match value {
                    "fast" => TrainMode::Fast,
                    "optimize" => TrainMode::Optimize,
                    _ => {
                        return Err(ConfigError::InvalidValue {
                            key: "train_mode",
                            value: value.to_string(),
                        })
                    }
                }
            }
            "training_window_duration" => {
                self.training_window_duration =
                    Duration::from_secs(parse_int("training_window_duration", value)?)
            }
            "ewma_alpha" => self.ewma_alpha = parse_float("ewma_alpha", value)?,
            "retrain_drop" => self.retrain_drop = parse_float("retrain_drop", value)?,
            "gc_cool_period" => {
                self.gc_cool_period = Duration::from_secs(parse_int("gc_cool_period", value)?)
            }
            "gc_quarantine_period" => {
                self.gc_quarantine_period =
                    Duration::from_secs(parse_int("gc_quarantine_period", value)?)
            }
            "dict_retain_max" => self.dict_retain_max = parse_int("dict_retain_max", value)?,
            "enable_sampling" => self.enable_sampling = parse_bool("enable_sampling", value)?,
            "sample_p" => self.sample_p = parse_float("sample_p", value)?,
            "sample_window_duration" => {
                self.sample_window_duration =
                    Duration::from_secs(parse_int("sample_window_duration", value)?)
            }
            "spool_dir" => self.spool_dir = parse_dir(value),
            "spool_max_bytes" => self.spool_max_bytes = parse_size("spool_max_bytes", value)?,
            "async_cmd_enabled" => {
                self.async_cmd_enabled = parse_bool("async_cmd_enabled", value)?
            }
            "async_thread_pool_size" => {
                self.async_thread_pool_size = parse_int("async_thread_pool_size", value)?
            }
            "async_queue_size" => self.async_queue_size = parse_int("async_queue_size", value)?,
            "async_fail_fast" => self.async_fail_fast = parse_bool("async_fail_fast", value)?,
            "verbose" => self.verbose = parse_int("verbose", value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Sanity-checks field ranges. Called once at load; failures are fatal
    /// to the module load.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=22).contains(&self.zstd_level) {
            return Err(ConfigError::OutOfRange {
                key: "zstd_level",
                reason: "must be within 1..=22",
            });
        }
        if self.dict_size == 0 {
            return Err(ConfigError::OutOfRange {
                key: "dict_size",
                reason: "must be nonzero",
            });
        }
        if self.min_comp_size > self.max_comp_size {
            return Err(ConfigError::OutOfRange {
                key: "min_comp_size",
                reason: "must not exceed max_comp_size",
            });
        }
        if !(0.0..=1.0).contains(&self.sample_p) {
            return Err(ConfigError::OutOfRange {
                key: "sample_p",
                reason: "must be within [0, 1]",
            });
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(ConfigError::OutOfRange {
                key: "ewma_alpha",
                reason: "must be within (0, 1]",
            });
        }
        if self.retrain_drop < 0.0 {
            return Err(ConfigError::OutOfRange {
                key: "retrain_drop",
                reason: "must be non-negative",
            });
        }
        if self.dict_retain_max == 0 {
            return Err(ConfigError::OutOfRange {
                key: "dict_retain_max",
                reason: "must retain at least one dictionary",
            });
        }
        if self.async_cmd_enabled
            && (self.async_thread_pool_size == 0 || self.async_queue_size == 0)
        {
            return Err(ConfigError::OutOfRange {
                key: "async_thread_pool_size",
                reason: "pool and queue must be nonzero when async commands are enabled",
            });
        }
        Ok(())
    }

    /// Tracing level the host's subscriber is advised to use, derived from
    /// `verbose`. The crate never installs a subscriber itself.
    pub fn tracing_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_int<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_float(key: &'static str, value: &str) -> Result<f64, ConfigError> {
    let v: f64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
    }
}

/// Byte sizes accept an optional `k` / `m` / `g` suffix (binary multiples).
fn parse_size(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    let (digits, mult) = match value.as_bytes().last() {
        Some(b'k') | Some(b'K') => (&value[..value.len() - 1], KB),
        Some(b'm') | Some(b'M') => (&value[..value.len() - 1], MB),
        Some(b'g') | Some(b'G') => (&value[..value.len() - 1], GB),
        _ => (value, 1),
    };
    let n: usize = digits.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })?;
    n.checked_mul(mult).ok_or(ConfigError::OutOfRange {
        key,
        reason: "size overflows usize",
    })
}

/// Empty string clears a directory setting.
fn parse_dir(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().expect("defaults must be sane");
    }

    #[test]
    fn from_pairs_applies_and_validates() {
        let cfg = Config::from_pairs(vec![
            ("enable_comp", "yes"),
            ("zstd_level", "19"),
            ("min_comp_size", "128"),
            ("max_comp_size", "1m"),
            ("train_mode", "optimize"),
            ("sample_p", "0.5"),
        ])
        .unwrap();
        assert!(cfg.enable_comp);
        assert_eq!(cfg.zstd_level, 19);
        assert_eq!(cfg.min_comp_size, 128);
        assert_eq!(cfg.max_comp_size, MB);
        assert_eq!(cfg.train_mode, TrainMode::Optimize);
        assert_eq!(cfg.sample_p, 0.5);
    }

    #[test]
    fn unknown_key_is_fatal() {
        let err = Config::from_pairs(vec![("no_such_key", "1")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(_)));
    }

    #[test]
    fn zstd_level_bounds_enforced() {
        assert!(Config::from_pairs(vec![("zstd_level", "0")]).is_err());
        assert!(Config::from_pairs(vec![("zstd_level", "23")]).is_err());
        assert!(Config::from_pairs(vec![("zstd_level", "22")]).is_ok());
    }

    #[test]
    fn min_above_max_rejected() {
        let err = Config::from_pairs(vec![("min_comp_size", "1m"), ("max_comp_size", "1k")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size("x", "64").unwrap(), 64);
        assert_eq!(parse_size("x", "4k").unwrap(), 4 * KB);
        assert_eq!(parse_size("x", "2M").unwrap(), 2 * MB);
        assert_eq!(parse_size("x", "1g").unwrap(), GB);
        assert!(parse_size("x", "4q").is_err());
    }

    #[test]
    fn empty_dir_clears_setting() {
        let mut cfg = Config::default();
        cfg.apply("dict_dir", "/tmp/dicts").unwrap();
        assert!(cfg.dict_dir.is_some());
        cfg.apply("dict_dir", "").unwrap();
        assert!(cfg.dict_dir.is_none());
    }

    #[test]
    fn verbose_maps_to_tracing_levels() {
        let mut cfg = Config::default();
        cfg.verbose = 0;
        assert_eq!(cfg.tracing_level(), tracing::Level::WARN);
        cfg.verbose = 2;
        assert_eq!(cfg.tracing_level(), tracing::Level::DEBUG);
        cfg.verbose = 9;
        assert_eq!(cfg.tracing_level(), tracing::Level::TRACE);
    }

    #[test]
    fn bernoulli_probability_bounds() {
        assert!(Config::from_pairs(vec![("sample_p", "1.5")]).is_err());
        assert!(Config::from_pairs(vec![("sample_p", "-0.1")]).is_err());
        assert!(Config::from_pairs(vec![("sample_p", "0")]).is_ok());
    }
}
