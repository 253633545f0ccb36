// Configuration for the generation cache and orchestrator

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::Error;
use crate::snac::SNAC_SAMPLE_RATE;

/// What to do with a computation that completes after `clear()` started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearPolicy {
    /// Store the late result like any other.
    #[default]
    Retain,
    /// Hand the result to its waiters but do not store it.
    Discard,
}

impl FromStr for ClearPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(ClearPolicy::Retain),
            "discard" => Ok(ClearPolicy::Discard),
            other => Err(Error::InvalidRequest(format!(
                "unknown clear policy '{other}' (expected 'retain' or 'discard')"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false nothing is stored; concurrent duplicates are still coalesced.
    pub enabled: bool,
    /// Write-through directory. `None` keeps entries in memory only.
    pub dir: Option<PathBuf>,
    /// Upper bound on the summed size of stored audio.
    pub max_bytes: u64,
    pub clear_policy: ClearPolicy,
    /// Assumed for disk files whose header cannot be read.
    pub default_sample_rate: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_bytes: 512 * 1024 * 1024,
            clear_policy: ClearPolicy::Retain,
            default_sample_rate: SNAC_SAMPLE_RATE,
        }
    }
}

impl CacheConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Upper bound on one model + codec run.
    pub generation_timeout: Duration,
    /// Leading samples dropped from every waveform (codec warm-up).
    pub warmup_trim_samples: usize,
    /// Pause between failed model load attempts.
    pub load_retry_delay: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(120),
            warmup_trim_samples: 2048,
            load_retry_delay: Duration::from_secs(5),
        }
    }
}
