use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use crate::foundation::error::{ScrubError, ScrubResult};

/// Default maximum number of decoded frames held by a [`crate::FrameCache`].
pub const DEFAULT_CAPACITY: usize = 100;

/// Default cache entry time-to-live (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

/// Frame cache limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCacheOpts {
    /// Maximum number of cached decoded frames. Must be >= 1.
    pub capacity: usize,
    /// Maximum age (since insertion) of an entry that may still be returned.
    pub ttl: Duration,
}

impl Default for FrameCacheOpts {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
        }
    }
}

impl FrameCacheOpts {
    /// Reject limits the cache cannot honor.
    pub fn validate(&self) -> ScrubResult<()> {
        if self.capacity == 0 {
            return Err(ScrubError::validation("cache capacity must be >= 1"));
        }
        if self.ttl.is_zero() {
            return Err(ScrubError::validation("cache ttl must be > 0"));
        }
        Ok(())
    }
}

/// Options controlling a [`crate::FrameResolver`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolverOpts {
    /// Decoded frame cache limits.
    pub cache: FrameCacheOpts,
    /// Override the number of rayon worker threads used for store reads and decoding.
    /// `None` uses rayon defaults.
    pub threads: Option<usize>,
    /// Bound on a single store read. A read exceeding it fails the request with an IO error.
    pub fetch_timeout: Option<Duration>,
}

impl ResolverOpts {
    /// Validate every nested option.
    pub fn validate(&self) -> ScrubResult<()> {
        self.cache.validate()?;
        if self.threads == Some(0) {
            return Err(ScrubError::validation(
                "resolver 'threads' must be >= 1 when set",
            ));
        }
        if self.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ScrubError::validation(
                "resolver 'fetchTimeoutMs' must be > 0 when set",
            ));
        }
        Ok(())
    }
}

/// JSON form of [`ResolverOpts`]. Every field is optional and falls back to the default.
///
/// ```json
/// { "capacity": 100, "ttlMs": 300000, "threads": 2, "fetchTimeoutMs": 2000 }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResolverConfig {
    /// See [`FrameCacheOpts::capacity`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// See [`FrameCacheOpts::ttl`], in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// See [`ResolverOpts::threads`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    /// See [`ResolverOpts::fetch_timeout`], in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_ms: Option<u64>,
}

impl ResolverConfig {
    /// Parse a config from a JSON string.
    pub fn from_json_str(s: &str) -> ScrubResult<Self> {
        serde_json::from_str(s).map_err(|e| ScrubError::serde(e.to_string()))
    }

    /// Read and parse a JSON config file.
    pub fn from_path(path: &Path) -> ScrubResult<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read resolver config '{}'", path.display()))?;
        Self::from_json_str(&s)
    }

    /// Resolve defaults and validate.
    pub fn into_opts(self) -> ScrubResult<ResolverOpts> {
        let defaults = FrameCacheOpts::default();
        let opts = ResolverOpts {
            cache: FrameCacheOpts {
                capacity: self.capacity.unwrap_or(defaults.capacity),
                ttl: self.ttl_ms.map(Duration::from_millis).unwrap_or(defaults.ttl),
            },
            threads: self.threads,
            fetch_timeout: self.fetch_timeout_ms.map(Duration::from_millis),
        };
        opts.validate()?;
        Ok(opts)
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
