use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<V: FromStr>(profile: &str, key: &str, default: V) -> V {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SKEL_PROFILE`. When set (e.g. `BENCH`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SKEL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            worker: WorkerConfig::from_env_profiled(p),
            logging: LoggingConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  worker:  threads={}, take_timeout_ms={}, batch_siblings={}, id_source={}",
            self.worker.threads,
            self.worker.take_timeout_ms,
            self.worker.batch_siblings,
            self.worker.id_source
        );
        tracing::info!("  logging: filter={}", self.logging.filter);
    }

    /// Return a JSON view of the effective settings.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "worker": {
                "threads": self.worker.threads,
                "take_timeout_ms": self.worker.take_timeout_ms,
                "batch_siblings": self.worker.batch_siblings,
                "id_source": self.worker.id_source.to_string(),
            },
            "logging": { "filter": self.logging.filter },
        })
    }
}

// ── Worker ────────────────────────────────────────────────────

/// Where task ids come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdSourceKind {
    /// 64 random bits per id, no collision detection.
    #[default]
    Random,
    /// Process-wide counter. Deterministic, useful for replay and tests.
    Sequential,
}

impl FromStr for IdSourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" | "uuid" => Ok(Self::Random),
            "sequential" | "counter" => Ok(Self::Sequential),
            other => Err(ConfigError::InvalidValue {
                key: "ID_SOURCE".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for IdSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => f.write_str("random"),
            Self::Sequential => f.write_str("sequential"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker threads. 0 = available parallelism.
    pub threads: usize,
    /// Budget for one blocking take. Non-positive = wait until notified.
    pub take_timeout_ms: i64,
    /// Take whole sibling cohorts at once instead of single tasks.
    pub batch_siblings: bool,
    pub id_source: IdSourceKind,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let id_source = match profiled_env_opt(p, "ID_SOURCE") {
            Some(raw) => raw.parse().unwrap_or_else(|e: ConfigError| {
                tracing::warn!(error = %e, "falling back to random id source");
                IdSourceKind::Random
            }),
            None => IdSourceKind::Random,
        };
        Self {
            threads: profiled_env_parse(p, "WORKER_THREADS", 0),
            take_timeout_ms: profiled_env_parse(p, "TAKE_TIMEOUT_MS", 250),
            batch_siblings: profiled_env_or(p, "BATCH_SIBLINGS", "false") == "true",
            id_source,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            take_timeout_ms: 250,
            batch_siblings: false,
            id_source: IdSourceKind::Random,
        }
    }
}

// ── Logging ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl LoggingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            filter: profiled_env_or(p, "LOG_FILTER", "info"),
        }
    }
}
