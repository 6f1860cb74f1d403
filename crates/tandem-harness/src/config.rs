//! Config - Harness Configuration
//!
//! `tandem.toml` settings for a collective run, plus the tuning flags that are
//! passed through to workers as environment variables.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_core::Tolerance;

use crate::error::HarnessResult;
use crate::spec::{BackendKind, ExecutionMode};

/// Environment variable carrying the memory fraction hint.
pub const ENV_FRACTION_OF_MEMORY: &str = "TANDEM_FRACTION_OF_MEMORY_TO_USE";
/// Environment variable that makes eager the default mode.
pub const ENV_ENABLE_EAGER_MODE: &str = "TANDEM_ENABLE_EAGER_MODE";
/// Log filter forwarded to workers.
pub const ENV_RUST_LOG: &str = "RUST_LOG";

// =============================================================================
// Harness Configuration
// =============================================================================

/// Harness configuration (tandem.toml)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Directory for per-rank worker logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Host the rendezvous ports are bound on
    #[serde(default = "default_host")]
    pub host: String,

    /// Base seed; rank r uses seed + r. Process ids are used when unset.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Collective transport
    #[serde(default)]
    pub backend: BackendKind,

    /// Execution mode
    #[serde(default)]
    pub mode: ExecutionMode,

    /// API layer selector
    #[serde(default)]
    pub path_id: u32,

    /// How long workers keep dialing peers, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Comparison tolerance
    #[serde(default)]
    pub tolerance: Tolerance,

    /// Flags forwarded to workers
    #[serde(default)]
    pub tuning: TuningFlags,
}

fn default_log_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            host: default_host(),
            seed: None,
            backend: BackendKind::default(),
            mode: ExecutionMode::default(),
            path_id: 0,
            connect_timeout_secs: default_connect_timeout(),
            tolerance: Tolerance::default(),
            tuning: TuningFlags::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: HarnessConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> HarnessResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Seed for `rank` under the explicit-seed policy.
    pub fn seed_for(&self, rank: usize) -> Option<u64> {
        self.seed.map(|s| s.wrapping_add(rank as u64))
    }
}

// =============================================================================
// Tuning Flags
// =============================================================================

/// Runtime flags passed to every worker through its environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningFlags {
    /// Memory fraction hint for the device allocator
    #[serde(default = "default_fraction")]
    pub fraction_of_memory_to_use: f64,

    /// Make eager the default when a worker gets no explicit mode
    #[serde(default)]
    pub eager_mode: bool,

    /// Log filter for workers; inherits the harness's `RUST_LOG` when unset
    #[serde(default)]
    pub rust_log: Option<String>,
}

fn default_fraction() -> f64 {
    0.15
}

impl Default for TuningFlags {
    fn default() -> Self {
        Self {
            fraction_of_memory_to_use: default_fraction(),
            eager_mode: false,
            rust_log: None,
        }
    }
}

impl TuningFlags {
    /// Environment pairs to set on a worker.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            (
                ENV_FRACTION_OF_MEMORY.to_string(),
                self.fraction_of_memory_to_use.to_string(),
            ),
            (
                ENV_ENABLE_EAGER_MODE.to_string(),
                if self.eager_mode { "1" } else { "0" }.to_string(),
            ),
        ];
        if let Some(filter) = self.rust_log.clone().or_else(|| std::env::var(ENV_RUST_LOG).ok()) {
            pairs.push((ENV_RUST_LOG.to_string(), filter));
        }
        pairs
    }

    /// Reads the flags from the current process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fraction_of_memory_to_use = lookup(ENV_FRACTION_OF_MEMORY)
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_fraction);
        let eager_mode = lookup(ENV_ENABLE_EAGER_MODE)
            .is_some_and(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"));
        Self {
            fraction_of_memory_to_use,
            eager_mode,
            rust_log: lookup(ENV_RUST_LOG),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: HarnessConfig = toml::from_str("").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.tolerance, Tolerance::new(1e-5, 1e-5));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tandem.toml");
        let config = HarnessConfig {
            seed: Some(7),
            backend: BackendKind::Ring,
            mode: ExecutionMode::Eager,
            ..HarnessConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(HarnessConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file() {
        let config: HarnessConfig = toml::from_str(
            r#"
            backend = "ring"
            seed = 100

            [tolerance]
            rtol = 1e-3
            atol = 1e-6
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Ring);
        assert_eq!(config.seed_for(1), Some(101));
        assert_eq!(config.tolerance.atol, 1e-6);
        assert_eq!(config.mode, ExecutionMode::Graph);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tandem.toml");
        std::fs::write(&path, "backend = [").unwrap();
        assert!(matches!(
            HarnessConfig::load(&path),
            Err(crate::error::HarnessError::Config(_))
        ));
    }

    #[test]
    fn test_tuning_flags_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_ENABLE_EAGER_MODE, "1"),
            (ENV_FRACTION_OF_MEMORY, "0.5"),
        ]);
        let flags = TuningFlags::from_lookup(|k| env.get(k).map(ToString::to_string));
        assert!(flags.eager_mode);
        assert_eq!(flags.fraction_of_memory_to_use, 0.5);
        assert_eq!(flags.rust_log, None);

        let flags = TuningFlags::from_lookup(|_| None);
        assert_eq!(flags, TuningFlags::default());
    }

    #[test]
    fn test_env_pairs() {
        let flags = TuningFlags {
            eager_mode: true,
            rust_log: Some("debug".to_string()),
            ..TuningFlags::default()
        };
        let pairs = flags.env_pairs();
        assert!(pairs.contains(&(ENV_ENABLE_EAGER_MODE.to_string(), "1".to_string())));
        assert!(pairs.contains(&(ENV_RUST_LOG.to_string(), "debug".to_string())));
        assert!(pairs.contains(&(ENV_FRACTION_OF_MEMORY.to_string(), "0.15".to_string())));
    }
}
