//! Node configuration for the Grove full node.
//!
//! [`NodeConfig`] has usable defaults for every field. [`NodeConfig::load`]
//! layers an optional TOML/JSON/YAML file and `GROVE__*` environment
//! variables (double underscore separates nesting, e.g.
//! `GROVE__MEMPOOL__MAX_TOTAL_COST`) over those defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use grove_core::constants::NetworkType;
use grove_core::error::GroveError;
use grove_core::mempool::DEFAULT_MAX_TOTAL_COST;
use grove_core::seen::{DEFAULT_SEEN_CAPACITY, DEFAULT_SEEN_TTL_SECS};

use crate::logging::LogFormat;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GROVE";

/// Mempool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Capacity of the pool in summed bundle cost.
    pub max_total_cost: u64,
    /// Number of recently admitted bundle names remembered.
    pub seen_capacity: usize,
    pub seen_ttl_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_total_cost: DEFAULT_MAX_TOTAL_COST,
            seen_capacity: DEFAULT_SEEN_CAPACITY,
            seen_ttl_secs: DEFAULT_SEEN_TTL_SECS,
        }
    }
}

/// Configuration for a full node instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    pub network: NetworkType,
    /// Log level filter string (e.g. "info", "debug", "grove_node_lib=trace").
    pub log_level: String,
    pub log_format: LogFormat,
    pub mempool: MempoolConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grove");

        Self {
            data_dir,
            network: NetworkType::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            mempool: MempoolConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from `path` (if given and present) and the
    /// environment, falling back to defaults for anything unset.
    pub fn load(path: Option<&Path>) -> Result<Self, GroveError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GroveError::Config(e.to_string()))
    }

    /// Per-network directory under [`data_dir`](Self::data_dir).
    pub fn network_dir(&self) -> PathBuf {
        self.data_dir.join(self.network.data_dir_suffix())
    }

    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.network_dir().join("chaindata")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_log_level_is_info() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn default_data_dir_ends_with_grove() {
        let cfg = NodeConfig::default();
        assert!(
            cfg.data_dir.ends_with("grove"),
            "data_dir should end with 'grove': {:?}",
            cfg.data_dir
        );
    }

    #[test]
    fn db_path_is_per_network() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/grove-test"),
            network: NetworkType::Regtest,
            ..NodeConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/grove-test/regtest/chaindata"));
    }

    #[test]
    fn mempool_defaults_match_core() {
        let cfg = MempoolConfig::default();
        assert_eq!(cfg.max_total_cost, DEFAULT_MAX_TOTAL_COST);
        assert_eq!(cfg.seen_capacity, DEFAULT_SEEN_CAPACITY);
    }

    #[test]
    fn load_without_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = NodeConfig::load(Some(&dir.path().join("missing.toml"))).unwrap();
        assert_eq!(cfg.mempool, MempoolConfig::default());
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grove.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "network = \"testnet\"\nlog_format = \"json\"\n\n[mempool]\nmax_total_cost = 1000\n"
        )
        .unwrap();

        let cfg = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.network, NetworkType::Testnet);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.mempool.max_total_cost, 1000);
        assert_eq!(cfg.mempool.seen_ttl_secs, DEFAULT_SEEN_TTL_SECS);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grove.toml");
        std::fs::write(&path, "mempool = 7").unwrap();
        assert!(matches!(NodeConfig::load(Some(&path)), Err(GroveError::Config(_))));
    }

    #[test]
    fn config_is_clone_and_debug() {
        let cfg = NodeConfig::default();
        let cfg2 = cfg.clone();
        let debug = format!("{cfg2:?}");
        assert!(debug.contains("NodeConfig"));
    }
}
