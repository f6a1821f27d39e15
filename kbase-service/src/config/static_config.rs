//! Static configuration that cannot be changed at runtime.
//! These settings decide where state lives on disk and require a restart to change.

use serde::Deserialize;
use std::path::PathBuf;

/// Static configuration that cannot be changed at runtime
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("kbase.db")
    }

    pub fn blob_root(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Socket address for the scrape endpoint, e.g. `0.0.0.0:9000`. Unset disables the exporter.
    #[serde(default)]
    pub listen: Option<String>,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            storage: default_storage(),
            metrics: MetricsConfig::default(),
        }
    }
}

// ==================== Default Value Functions ====================

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

pub(crate) fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
