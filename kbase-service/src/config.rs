//! Service configuration.
//!
//! Configuration is split in two:
//! - [`StaticConfig`]: read once at startup (data directory, metrics listener)
//! - [`DynamicConfig`]: pipeline tuning, collaborator endpoints and workflow
//!   defaults, held behind an [`ArcSwap`] so it can be reloaded without a restart
//!
//! Both are read from an optional `config.{toml,yaml,json}` file and from
//! `KBASE__SECTION__KEY` environment variables.

mod dynamic_config;
mod loader;
mod static_config;

pub use dynamic_config::{
    ChatConfig, ChatProviderKind, DynamicConfig, EmbeddingProviderKind, EmbeddingsConfig, LimitsConfig, MemberConfig,
    OcrConfig, PipelineConfig, TimeoutConfig, VectorIndexBackend, VectorIndexConfig,
    WorkflowConfig,
};
pub use static_config::{MetricsConfig, StaticConfig, StorageConfig};

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::error::ServiceResult;

use loader::{load_dynamic_config, load_static_config};

// ==================== RuntimeConfig (combines static + dynamic) ====================

/// Runtime configuration manager
/// Combines static config (startup-only) with dynamic config (hot-reloadable via ArcSwap)
pub struct RuntimeConfig {
    /// Static configuration (never changes after startup)
    pub static_config: StaticConfig,
    /// Dynamic configuration (can be hot-reloaded)
    dynamic: ArcSwap<DynamicConfig>,
}

impl RuntimeConfig {
    pub fn new(static_config: StaticConfig, dynamic: DynamicConfig) -> Self {
        Self {
            static_config,
            dynamic: ArcSwap::from_pointee(dynamic),
        }
    }

    /// Load config from file and environment
    pub fn load() -> ServiceResult<Self> {
        Ok(Self::new(load_static_config()?, load_dynamic_config()?))
    }

    /// Get current dynamic config snapshot (lock-free read)
    pub fn dynamic(&self) -> arc_swap::Guard<Arc<DynamicConfig>> {
        self.dynamic.load()
    }

    /// Update dynamic config (atomic swap)
    pub fn update_dynamic(&self, new_config: DynamicConfig) {
        self.dynamic.store(Arc::new(new_config));
    }

    /// Re-read file/env sources and swap the dynamic part atomically
    pub fn reload(&self) -> ServiceResult<()> {
        self.update_dynamic(load_dynamic_config()?);
        Ok(())
    }
}
