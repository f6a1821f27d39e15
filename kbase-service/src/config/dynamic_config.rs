//! Dynamic configuration that can be swapped at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Dynamic configuration, re-read from file/env on reload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub vector_index: VectorIndexConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Space id -> members. Used by the built-in membership lookup.
    #[serde(default)]
    pub membership: HashMap<String, Vec<MemberConfig>>,
}

/// Document pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Concurrent embedding calls per document
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,

    /// Concurrent pipeline runs across documents
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Re-enqueue documents left in a non-terminal status by a previous process
    #[serde(default = "default_true")]
    pub resume_interrupted: bool,
}

/// Per-collaborator call deadlines, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_blob_timeout_secs")]
    pub blob_secs: u64,

    #[serde(default = "default_ocr_timeout_secs")]
    pub ocr_secs: u64,

    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_secs: u64,

    #[serde(default = "default_vector_index_timeout_secs")]
    pub vector_index_secs: u64,

    #[serde(default = "default_membership_timeout_secs")]
    pub membership_secs: u64,

    #[serde(default = "default_chat_timeout_secs")]
    pub chat_secs: u64,
}

impl TimeoutConfig {
    pub fn blob(&self) -> Duration {
        Duration::from_secs(self.blob_secs)
    }

    pub fn ocr(&self) -> Duration {
        Duration::from_secs(self.ocr_secs)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    pub fn vector_index(&self) -> Duration {
        Duration::from_secs(self.vector_index_secs)
    }

    pub fn membership(&self) -> Duration {
        Duration::from_secs(self.membership_secs)
    }

    pub fn chat(&self) -> Duration {
        Duration::from_secs(self.chat_secs)
    }
}

/// Size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    #[default]
    Hashed,
}

/// Embeddings configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    #[serde(default = "default_embeddings_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Vector width. Must match the model for remote providers.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorIndexBackend {
    Qdrant,
    #[default]
    Memory,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    #[serde(default)]
    pub backend: VectorIndexBackend,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_distance")]
    pub distance: String,
}

/// OCR service configuration. No base URL means OCR is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_ocr_language")]
    pub language: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatProviderKind {
    #[default]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

/// Chat model used to answer questions. No base URL means Q&A is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub provider: ChatProviderKind,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_chat_temperature")]
    pub temperature: f32,

    #[serde(default = "default_chat_max_tokens")]
    pub max_tokens: u32,

    /// Search hits handed to the model when answering over a whole space
    #[serde(default = "default_context_chunks")]
    pub context_chunks: usize,

    /// Upper bound on the context text sent with one question
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

/// Approval workflow defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_approver_role")]
    pub approver_role: String,

    #[serde(default = "default_step_name")]
    pub step_name: String,

    #[serde(default = "default_step_timeout_hours")]
    pub step_timeout_hours: u32,
}

/// One member entry in the static membership table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embedding_concurrency: default_embedding_concurrency(),
            worker_concurrency: default_worker_concurrency(),
            resume_interrupted: true,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            blob_secs: default_blob_timeout_secs(),
            ocr_secs: default_ocr_timeout_secs(),
            embedding_secs: default_embedding_timeout_secs(),
            vector_index_secs: default_vector_index_timeout_secs(),
            membership_secs: default_membership_timeout_secs(),
            chat_secs: default_chat_timeout_secs(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_document_size_bytes: default_max_document_size(),
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            base_url: default_embeddings_url(),
            model: default_embedding_model(),
            api_key: None,
            dimensions: default_dimensions(),
        }
    }
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: VectorIndexBackend::default(),
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            distance: default_distance(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            language: default_ocr_language(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: ChatProviderKind::default(),
            base_url: None,
            model: default_chat_model(),
            api_key: None,
            temperature: default_chat_temperature(),
            max_tokens: default_chat_max_tokens(),
            context_chunks: default_context_chunks(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            approver_role: default_approver_role(),
            step_name: default_step_name(),
            step_timeout_hours: default_step_timeout_hours(),
        }
    }
}

// ==================== Default Value Functions ====================

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    120
}

fn default_embedding_concurrency() -> usize {
    4
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_blob_timeout_secs() -> u64 {
    10
}

fn default_ocr_timeout_secs() -> u64 {
    60
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_vector_index_timeout_secs() -> u64 {
    30
}

fn default_membership_timeout_secs() -> u64 {
    10
}

fn default_chat_timeout_secs() -> u64 {
    60
}

fn default_max_document_size() -> u64 {
    50 * 1024 * 1024
}

fn default_embeddings_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_dimensions() -> usize {
    768
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_collection() -> String {
    "kb_chunks".to_string()
}

fn default_distance() -> String {
    "Cosine".to_string()
}

fn default_ocr_language() -> String {
    "ch".to_string()
}

fn default_chat_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_chat_temperature() -> f32 {
    0.7
}

fn default_chat_max_tokens() -> u32 {
    2000
}

fn default_context_chunks() -> usize {
    5
}

fn default_max_context_chars() -> usize {
    24_000
}

fn default_approver_role() -> String {
    "approver".to_string()
}

fn default_step_name() -> String {
    "Document publish approval".to_string()
}

fn default_step_timeout_hours() -> u32 {
    168
}
