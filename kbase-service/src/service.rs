mod answers;
mod approvals;
mod document_processing;
mod search;

pub use answers::{Answer, AnswerSource};
pub use document_processing::{NewDocument, ProcessingQueue};
pub use search::{SearchHit, make_snippet};

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::clients::{
    BlobStore, ChatModel, EmbeddingProvider, OcrProvider, SpaceMembership, VectorIndex,
};
use crate::config::RuntimeConfig;
use crate::db::{Database, Document};
use crate::error::{ServiceError, ServiceResult};
use crate::workflow::WorkflowEngine;

/// External systems the service is wired to
pub struct Collaborators {
    pub blobs: Arc<dyn BlobStore>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub vector_index: Arc<dyn VectorIndex>,
    /// `None` when no OCR service is configured
    pub ocr: Option<Arc<dyn OcrProvider>>,
    pub membership: Arc<dyn SpaceMembership>,
    /// `None` when no chat model is configured
    pub chat: Option<Arc<dyn ChatModel>>,
}

/// Main service coordinator: document pipeline, approvals, search and Q&A
pub struct KnowledgeBaseService {
    pub runtime_config: Arc<RuntimeConfig>,
    pub db: Arc<Database>,
    pub blobs: Arc<dyn BlobStore>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub vector_index: Arc<dyn VectorIndex>,
    ocr: Option<Arc<dyn OcrProvider>>,
    chat: Option<Arc<dyn ChatModel>>,
    pub workflows: WorkflowEngine,
    queue: ProcessingQueue,
    /// Cancellation for in-flight pipeline runs, keyed by document id.
    /// The run id tells a finished run's token apart from its successor's.
    processing_tokens: DashMap<String, (Uuid, CancellationToken)>,
}

impl KnowledgeBaseService {
    pub fn new(
        runtime_config: Arc<RuntimeConfig>,
        db: Arc<Database>,
        collaborators: Collaborators,
    ) -> Self {
        info!(
            embedding_model = %collaborators.embeddings.model_name(),
            dimensions = collaborators.embeddings.dimensions(),
            ocr = collaborators.ocr.is_some(),
            chat = collaborators.chat.is_some(),
            "Initializing knowledge base service"
        );

        let workflows = WorkflowEngine::new(
            db.clone(),
            collaborators.membership,
            runtime_config.clone(),
        );

        Self {
            runtime_config,
            db,
            blobs: collaborators.blobs,
            embeddings: collaborators.embeddings,
            vector_index: collaborators.vector_index,
            ocr: collaborators.ocr,
            chat: collaborators.chat,
            workflows,
            queue: ProcessingQueue::new(),
            processing_tokens: DashMap::new(),
        }
    }

    /// Jobs waiting for a pipeline worker
    pub fn queue(&self) -> &ProcessingQueue {
        &self.queue
    }

    pub(crate) fn require_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }
}
