//! Cancellation token management for document processing.

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::service::KnowledgeBaseService;

/// Handle for one registered pipeline run
pub(super) struct RunToken {
    run_id: Uuid,
    pub token: CancellationToken,
}

impl KnowledgeBaseService {
    /// Register a cancellation token for a document being processed.
    /// A run already registered for the document is cancelled; the newest run wins.
    pub(super) fn register_processing_token(&self, document_id: &str) -> RunToken {
        let run = RunToken {
            run_id: Uuid::new_v4(),
            token: CancellationToken::new(),
        };
        if let Some((_, previous)) = self
            .processing_tokens
            .insert(document_id.to_string(), (run.run_id, run.token.clone()))
        {
            previous.cancel();
        }
        run
    }

    /// Cancel processing for a document if in progress.
    pub(crate) fn cancel_document_processing(&self, document_id: &str) -> bool {
        if let Some((_, (_, token))) = self.processing_tokens.remove(document_id) {
            token.cancel();
            info!(doc_id = %document_id, "Document processing cancellation triggered");
            true
        } else {
            false
        }
    }

    /// Remove a run's token when it finishes, unless a newer run replaced it.
    pub(super) fn unregister_processing_token(&self, document_id: &str, run: &RunToken) {
        self.processing_tokens
            .remove_if(document_id, |_, (run_id, _)| *run_id == run.run_id);
    }

    /// Check if processing should continue for a document.
    pub(super) fn check_cancellation(&self, document_id: &str, run: &RunToken) -> ServiceResult<()> {
        if run.token.is_cancelled() {
            Err(ServiceError::Cancelled {
                document_id: document_id.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Whether a pipeline run is currently registered for the document
    pub fn is_processing(&self, document_id: &str) -> bool {
        self.processing_tokens.contains_key(document_id)
    }
}
