//! Document reads, publish, delete and retry.

use tracing::{info, warn};

use crate::clients::with_timeout;
use crate::db::{Chunk, Document, DocumentStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::service::KnowledgeBaseService;
use crate::workflow::DOCUMENT_RESOURCE;

const MAX_VERSION_RETRIES: usize = 3;

impl KnowledgeBaseService {
    pub fn get_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.require_document(document_id)
    }

    pub fn list_documents(&self, space_id: &str) -> ServiceResult<Vec<Document>> {
        self.db.list_documents_by_space(space_id)
    }

    pub fn get_document_chunks(&self, document_id: &str) -> ServiceResult<Vec<Chunk>> {
        self.require_document(document_id)?;
        self.db.get_document_chunks(document_id)
    }

    /// `pending_publish -> published`
    pub fn publish_document(&self, document_id: &str) -> ServiceResult<Document> {
        let document = self.require_document(document_id)?;
        if document.status != DocumentStatus::PendingPublish {
            return Err(ServiceError::InvalidState {
                message: format!(
                    "Document {} is {}, only pending_publish documents can be published",
                    document_id,
                    document.status.as_str()
                ),
            });
        }

        self.db.publish_document(document_id, document.version)?;
        metrics::counter!("kbase_documents_published_total").increment(1);
        info!(doc_id = %document_id, "Document published");

        self.require_document(document_id)
    }

    /// Delete a document with its chunks, vector points and stored bytes.
    ///
    /// The row is soft-deleted and its chunks dropped in one transaction;
    /// purging the index and the blob store afterwards is best-effort.
    pub async fn delete_document(&self, document_id: &str) -> ServiceResult<()> {
        let document = self.require_document(document_id)?;

        self.cancel_document_processing(document_id);
        if let Some(workflow) = self
            .workflows
            .current_workflow_for_resource(DOCUMENT_RESOURCE, document_id)?
        {
            self.workflows.cancel_workflow(&workflow.id)?;
        }

        let vector_ids = self
            .db
            .soft_delete_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })?;

        let timeouts = self.runtime_config.dynamic().timeouts.clone();

        if !vector_ids.is_empty()
            && let Err(e) = with_timeout(
                "vector delete",
                timeouts.vector_index(),
                self.vector_index.delete(&vector_ids),
            )
            .await
        {
            warn!(
                doc_id = %document_id,
                points = vector_ids.len(),
                error = %e,
                "Failed to remove vector points of deleted document"
            );
        }

        if let Err(e) = with_timeout(
            "blob delete",
            timeouts.blob(),
            self.blobs.delete(&document.storage_path),
        )
        .await
        {
            warn!(doc_id = %document_id, error = %e, "Failed to remove stored document bytes");
        }

        metrics::counter!("kbase_documents_deleted_total").increment(1);
        info!(doc_id = %document_id, chunks = vector_ids.len(), "Document deleted");
        Ok(())
    }

    /// Reset a document and queue it for another pipeline run.
    ///
    /// Only documents in `process_failed` or `failed` are retried unless
    /// `force` is set; otherwise the document is returned unchanged. A run
    /// in flight is cancelled first.
    pub fn retry_process_document(&self, document_id: &str, force: bool) -> ServiceResult<Document> {
        let mut document = self.require_document(document_id)?;
        if !force && !document.status.is_retryable() {
            info!(
                doc_id = %document_id,
                status = document.status.as_str(),
                "Document not in a retryable state; nothing to do"
            );
            return Ok(document);
        }

        self.cancel_document_processing(document_id);

        let mut attempt = 1;
        loop {
            match self.db.reset_document_for_retry(document_id, document.version) {
                Ok(_) => break,
                Err(ServiceError::VersionConflict { .. }) if attempt < MAX_VERSION_RETRIES => {
                    attempt += 1;
                    document = self.require_document(document_id)?;
                }
                Err(e) => return Err(e),
            }
        }

        metrics::counter!("kbase_document_retries_total").increment(1);
        self.queue.enqueue(document_id);
        info!(doc_id = %document_id, force, "Document queued for retry");

        self.require_document(document_id)
    }
}
