//! Main document processing pipeline.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::cancellation::RunToken;
use super::progress::PipelineRun;
use crate::clients::with_timeout;
use crate::db::{Document, DocumentStatus, Workflow};
use crate::error::{ExtractionError, ServiceError, ServiceResult, format_error_chain};
use crate::ingestion::TextExtractor;
use crate::service::KnowledgeBaseService;
use crate::workflow::DOCUMENT_RESOURCE;

/// Progress checkpoints, in percent
const CLAIMED: u8 = 10;
const DOWNLOADED: u8 = 20;
const EXTRACTING: u8 = 30;
const EXTRACTED: u8 = 60;
const VECTORIZING: u8 = 70;

impl KnowledgeBaseService {
    /// Run the whole pipeline for a document.
    ///
    /// Always starts from the download, whatever the document's current
    /// status. A stage failure is recorded on the document as
    /// `process_failed` and the failed document is returned; the error only
    /// propagates when the document cannot be found or the failure itself
    /// cannot be recorded. If another writer takes the document over
    /// mid-run (retry, delete, a concurrent run) this run stops quietly and
    /// returns the document as that writer left it.
    pub async fn process_document(&self, document_id: &str) -> ServiceResult<Document> {
        let document = self.require_document(document_id)?;
        let started = Instant::now();
        let run_token = self.register_processing_token(document_id);
        let mut run = PipelineRun::new(document_id, document.version);

        info!(doc_id = %document_id, title = %document.title, "Starting document processing");

        let result = self.run_pipeline(&mut run, &document, &run_token).await;
        self.unregister_processing_token(document_id, &run_token);

        let outcome = match result {
            Ok(status) => {
                info!(
                    doc_id = %document_id,
                    status = status.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Document processed"
                );
                "completed"
            }
            Err(
                ServiceError::VersionConflict { .. }
                | ServiceError::DocumentNotFound { .. }
                | ServiceError::Cancelled { .. },
            ) => {
                info!(doc_id = %document_id, "Document was taken over by another writer; stopping");
                "superseded"
            }
            Err(e) => {
                let message = format_error_chain(&e);
                error!(
                    doc_id = %document_id,
                    error = %message,
                    timeout = e.is_timeout(),
                    "Document processing failed"
                );
                match run.fail(&self.db, &message) {
                    Ok(()) => {}
                    Err(ServiceError::VersionConflict { .. } | ServiceError::DocumentNotFound { .. }) => {
                        debug!(doc_id = %document_id, "Failure not recorded; document changed meanwhile");
                    }
                    Err(record_err) => {
                        warn!(
                            doc_id = %document_id,
                            original_error = %message,
                            update_error = %record_err,
                            "Failed to mark document as failed"
                        );
                        return Err(record_err);
                    }
                }
                "failed"
            }
        };

        metrics::counter!("kbase_documents_processed_total", "outcome" => outcome).increment(1);
        metrics::histogram!("kbase_pipeline_duration_seconds").record(started.elapsed().as_secs_f64());

        self.require_document(document_id)
    }

    /// The stages, in order. Returns the terminal status reached.
    async fn run_pipeline(
        &self,
        run: &mut PipelineRun,
        document: &Document,
        run_token: &RunToken,
    ) -> ServiceResult<DocumentStatus> {
        let doc_id = &document.id;
        let timeouts = self.runtime_config.dynamic().timeouts.clone();

        // Claim the document; a concurrent claim loses on the version check
        run.advance(&self.db, DocumentStatus::Processing, CLAIMED)?;

        // Step 1: download
        self.check_cancellation(doc_id, run_token)?;
        let data = with_timeout(
            "blob download",
            timeouts.blob(),
            self.blobs.get(&document.storage_path),
        )
        .await
        .map_err(ExtractionError::Download)?;
        run.advance(&self.db, DocumentStatus::Processing, DOWNLOADED)?;

        // Step 2: extract text
        self.check_cancellation(doc_id, run_token)?;
        run.advance(&self.db, DocumentStatus::Processing, EXTRACTING)?;
        let text = TextExtractor::new(self.ocr.clone(), timeouts.ocr())
            .extract(&document.file_name, &data)
            .await?;
        run.save_content(&self.db, &text, EXTRACTED)?;
        info!(doc_id = %doc_id, chars = text.chars().count(), "Text extracted");

        // Step 3: chunk, embed and index
        self.check_cancellation(doc_id, run_token)?;
        run.advance(&self.db, DocumentStatus::Vectorizing, VECTORIZING)?;
        self.index_document(run, document, &text).await?;

        // Step 4: hand off to approval, or straight to pending_publish
        self.check_cancellation(doc_id, run_token)?;
        self.complete_pipeline(run, document).await
    }

    async fn complete_pipeline(
        &self,
        run: &mut PipelineRun,
        document: &Document,
    ) -> ServiceResult<DocumentStatus> {
        if !document.need_approval {
            run.complete(&self.db, DocumentStatus::PendingPublish, None)?;
            return Ok(DocumentStatus::PendingPublish);
        }

        match self.open_approval(document).await {
            Ok(workflow) => {
                run.complete(&self.db, DocumentStatus::PendingApproval, Some(&workflow.id))?;
                info!(doc_id = %document.id, workflow_id = %workflow.id, "Document awaiting approval");
                Ok(DocumentStatus::PendingApproval)
            }
            Err(e) => {
                error!(
                    doc_id = %document.id,
                    error = %format_error_chain(&e),
                    "Failed to create approval workflow; document goes straight to pending_publish"
                );
                run.complete(&self.db, DocumentStatus::PendingPublish, None)?;
                Ok(DocumentStatus::PendingPublish)
            }
        }
    }

    /// Create (or reuse) the document's approval workflow and fan out its tasks
    async fn open_approval(&self, document: &Document) -> ServiceResult<Workflow> {
        let workflow = self.workflows.create_workflow_with_step(
            &document.space_id,
            &document.id,
            DOCUMENT_RESOURCE,
            &document.uploaded_by,
        )?;

        if let Err(e) = self.workflows.start_workflow(&workflow.id).await {
            if let Err(cancel_err) = self.workflows.cancel_workflow(&workflow.id) {
                warn!(
                    workflow_id = %workflow.id,
                    error = %cancel_err,
                    "Failed to cancel half-created workflow"
                );
            }
            return Err(e);
        }

        Ok(workflow)
    }
}
