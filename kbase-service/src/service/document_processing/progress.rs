//! Version-tracked document transitions for one pipeline run.

use tracing::debug;

use crate::db::{Database, DocumentStatus};
use crate::error::ServiceResult;

/// The document row as this run last wrote it.
///
/// Every transition is conditional on `version`, so once another writer
/// (a retry, a delete, a second run) touches the row, the next transition
/// here fails with `VersionConflict` and the run stops.
pub(super) struct PipelineRun {
    pub document_id: String,
    pub version: i64,
}

impl PipelineRun {
    pub fn new(document_id: &str, version: i64) -> Self {
        Self {
            document_id: document_id.to_string(),
            version,
        }
    }

    pub fn advance(&mut self, db: &Database, status: DocumentStatus, progress: u8) -> ServiceResult<()> {
        self.version = db.transition_document(&self.document_id, self.version, status, progress)?;
        debug!(
            doc_id = %self.document_id,
            status = status.as_str(),
            progress,
            "Document progress"
        );
        Ok(())
    }

    pub fn save_content(&mut self, db: &Database, content: &str, progress: u8) -> ServiceResult<()> {
        self.version = db.save_extracted_content(&self.document_id, self.version, content, progress)?;
        debug!(doc_id = %self.document_id, progress, chars = content.chars().count(), "Extracted content saved");
        Ok(())
    }

    pub fn complete(
        &mut self,
        db: &Database,
        status: DocumentStatus,
        workflow_id: Option<&str>,
    ) -> ServiceResult<()> {
        self.version = db.complete_document(&self.document_id, self.version, status, workflow_id)?;
        Ok(())
    }

    pub fn fail(&mut self, db: &Database, error: &str) -> ServiceResult<()> {
        self.version = db.mark_document_failed(&self.document_id, self.version, error)?;
        Ok(())
    }
}
