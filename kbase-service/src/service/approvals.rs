//! Approval decisions and their effect on the gated document.

use tracing::{info, warn};

use crate::db::DocumentStatus;
use crate::error::{ServiceError, ServiceResult};
use crate::service::KnowledgeBaseService;
use crate::workflow::{DOCUMENT_RESOURCE, DecisionOutcome, TaskDecision};

const MAX_WRITE_BACK_ATTEMPTS: usize = 3;

impl KnowledgeBaseService {
    /// Decide an approval task and, once its workflow finishes, move the
    /// document it gates to `pending_publish` (approved) or `failed` (rejected).
    pub async fn approve_task(
        &self,
        task_id: &str,
        approver_id: &str,
        comment: Option<String>,
        decision: TaskDecision,
    ) -> ServiceResult<DecisionOutcome> {
        let outcome = self
            .workflows
            .approve_task(task_id, approver_id, comment, decision)
            .await?;

        if let Some(status) = outcome.resource_status
            && outcome.workflow.resource_type == DOCUMENT_RESOURCE
        {
            self.write_back_document_status(&outcome.workflow.resource_id, status)?;
        }

        Ok(outcome)
    }

    /// Apply a finished workflow's result to its document. Only a document
    /// still waiting in `pending_approval` is moved.
    fn write_back_document_status(&self, document_id: &str, status: DocumentStatus) -> ServiceResult<()> {
        for _ in 0..MAX_WRITE_BACK_ATTEMPTS {
            let Some(document) = self.db.get_document(document_id)? else {
                warn!(doc_id = %document_id, "Approved document no longer exists");
                return Ok(());
            };

            if document.status != DocumentStatus::PendingApproval {
                warn!(
                    doc_id = %document_id,
                    status = document.status.as_str(),
                    target = status.as_str(),
                    "Document left pending_approval; workflow result not applied"
                );
                return Ok(());
            }

            match self.db.set_document_status(document_id, document.version, status) {
                Ok(_) => {
                    info!(doc_id = %document_id, status = status.as_str(), "Workflow result applied to document");
                    return Ok(());
                }
                Err(ServiceError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(ServiceError::VersionConflict {
            document_id: document_id.to_string(),
        })
    }
}
