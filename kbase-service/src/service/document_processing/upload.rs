//! Document upload.

use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};

use crate::clients::blob::document_object_key;
use crate::clients::with_timeout;
use crate::db::{Document, DocumentStatus};
use crate::error::{ServiceError, ServiceResult, format_error_chain};
use crate::service::KnowledgeBaseService;

/// Metadata supplied with an upload
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub space_id: String,
    #[serde(default)]
    pub sub_space_id: Option<String>,
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub need_approval: bool,
    pub uploaded_by: String,
}

impl KnowledgeBaseService {
    /// Upload a document and enqueue it for processing
    ///
    /// Returns once the bytes are in the blob store; the pipeline runs on a
    /// worker afterwards. Clients poll the document for status and progress.
    pub async fn upload_document(&self, new: NewDocument, content: Bytes) -> ServiceResult<Document> {
        let (max_size, blob_timeout) = {
            let config = self.runtime_config.dynamic();
            (config.limits.max_document_size_bytes, config.timeouts.blob())
        };

        if content.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Uploaded file is empty".to_string(),
            });
        }
        if content.len() as u64 > max_size {
            return Err(ServiceError::InvalidRequest {
                message: format!(
                    "File is {} bytes, larger than the {} byte limit",
                    content.len(),
                    max_size
                ),
            });
        }
        if new.file_name.trim().is_empty() || new.space_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "File name and space id are required".to_string(),
            });
        }

        let doc_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let title = if new.title.trim().is_empty() {
            default_title(&new.file_name)
        } else {
            new.title.trim().to_string()
        };

        let document = Document {
            storage_path: document_object_key(&new.space_id, &doc_id, &new.file_name),
            id: doc_id.clone(),
            title,
            file_name: new.file_name,
            file_size: content.len() as u64,
            content_type: new.content_type,
            content: None,
            status: DocumentStatus::Uploading,
            process_progress: 0,
            retry_count: 0,
            last_retry_at: None,
            parse_error: None,
            vector_count: 0,
            need_approval: new.need_approval,
            space_id: new.space_id,
            sub_space_id: new.sub_space_id,
            class_id: new.class_id,
            workflow_id: None,
            uploaded_by: new.uploaded_by,
            version: 1,
            created_at: now,
            updated_at: now,
            processed_at: None,
            published_at: None,
        };

        self.db.insert_document(&document)?;

        if let Err(e) = with_timeout(
            "blob upload",
            blob_timeout,
            self.blobs.put(&document.storage_path, content),
        )
        .await
        {
            let err = ServiceError::Storage(e);
            let message = format_error_chain(&err);
            error!(doc_id = %doc_id, error = %message, "Failed to store uploaded document");
            // Not left in `uploading`, where crash recovery would pick it up
            self.db
                .mark_document_failed(&doc_id, document.version, &message)?;
            return Err(err);
        }

        metrics::counter!("kbase_documents_uploaded_total").increment(1);
        info!(
            doc_id = %doc_id,
            title = %document.title,
            space_id = %document.space_id,
            size = document.file_size,
            "Document uploaded and queued for processing"
        );

        self.queue.enqueue(&doc_id);

        Ok(document)
    }
}

/// File name without its final extension
fn default_title(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}
