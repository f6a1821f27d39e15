//! Document CRUD operations.
//!
//! Every status-changing write is conditional on the caller's last-seen
//! `version` and bumps it, so two writers racing on one document cannot both
//! succeed. Soft-deleted rows are invisible to all reads and writes here.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::Database;
use super::models::{DOCUMENT_COLUMNS, Document, DocumentStatus};
use crate::error::{DatabaseError, ServiceError, ServiceResult};

impl Database {
    /// Insert a new document
    pub fn insert_document(&self, doc: &Document) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO documents (id, title, file_name, storage_path, file_size, content_type, content, status,
                process_progress, retry_count, last_retry_at, parse_error, vector_count, need_approval,
                space_id, sub_space_id, class_id, workflow_id, uploaded_by, version, created_at, updated_at,
                processed_at, published_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
            "#,
            params![
                doc.id,
                doc.title,
                doc.file_name,
                doc.storage_path,
                doc.file_size as i64,
                doc.content_type,
                doc.content,
                doc.status.as_str(),
                doc.process_progress as i64,
                doc.retry_count as i64,
                doc.last_retry_at.map(|t| t.to_rfc3339()),
                doc.parse_error,
                doc.vector_count as i64,
                doc.need_approval,
                doc.space_id,
                doc.sub_space_id,
                doc.class_id,
                doc.workflow_id,
                doc.uploaded_by,
                doc.version,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
                doc.processed_at.map(|t| t.to_rfc3339()),
                doc.published_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM documents WHERE id = ?1 AND deleted_at IS NULL",
                DOCUMENT_COLUMNS
            ),
            params![id],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// List the documents of a space, newest first
    pub fn list_documents_by_space(&self, space_id: &str) -> ServiceResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM documents WHERE space_id = ?1 AND deleted_at IS NULL \
                 ORDER BY created_at DESC",
                DOCUMENT_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let docs = stmt
            .query_map(params![space_id], Document::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(docs)
    }

    /// List live documents currently in any of the given statuses, oldest first
    pub fn list_documents_with_status(
        &self,
        statuses: &[DocumentStatus],
    ) -> ServiceResult<Vec<Document>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();

        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM documents WHERE status IN ({}) AND deleted_at IS NULL \
                 ORDER BY created_at ASC",
                DOCUMENT_COLUMNS, placeholders
            ))
            .map_err(DatabaseError::Query)?;

        let docs = stmt
            .query_map(
                rusqlite::params_from_iter(statuses.iter().map(|s| s.as_str())),
                Document::from_row,
            )
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(docs)
    }

    /// Move a document to a new pipeline status/progress. Returns the new version.
    pub fn transition_document(
        &self,
        id: &str,
        expected_version: i64,
        status: DocumentStatus,
        progress: u8,
    ) -> ServiceResult<i64> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, process_progress = ?2, version = version + 1, updated_at = ?3 \
                 WHERE id = ?4 AND version = ?5 AND deleted_at IS NULL",
                params![
                    status.as_str(),
                    progress as i64,
                    Utc::now().to_rfc3339(),
                    id,
                    expected_version
                ],
            )
            .map_err(DatabaseError::Query)?;

        versioned_outcome(&conn, id, expected_version, rows)
    }

    /// Store the extracted text and advance progress
    pub fn save_extracted_content(
        &self,
        id: &str,
        expected_version: i64,
        content: &str,
        progress: u8,
    ) -> ServiceResult<i64> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET content = ?1, process_progress = ?2, version = version + 1, updated_at = ?3 \
                 WHERE id = ?4 AND version = ?5 AND deleted_at IS NULL",
                params![
                    content,
                    progress as i64,
                    Utc::now().to_rfc3339(),
                    id,
                    expected_version
                ],
            )
            .map_err(DatabaseError::Query)?;

        versioned_outcome(&conn, id, expected_version, rows)
    }

    /// Final pipeline transition: 100% progress, terminal status and the
    /// workflow that now gates publication (if any)
    pub fn complete_document(
        &self,
        id: &str,
        expected_version: i64,
        status: DocumentStatus,
        workflow_id: Option<&str>,
    ) -> ServiceResult<i64> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, process_progress = 100, workflow_id = ?2, \
                 version = version + 1, updated_at = ?3 \
                 WHERE id = ?4 AND version = ?5 AND deleted_at IS NULL",
                params![
                    status.as_str(),
                    workflow_id,
                    Utc::now().to_rfc3339(),
                    id,
                    expected_version
                ],
            )
            .map_err(DatabaseError::Query)?;

        versioned_outcome(&conn, id, expected_version, rows)
    }

    /// Record a pipeline failure: `process_failed`, no progress, no vectors
    pub fn mark_document_failed(
        &self,
        id: &str,
        expected_version: i64,
        error: &str,
    ) -> ServiceResult<i64> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, process_progress = 0, vector_count = 0, parse_error = ?2, \
                 version = version + 1, updated_at = ?3 \
                 WHERE id = ?4 AND version = ?5 AND deleted_at IS NULL",
                params![
                    DocumentStatus::ProcessFailed.as_str(),
                    error,
                    Utc::now().to_rfc3339(),
                    id,
                    expected_version
                ],
            )
            .map_err(DatabaseError::Query)?;

        versioned_outcome(&conn, id, expected_version, rows)
    }

    /// Retry bookkeeping: bump the retry counter and reset to `processing`/0%
    pub fn reset_document_for_retry(&self, id: &str, expected_version: i64) -> ServiceResult<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, process_progress = 0, parse_error = NULL, \
                 retry_count = retry_count + 1, last_retry_at = ?2, version = version + 1, updated_at = ?2 \
                 WHERE id = ?3 AND version = ?4 AND deleted_at IS NULL",
                params![DocumentStatus::Processing.as_str(), now, id, expected_version],
            )
            .map_err(DatabaseError::Query)?;

        versioned_outcome(&conn, id, expected_version, rows)
    }

    /// Status write-back from a finished workflow
    pub fn set_document_status(
        &self,
        id: &str,
        expected_version: i64,
        status: DocumentStatus,
    ) -> ServiceResult<i64> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, version = version + 1, updated_at = ?2 \
                 WHERE id = ?3 AND version = ?4 AND deleted_at IS NULL",
                params![status.as_str(), Utc::now().to_rfc3339(), id, expected_version],
            )
            .map_err(DatabaseError::Query)?;

        versioned_outcome(&conn, id, expected_version, rows)
    }

    /// `pending_publish -> published`. The status guard lives in the statement
    /// so a concurrent transition away from `pending_publish` cannot be overwritten.
    pub fn publish_document(&self, id: &str, expected_version: i64) -> ServiceResult<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, published_at = ?2, version = version + 1, updated_at = ?2 \
                 WHERE id = ?3 AND version = ?4 AND status = ?5 AND deleted_at IS NULL",
                params![
                    DocumentStatus::Published.as_str(),
                    now,
                    id,
                    expected_version,
                    DocumentStatus::PendingPublish.as_str()
                ],
            )
            .map_err(DatabaseError::Query)?;

        versioned_outcome(&conn, id, expected_version, rows)
    }

    /// Soft-delete a document and drop its chunk rows in one transaction.
    ///
    /// Returns the vector ids of the dropped chunks so the caller can purge
    /// them from the index, or `None` when the document does not exist or is
    /// already deleted.
    pub fn soft_delete_document(&self, id: &str) -> ServiceResult<Option<Vec<String>>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let now = Utc::now().to_rfc3339();

        let rows = tx
            .execute(
                "UPDATE documents SET deleted_at = ?1, vector_count = 0, version = version + 1, updated_at = ?1 \
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![now, id],
            )
            .map_err(DatabaseError::Query)?;
        if rows == 0 {
            return Ok(None);
        }

        let vector_ids = {
            let mut stmt = tx
                .prepare("SELECT vector_id FROM chunks WHERE document_id = ?1")
                .map_err(DatabaseError::Query)?;
            let ids = stmt
                .query_map(params![id], |row| row.get(0))
                .map_err(DatabaseError::Query)?
                .collect::<Result<Vec<String>, _>>()
                .map_err(DatabaseError::Query)?;
            ids
        };
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id])
            .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(Some(vector_ids))
    }
}

/// Turn the affected-row count of a version-guarded update into the new
/// version, or explain why nothing matched.
pub(super) fn versioned_outcome(
    conn: &Connection,
    id: &str,
    expected_version: i64,
    rows: usize,
) -> ServiceResult<i64> {
    if rows > 0 {
        return Ok(expected_version + 1);
    }

    let live: Option<i64> = conn
        .query_row(
            "SELECT version FROM documents WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(DatabaseError::Query)?;

    match live {
        None => Err(ServiceError::DocumentNotFound {
            document_id: id.to_string(),
        }),
        Some(_) => Err(ServiceError::VersionConflict {
            document_id: id.to_string(),
        }),
    }
}
