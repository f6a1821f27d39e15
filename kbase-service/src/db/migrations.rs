//! Database schema migrations.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// Called during database initialization; every statement is idempotent.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Documents table
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            file_name TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            content_type TEXT,
            content TEXT,
            status TEXT NOT NULL DEFAULT 'uploading',
            process_progress INTEGER NOT NULL DEFAULT 0,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_retry_at TEXT,
            parse_error TEXT,
            vector_count INTEGER NOT NULL DEFAULT 0,
            need_approval INTEGER NOT NULL DEFAULT 0,
            space_id TEXT NOT NULL,
            sub_space_id TEXT,
            class_id TEXT,
            workflow_id TEXT,
            uploaded_by TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            processed_at TEXT,
            published_at TEXT,
            deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_documents_space ON documents(space_id, deleted_at);
        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);

        -- Chunks table; vector_id points into the external vector index
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            vector_id TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, chunk_index);

        -- Approval workflows
        CREATE TABLE IF NOT EXISTS workflows (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing',
            current_step_id TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_workflows_resource ON workflows(resource_type, resource_id, status);

        CREATE TABLE IF NOT EXISTS workflow_steps (
            id TEXT PRIMARY KEY,
            workflow_id TEXT NOT NULL,
            name TEXT NOT NULL,
            step_order INTEGER NOT NULL,
            approver_role TEXT NOT NULL,
            required INTEGER NOT NULL DEFAULT 1,
            timeout_hours INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'processing',
            created_at TEXT NOT NULL,
            FOREIGN KEY (workflow_id) REFERENCES workflows(id) ON DELETE CASCADE,
            UNIQUE (workflow_id, step_order)
        );

        CREATE TABLE IF NOT EXISTS workflow_tasks (
            id TEXT PRIMARY KEY,
            workflow_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            approver_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing',
            comment TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (workflow_id) REFERENCES workflows(id) ON DELETE CASCADE,
            FOREIGN KEY (step_id) REFERENCES workflow_steps(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_workflow_tasks_step ON workflow_tasks(step_id, status);
        CREATE INDEX IF NOT EXISTS idx_workflow_tasks_approver ON workflow_tasks(approver_id, status);
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
