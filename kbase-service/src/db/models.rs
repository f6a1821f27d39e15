//! Database model types.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Document lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Row created, blob write in flight
    Uploading,
    /// Download and text extraction
    Processing,
    /// Chunking, embedding and indexing
    Vectorizing,
    /// Indexed, waiting on an approval workflow
    PendingApproval,
    /// Indexed and approved (or approval not required)
    PendingPublish,
    Published,
    /// Rejected by an approver
    Failed,
    /// A pipeline stage failed
    ProcessFailed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Vectorizing => "vectorizing",
            DocumentStatus::PendingApproval => "pending_approval",
            DocumentStatus::PendingPublish => "pending_publish",
            DocumentStatus::Published => "published",
            DocumentStatus::Failed => "failed",
            DocumentStatus::ProcessFailed => "process_failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "uploading" => DocumentStatus::Uploading,
            "processing" => DocumentStatus::Processing,
            "vectorizing" => DocumentStatus::Vectorizing,
            "pending_approval" => DocumentStatus::PendingApproval,
            "pending_publish" => DocumentStatus::PendingPublish,
            "published" => DocumentStatus::Published,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::ProcessFailed,
        }
    }

    /// Statuses a pipeline run passes through before reaching a terminal state
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Uploading | DocumentStatus::Processing | DocumentStatus::Vectorizing
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DocumentStatus::ProcessFailed | DocumentStatus::Failed)
    }
}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub file_name: String,
    /// Object key in the blob store
    pub storage_path: String,
    pub file_size: u64,
    /// Declared MIME type from the uploader
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Extracted plain text, set once extraction succeeds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub status: DocumentStatus,
    pub process_progress: u8,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub vector_count: u32,
    pub need_approval: bool,
    pub space_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_space_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub uploaded_by: String,
    /// Bumped by every write; status transitions are conditional on it
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

pub(crate) const DOCUMENT_COLUMNS: &str = "id, title, file_name, storage_path, file_size, content_type, content, status, \
     process_progress, retry_count, last_retry_at, parse_error, vector_count, need_approval, \
     space_id, sub_space_id, class_id, workflow_id, uploaded_by, version, created_at, updated_at, \
     processed_at, published_at";

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let file_size: i64 = row.get(4)?;
        let status_str: String = row.get(7)?;
        let progress: i64 = row.get(8)?;
        let retry_count: i64 = row.get(9)?;
        let last_retry_at: Option<String> = row.get(10)?;
        let vector_count: i64 = row.get(12)?;
        let created_at: String = row.get(20)?;
        let updated_at: String = row.get(21)?;
        let processed_at: Option<String> = row.get(22)?;
        let published_at: Option<String> = row.get(23)?;

        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            file_name: row.get(2)?,
            storage_path: row.get(3)?,
            file_size: file_size as u64,
            content_type: row.get(5)?,
            content: row.get(6)?,
            status: DocumentStatus::from_str(&status_str),
            process_progress: progress.clamp(0, 100) as u8,
            retry_count: retry_count as u32,
            last_retry_at: last_retry_at.as_deref().map(parse_timestamp),
            parse_error: row.get(11)?,
            vector_count: vector_count as u32,
            need_approval: row.get(13)?,
            space_id: row.get(14)?,
            sub_space_id: row.get(15)?,
            class_id: row.get(16)?,
            workflow_id: row.get(17)?,
            uploaded_by: row.get(18)?,
            version: row.get(19)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
            processed_at: processed_at.as_deref().map(parse_timestamp),
            published_at: published_at.as_deref().map(parse_timestamp),
        })
    }

    /// File extension of the original file name, lower-cased, without the dot
    pub fn extension(&self) -> String {
        file_extension(&self.file_name)
    }
}

pub(crate) fn file_extension(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Chunk record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Position in the original split; gaps mark dropped blank windows
    pub chunk_index: usize,
    pub content: String,
    /// Point id in the vector index
    pub vector_id: String,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let chunk_index: i64 = row.get(2)?;
        let token_count: i64 = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            chunk_index: chunk_index as usize,
            content: row.get(3)?,
            vector_id: row.get(4)?,
            token_count: token_count as usize,
            created_at: parse_timestamp(&created_at),
        })
    }
}

/// Workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Processing,
    Completed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Processing => "processing",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => WorkflowStatus::Completed,
            "cancelled" => WorkflowStatus::Cancelled,
            _ => WorkflowStatus::Processing,
        }
    }
}

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Processing,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Processing => "processing",
            StepStatus::Approved => "approved",
            StepStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "approved" => StepStatus::Approved,
            "rejected" => StepStatus::Rejected,
            _ => StepStatus::Processing,
        }
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Approved,
    ApprovedByOthers,
    Rejected,
    RejectedByOthers,
    /// Closed because its workflow was cancelled before anyone decided
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Approved => "approved",
            TaskStatus::ApprovedByOthers => "approved_by_others",
            TaskStatus::Rejected => "rejected",
            TaskStatus::RejectedByOthers => "rejected_by_others",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "approved" => TaskStatus::Approved,
            "approved_by_others" => TaskStatus::ApprovedByOthers,
            "rejected" => TaskStatus::Rejected,
            "rejected_by_others" => TaskStatus::RejectedByOthers,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Processing,
        }
    }
}

/// Workflow record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub space_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get(4)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;

        Ok(Self {
            id: row.get(0)?,
            space_id: row.get(1)?,
            resource_type: row.get(2)?,
            resource_id: row.get(3)?,
            status: WorkflowStatus::from_str(&status),
            current_step_id: row.get(5)?,
            created_by: row.get(6)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

/// Workflow step record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub workflow_id: String,
    pub name: String,
    pub step_order: u32,
    pub approver_role: String,
    pub required: bool,
    /// Advisory only, not enforced
    pub timeout_hours: u32,
    pub status: StepStatus,
    pub created_at: DateTime<Utc>,
}

impl WorkflowStep {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let step_order: i64 = row.get(3)?;
        let timeout_hours: i64 = row.get(6)?;
        let status: String = row.get(7)?;
        let created_at: String = row.get(8)?;

        Ok(Self {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            name: row.get(2)?,
            step_order: step_order as u32,
            approver_role: row.get(4)?,
            required: row.get(5)?,
            timeout_hours: timeout_hours as u32,
            status: StepStatus::from_str(&status),
            created_at: parse_timestamp(&created_at),
        })
    }
}

/// Approval task record, one per approver per step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: String,
    pub workflow_id: String,
    pub step_id: String,
    pub approver_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTask {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get(4)?;
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;

        Ok(Self {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            step_id: row.get(2)?,
            approver_id: row.get(3)?,
            status: TaskStatus::from_str(&status),
            comment: row.get(5)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
