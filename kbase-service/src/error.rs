use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    #[error("Workflow step not found: {step_id}")]
    StepNotFound { step_id: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Document {document_id} was modified concurrently")]
    VersionConflict { document_id: String },

    #[error("Processing of document {document_id} was cancelled")]
    Cancelled { document_id: String },

    #[error("Text extraction failed")]
    Extraction(#[from] ExtractionError),

    #[error("Vector indexing failed")]
    Indexing(#[from] IndexingError),

    #[error("Blob storage error")]
    Storage(#[source] ClientError),

    #[error("Space membership lookup failed")]
    Membership(#[source] ClientError),

    #[error("Answer generation failed")]
    Answer(#[source] ClientError),

    #[error("No indexed content to answer from: {message}")]
    NoContext { message: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised by external collaborators (blob store, embedding provider,
/// vector index, OCR service, chat model)
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection failed to {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} failed (status {status}): {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("IO error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{client} is not configured")]
    NotConfigured { client: &'static str },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// Text extraction errors
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to download document content")]
    Download(#[source] ClientError),

    #[error("HTML document contains no text after tag removal")]
    EmptyHtml,

    #[error("OCR failed for {file_name}")]
    Ocr {
        file_name: String,
        #[source]
        source: ClientError,
    },

    #[error("Empty text extracted")]
    EmptyText,
}

/// Vector indexing errors
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("No valid chunks to store")]
    NoValidChunks,

    #[error("Embedding generation failed for chunk {chunk_index}")]
    Embedding {
        chunk_index: usize,
        #[source]
        source: ClientError,
    },

    #[error("Vector index upsert failed")]
    Upsert(#[source] ClientError),

    #[error("Query embedding failed")]
    QueryEmbedding(#[source] ClientError),

    #[error("Vector search failed")]
    Search(#[source] ClientError),
}

impl ServiceError {
    /// Stable machine-readable code for the transport layer
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::WorkflowNotFound { .. } => "workflow_not_found",
            ServiceError::StepNotFound { .. } => "step_not_found",
            ServiceError::TaskNotFound { .. } => "task_not_found",
            ServiceError::Forbidden { .. } => "forbidden",
            ServiceError::InvalidState { .. } => "invalid_state",
            ServiceError::VersionConflict { .. } => "version_conflict",
            ServiceError::Cancelled { .. } => "cancelled",
            ServiceError::Extraction(_) => "extraction_failure",
            ServiceError::Indexing(_) => "indexing_failure",
            ServiceError::Storage(_) => "storage_error",
            ServiceError::Membership(_) => "membership_error",
            ServiceError::Answer(_) => "answer_failure",
            ServiceError::NoContext { .. } => "no_context",
            ServiceError::Database(_) => "database_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::DocumentNotFound { .. }
                | ServiceError::WorkflowNotFound { .. }
                | ServiceError::StepNotFound { .. }
                | ServiceError::TaskNotFound { .. }
        )
    }

    /// True when an external call ran past its deadline somewhere in the chain
    pub fn is_timeout(&self) -> bool {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(ClientError::Timeout { .. }) = err.downcast_ref::<ClientError>() {
                return true;
            }
            current = err.source();
        }
        false
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Flatten an error and its sources into a single line, outermost first.
pub fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        let text = source.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        current = source.source();
    }
    message
}
