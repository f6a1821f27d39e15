//! External collaborators of the document pipeline and workflow engine.
//!
//! Each collaborator is a trait object so the service can be wired to real
//! backends (filesystem blobs, Ollama/OpenAI embeddings and chat, Qdrant,
//! PaddleOCR) or to the in-process implementations used for local runs and tests.

pub mod blob;
pub mod chat;
pub mod embeddings;
pub mod membership;
pub mod ocr;
pub mod vector_index;

pub use blob::{BlobStore, FsBlobStore};
pub use chat::{ChatMessage, ChatModel, OllamaChat, OpenAiChat, create_chat_model};
pub use embeddings::{
    EmbeddingProvider, HashedEmbeddings, OllamaEmbeddings, OpenAiEmbeddings,
    create_embedding_provider,
};
pub use membership::{ConfigMembership, SpaceMember, SpaceMembership};
pub use ocr::{OcrProvider, PaddleOcrClient, create_ocr_provider};
pub use vector_index::{
    MemoryVectorIndex, PayloadFilter, QdrantIndex, ScoredPoint, VectorIndex, VectorPoint,
    create_vector_index,
};

use std::future::Future;
use std::time::Duration;

use reqwest::Response;

use crate::error::ClientError;

/// Bound an external call by `limit`; an elapsed timer becomes [`ClientError::Timeout`].
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout {
            operation,
            secs: limit.as_secs(),
        }),
    }
}

/// Turn a non-success HTTP response into [`ClientError::Status`]
pub(crate) async fn check_status(url: &str, response: Response) -> Result<Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        url: url.to_string(),
        status,
        message,
    })
}
