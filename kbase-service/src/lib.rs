//! Knowledge-base document service.
//!
//! Uploaded documents are stored as blobs and run through a background
//! pipeline: text extraction (plain text, HTML or OCR), fixed-window
//! chunking, embedding and indexing into a vector store. Documents that need
//! sign-off are gated by a multi-step approval workflow before they can be
//! published and show up in search and question answering.

pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod service;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use config::RuntimeConfig;
pub use db::{Database, Document, DocumentStatus};
pub use error::{ServiceError, ServiceResult};
pub use service::{Answer, Collaborators, KnowledgeBaseService, NewDocument, SearchHit};
pub use workflow::{TaskDecision, WorkflowEngine};
