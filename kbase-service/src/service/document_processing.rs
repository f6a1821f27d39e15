//! Document lifecycle: upload, the processing pipeline and its workers.
//!
//! This module coordinates document lifecycle operations:
//! - Upload into the blob store and hand-off to the queue
//! - Background workers draining the queue, with crash recovery at startup
//! - The pipeline itself: extraction, chunking, embedding, indexing
//! - Version-checked progress and status transitions
//! - Cancellation of in-flight runs on retry or delete
//! - CRUD, publish and retry

mod cancellation;
mod crud;
mod indexing;
mod processing;
mod progress;
mod upload;
mod workers;

pub use upload::NewDocument;
pub use workers::ProcessingQueue;

#[cfg(test)]
mod tests;
