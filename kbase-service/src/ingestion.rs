//! Document ingestion: turning uploaded bytes into text and text into chunks.
//!
//! Neither stage touches the database or the vector index; the pipeline in
//! `service::document_processing` drives them and persists the results.

pub mod chunking;
pub mod extraction;

pub use chunking::{ChunkingEngine, TextChunk, estimate_tokens};
pub use extraction::{SourceFormat, TextExtractor, strip_html_tags};
