//! Chunking, embedding and the chunk/vector swap.

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::progress::PipelineRun;
use crate::clients::{VectorPoint, with_timeout};
use crate::db::{Chunk, Document};
use crate::error::{IndexingError, ServiceResult};
use crate::ingestion::{ChunkingEngine, TextChunk};
use crate::service::KnowledgeBaseService;

impl KnowledgeBaseService {
    /// Replace the document's chunks and vector points with ones built from `text`.
    ///
    /// The new points carry fresh ids, so they are upserted first while
    /// nothing references them. The chunk rows and document metadata are
    /// then swapped in one short transaction; if that fails the new points
    /// are removed again and the previous chunk set stays. Points of the
    /// replaced chunks are deleted last. Returns the chunk count.
    pub(super) async fn index_document(
        &self,
        run: &mut PipelineRun,
        document: &Document,
        text: &str,
    ) -> ServiceResult<usize> {
        let (pipeline, timeouts) = {
            let config = self.runtime_config.dynamic();
            (config.pipeline.clone(), config.timeouts.clone())
        };

        let pieces = ChunkingEngine::new(pipeline.chunk_size, pipeline.chunk_overlap).split(text);
        if pieces.is_empty() {
            return Err(IndexingError::NoValidChunks.into());
        }
        debug!(doc_id = %document.id, chunks = pieces.len(), "Text chunked");

        let embedding_timeout = timeouts.embedding();
        let requests: Vec<(usize, String)> = pieces
            .iter()
            .map(|piece| (piece.index, piece.content.clone()))
            .collect();
        let vectors: Vec<Vec<f32>> = stream::iter(requests)
            .map(|(chunk_index, content)| {
                let embeddings = self.embeddings.clone();
                async move {
                    with_timeout("embedding", embedding_timeout, embeddings.embed(&content))
                        .await
                        .map_err(|source| IndexingError::Embedding {
                            chunk_index,
                            source,
                        })
                }
            })
            .buffered(pipeline.embedding_concurrency.max(1))
            .try_collect()
            .await?;

        let now = Utc::now();
        let mut chunks = Vec::with_capacity(pieces.len());
        let mut points = Vec::with_capacity(pieces.len());
        for (piece, vector) in pieces.into_iter().zip(vectors) {
            let chunk = Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: document.id.clone(),
                chunk_index: piece.index,
                content: piece.content.clone(),
                vector_id: uuid::Uuid::new_v4().to_string(),
                token_count: piece.token_count,
                created_at: now,
            };
            points.push(VectorPoint {
                id: chunk.vector_id.clone(),
                vector,
                payload: point_payload(document, &chunk, &piece),
            });
            chunks.push(chunk);
        }
        let new_ids: Vec<String> = points.iter().map(|p| p.id.clone()).collect();

        if let Err(e) = with_timeout(
            "vector upsert",
            timeouts.vector_index(),
            self.vector_index.upsert(points),
        )
        .await
        {
            self.discard_points(&document.id, &new_ids).await;
            return Err(IndexingError::Upsert(e).into());
        }

        let replaced = match self
            .db
            .replace_document_chunks(&document.id, run.version, &chunks)
        {
            Ok(replaced) => replaced,
            Err(e) => {
                self.discard_points(&document.id, &new_ids).await;
                return Err(e);
            }
        };
        run.version = replaced.version;

        let stale = &replaced.previous_vector_ids;
        if !stale.is_empty()
            && let Err(e) = with_timeout(
                "vector delete",
                timeouts.vector_index(),
                self.vector_index.delete(stale),
            )
            .await
        {
            // Orphaned points no longer match a chunk row and are skipped by search
            metrics::counter!("kbase_stale_points_orphaned_total").increment(stale.len() as u64);
            warn!(
                doc_id = %document.id,
                points = stale.len(),
                error = %e,
                "Failed to remove vector points of replaced chunks"
            );
        }

        metrics::counter!("kbase_chunks_indexed_total").increment(chunks.len() as u64);
        info!(
            doc_id = %document.id,
            chunks = chunks.len(),
            replaced = stale.len(),
            "Document indexed"
        );

        Ok(chunks.len())
    }

    /// Best-effort removal of points written by a run whose chunk rows were
    /// never stored
    async fn discard_points(&self, document_id: &str, ids: &[String]) {
        let limit = self.runtime_config.dynamic().timeouts.vector_index();
        if let Err(e) = with_timeout("vector delete", limit, self.vector_index.delete(ids)).await {
            warn!(
                doc_id = %document_id,
                points = ids.len(),
                error = %e,
                "Failed to remove vector points of an aborted indexing run"
            );
        }
    }
}

fn point_payload(document: &Document, chunk: &Chunk, piece: &TextChunk) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("document_id".into(), document.id.clone().into());
    payload.insert("chunk_id".into(), chunk.id.clone().into());
    payload.insert("chunk_index".into(), piece.index.into());
    payload.insert("space_id".into(), document.space_id.clone().into());
    if let Some(sub_space_id) = &document.sub_space_id {
        payload.insert("sub_space_id".into(), sub_space_id.clone().into());
    }
    if let Some(class_id) = &document.class_id {
        payload.insert("class_id".into(), class_id.clone().into());
    }
    payload.insert("title".into(), document.title.clone().into());
    payload.insert("file_name".into(), document.file_name.clone().into());
    payload.insert("content".into(), piece.content.clone().into());
    payload
}
