//! Semantic search over published documents.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::clients::{PayloadFilter, ScoredPoint, with_timeout};
use crate::db::DocumentStatus;
use crate::error::{IndexingError, ServiceError, ServiceResult};
use crate::service::KnowledgeBaseService;

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 20;
const SNIPPET_CHARS: usize = 200;

/// Candidates fetched per requested hit, to leave room for unpublished ones.
/// The window grows by the same factor until enough hits are found.
const OVERFETCH: usize = 4;
const MAX_CANDIDATES: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document_id: String,
    pub chunk_id: String,
    pub title: String,
    pub file_name: String,
    pub score: f32,
    pub snippet: String,
}

/// First characters of a chunk, with `...` when cut
pub fn make_snippet(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Title, file name and live point ids of a searchable document
struct SearchableDocument {
    title: String,
    file_name: String,
    vector_ids: HashSet<String>,
}

impl KnowledgeBaseService {
    /// Chunks of published documents in `space_id` most similar to `query`
    pub async fn search_knowledge(
        &self,
        query: &str,
        space_id: &str,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<SearchHit>> {
        let hits = self.search_published_chunks(query, space_id, limit).await?;
        Ok(hits.into_iter().map(|(hit, _)| hit).collect())
    }

    /// Search hits paired with the full text of their chunk
    pub(super) async fn search_published_chunks(
        &self,
        query: &str,
        space_id: &str,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<(SearchHit, String)>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Search query is empty".to_string(),
            });
        }
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let timeouts = self.runtime_config.dynamic().timeouts.clone();

        let vector = with_timeout("query embedding", timeouts.embedding(), self.embeddings.embed(query))
            .await
            .map_err(IndexingError::QueryEmbedding)?;

        let filter = PayloadFilter::default().field("space_id", space_id);
        let mut documents = HashMap::new();
        let mut window = limit * OVERFETCH;
        let hits = loop {
            let candidates = with_timeout(
                "vector search",
                timeouts.vector_index(),
                self.vector_index.search(&vector, window, &filter),
            )
            .await
            .map_err(IndexingError::Search)?;
            let exhausted = candidates.len() < window;

            let hits = self.collect_hits(candidates, limit, &mut documents)?;
            if hits.len() == limit || exhausted || window >= MAX_CANDIDATES {
                break hits;
            }
            window = (window * OVERFETCH).min(MAX_CANDIDATES);
        };

        debug!(space_id = %space_id, limit, window, hits = hits.len(), "Knowledge search");
        Ok(hits)
    }

    /// Keep candidates that belong to a published document and still match
    /// one of its chunk rows, best first, up to `limit`.
    fn collect_hits(
        &self,
        candidates: Vec<ScoredPoint>,
        limit: usize,
        documents: &mut HashMap<String, Option<SearchableDocument>>,
    ) -> ServiceResult<Vec<(SearchHit, String)>> {
        let mut hits = Vec::with_capacity(limit);

        for point in candidates {
            let field = |key: &str| {
                point
                    .payload
                    .get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let document_id = field("document_id");

            if !documents.contains_key(&document_id) {
                let entry = match self
                    .db
                    .get_document(&document_id)?
                    .filter(|d| d.status == DocumentStatus::Published)
                {
                    Some(d) => Some(SearchableDocument {
                        vector_ids: self
                            .db
                            .get_chunk_vector_ids(&d.id)?
                            .into_iter()
                            .collect(),
                        title: d.title,
                        file_name: d.file_name,
                    }),
                    None => None,
                };
                documents.insert(document_id.clone(), entry);
            }
            let Some(Some(document)) = documents.get(&document_id) else {
                continue;
            };
            if !document.vector_ids.contains(&point.id) {
                continue;
            }

            let content = field("content");
            let hit = SearchHit {
                chunk_id: field("chunk_id"),
                title: document.title.clone(),
                file_name: document.file_name.clone(),
                score: point.score,
                snippet: make_snippet(&content),
                document_id,
            };
            hits.push((hit, content));
            if hits.len() == limit {
                break;
            }
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHarness;

    #[test]
    fn test_make_snippet_truncates_on_char_boundary() {
        assert_eq!(make_snippet("short"), "short");

        let exact = "é".repeat(SNIPPET_CHARS);
        assert_eq!(make_snippet(&exact), exact);

        let long = "é".repeat(SNIPPET_CHARS + 1);
        let snippet = make_snippet(&long);
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), SNIPPET_CHARS + 3);
    }

    #[tokio::test]
    async fn test_search_returns_only_published_documents() {
        let harness = TestHarness::new();
        let text = "Rust ownership and borrowing rules. ".repeat(10);

        let draft = harness
            .ingest(harness.new_document("draft.txt"), text.as_bytes())
            .await;
        let public = harness
            .ingest(harness.new_document("public.txt"), text.as_bytes())
            .await;
        assert_eq!(draft.status, DocumentStatus::PendingPublish);
        harness.service.publish_document(&public.id).unwrap();

        let hits = harness
            .service
            .search_knowledge("ownership and borrowing", "space-1", None)
            .await
            .unwrap();

        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.document_id == public.id));
        assert_eq!(hits[0].file_name, "public.txt");
    }

    #[tokio::test]
    async fn test_search_is_scoped_to_space() {
        let harness = TestHarness::new();
        let doc = harness
            .ingest(harness.new_document("notes.txt"), b"quarterly planning notes")
            .await;
        harness.service.publish_document(&doc.id).unwrap();

        let hits = harness
            .service
            .search_knowledge("planning", "space-2", Some(3))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let harness = TestHarness::new();
        let err = harness
            .service
            .search_knowledge("   ", "space-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_search_looks_past_unpublished_matches() {
        let harness = TestHarness::new();
        let query = "release checklist for the storage engine";

        for i in 0..6 {
            harness
                .ingest(harness.new_document(&format!("draft-{}.txt", i)), query.as_bytes())
                .await;
        }
        let public = harness
            .ingest(
                harness.new_document("public.txt"),
                b"release checklist for the storage engine, second revision",
            )
            .await;
        harness.service.publish_document(&public.id).unwrap();

        let hits = harness
            .service
            .search_knowledge(query, "space-1", Some(1))
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, public.id);
    }
}
