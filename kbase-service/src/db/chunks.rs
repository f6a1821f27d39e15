//! Chunk storage.

use chrono::Utc;
use rusqlite::{Connection, params};

use super::Database;
use super::documents::versioned_outcome;
use super::models::Chunk;
use crate::error::{DatabaseError, ServiceResult};

/// Result of swapping a document's chunk set
#[derive(Debug)]
pub struct ChunkReplacement {
    /// Document version after the metadata update
    pub version: i64,
    /// Vector ids of the chunk rows that were removed
    pub previous_vector_ids: Vec<String>,
}

impl Database {
    /// Get all chunks for a document, in split order
    pub fn get_document_chunks(&self, document_id: &str) -> ServiceResult<Vec<Chunk>> {
        let conn = self.conn.lock().unwrap();
        query_chunks(&conn, document_id)
    }

    /// Vector ids of a document's current chunks
    pub fn get_chunk_vector_ids(&self, document_id: &str) -> ServiceResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        query_vector_ids(&conn, document_id)
    }

    /// Replace every chunk row of a document and record the indexing result
    /// (vector count, processed time, cleared error) in one transaction.
    ///
    /// The metadata update is version-guarded; when it loses, nothing is
    /// written and the previous chunk set stays.
    pub fn replace_document_chunks(
        &self,
        document_id: &str,
        expected_version: i64,
        chunks: &[Chunk],
    ) -> ServiceResult<ChunkReplacement> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let now = Utc::now().to_rfc3339();

        let rows = tx
            .execute(
                "UPDATE documents SET vector_count = ?1, processed_at = ?2, parse_error = NULL, \
                 version = version + 1, updated_at = ?2 \
                 WHERE id = ?3 AND version = ?4 AND deleted_at IS NULL",
                params![chunks.len() as i64, now, document_id, expected_version],
            )
            .map_err(DatabaseError::Query)?;
        let version = versioned_outcome(&tx, document_id, expected_version, rows)?;

        let previous_vector_ids = query_vector_ids(&tx, document_id)?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(DatabaseError::Query)?;

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO chunks (id, document_id, chunk_index, content, vector_id, token_count, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                )
                .map_err(DatabaseError::Query)?;

            for chunk in chunks {
                stmt.execute(params![
                    chunk.id,
                    chunk.document_id,
                    chunk.chunk_index as i64,
                    chunk.content,
                    chunk.vector_id,
                    chunk.token_count as i64,
                    chunk.created_at.to_rfc3339(),
                ])
                .map_err(DatabaseError::Query)?;
            }
        }

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(ChunkReplacement {
            version,
            previous_vector_ids,
        })
    }
}

fn query_chunks(conn: &Connection, document_id: &str) -> ServiceResult<Vec<Chunk>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT id, document_id, chunk_index, content, vector_id, token_count, created_at
            FROM chunks
            WHERE document_id = ?1
            ORDER BY chunk_index
            "#,
        )
        .map_err(DatabaseError::Query)?;

    let chunks = stmt
        .query_map(params![document_id], Chunk::from_row)
        .map_err(DatabaseError::Query)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(DatabaseError::Query)?;

    Ok(chunks)
}

fn query_vector_ids(conn: &Connection, document_id: &str) -> ServiceResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT vector_id FROM chunks WHERE document_id = ?1 ORDER BY chunk_index")
        .map_err(DatabaseError::Query)?;

    let ids = stmt
        .query_map(params![document_id], |row| row.get(0))
        .map_err(DatabaseError::Query)?
        .collect::<Result<Vec<String>, _>>()
        .map_err(DatabaseError::Query)?;

    Ok(ids)
}
