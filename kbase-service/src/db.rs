//! Database module for SQLite operations.
//!
//! This module provides the `Database` struct and all database operations
//! organized into submodules by domain.

mod chunks;
mod documents;
mod migrations;
pub mod models;
mod workflows;

pub use chunks::ChunkReplacement;
pub use models::{
    Chunk, Document, DocumentStatus, StepStatus, TaskStatus, Workflow, WorkflowStatus,
    WorkflowStep, WorkflowTask,
};
pub use workflows::TaskDecisionPlan;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// How long a writer waits for SQLite's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> ServiceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ServiceError::Config {
                message: format!("Cannot create database directory {}: {}", parent.display(), e),
            })?;
        }

        let conn = open_connection(path)?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn open_connection(path: &Path) -> ServiceResult<Connection> {
    let conn = Connection::open(path).map_err(DatabaseError::Connection)?;

    // Enable WAL mode for better concurrency
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(DatabaseError::Query)?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(DatabaseError::Connection)?;

    Ok(conn)
}
