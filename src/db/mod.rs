//! SQLite storage for reconciled vote state
//!
//! The durable side of the engine. Scores and votes live in the ephemeral
//! store while posts are active; the reconciliation pass copies them here.
//!
//! ## Tables
//!
//! - `post_scores` - last reconciled score per post
//! - `post_votes` - last reconciled direction per (post, user)

pub mod persist;
pub mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::reconcile::Attempt;
use crate::types::{PersistedScore, PersistedVote};

/// Database file name inside the data directory
pub const DB_FILE_NAME: &str = "forum_rank.db";

/// Rows produced by one reconciliation pass
#[derive(Debug, Clone)]
pub struct PersistBatch {
    pub scores: Arc<[PersistedScore]>,
    pub votes: Arc<[PersistedVote]>,
}

impl PersistBatch {
    pub fn new(scores: Vec<PersistedScore>, votes: Vec<PersistedVote>) -> Self {
        Self {
            scores: scores.into(),
            votes: votes.into(),
        }
    }
}

/// Rows actually inserted or changed by a persist call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub scores_written: usize,
    pub votes_written: usize,
}

/// Durable destination of a reconciliation pass.
///
/// Implementations must apply a batch atomically: both halves or nothing.
/// Work that can outlive the returned future must claim `attempt` before
/// committing and roll back if the claim fails.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn persist(&self, batch: PersistBatch, attempt: Attempt) -> Result<PersistOutcome, EngineError>;
}

/// SQLite database for reconciled scores and votes
pub struct PersistDb {
    conn: Mutex<Connection>,
}

impl PersistDb {
    /// Open or create the database in `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self, EngineError> {
        let db_path = data_dir.join(DB_FILE_NAME);
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| EngineError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| EngineError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, EngineError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), EngineError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, EngineError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Connection) -> Result<T, EngineError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Upsert a batch in one transaction, committed only if `attempt` is still live
    pub fn persist(
        &self,
        batch: &PersistBatch,
        batch_size: usize,
        attempt: &Attempt,
    ) -> Result<PersistOutcome, EngineError> {
        self.with_conn_mut(|conn| {
            persist::upsert_all(conn, &batch.scores, &batch.votes, batch_size, attempt)
        })
    }

    pub fn load_scores(&self) -> Result<Vec<PersistedScore>, EngineError> {
        self.with_conn(persist::load_scores)
    }

    pub fn load_votes(&self) -> Result<Vec<PersistedVote>, EngineError> {
        self.with_conn(persist::load_votes)
    }

    pub fn stats(&self) -> Result<DbStats, EngineError> {
        self.with_conn(|conn| {
            let score_rows: i64 =
                conn.query_row("SELECT COUNT(*) FROM post_scores", [], |row| row.get(0))?;
            let vote_rows: i64 =
                conn.query_row("SELECT COUNT(*) FROM post_votes", [], |row| row.get(0))?;
            Ok(DbStats {
                score_rows: score_rows as u64,
                vote_rows: vote_rows as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DbStats {
    pub score_rows: u64,
    pub vote_rows: u64,
}

/// [`DurableStore`] backed by [`PersistDb`], run on the blocking pool
pub struct SqliteStore {
    db: Arc<PersistDb>,
    batch_size: usize,
}

impl SqliteStore {
    pub fn new(db: Arc<PersistDb>, batch_size: usize) -> Self {
        Self { db, batch_size }
    }

    pub fn db(&self) -> &Arc<PersistDb> {
        &self.db
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn persist(&self, batch: PersistBatch, attempt: Attempt) -> Result<PersistOutcome, EngineError> {
        let db = Arc::clone(&self.db);
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || db.persist(&batch, batch_size, &attempt))
            .await
            .map_err(|e| EngineError::Internal(format!("Persist task failed: {}", e)))?
    }
}
