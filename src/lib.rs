//! Forum Rank - vote and ranking engine for forum posts
//!
//! Votes land in an in-memory store that keeps each post's score, creation
//! time and community membership in sorted indexes. Feeds page over those
//! indexes. A scheduled reconciliation pass copies scores and votes into
//! SQLite.
//!
//! ## Layout
//!
//! ```text
//! VoteEngine ──► VoteStore ──► ephemeral::SortedSet (time, score)
//!     │              ▲
//!     └──► RankingIndex (community cache, 60s TTL)
//!                    │
//! Scheduler ──► ReconciliationPipeline ──► DurableStore (SQLite)
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod ephemeral;
pub mod error;
pub mod logging;
pub mod ranking;
pub mod reconcile;
pub mod scheduler;
pub mod types;
pub mod votes;

// Re-exports
pub use config::Config;
pub use db::{DurableStore, PersistBatch, PersistDb, PersistOutcome, SqliteStore};
pub use engine::VoteEngine;
pub use error::{EngineError, Result};
pub use ranking::{RankedPost, RankingIndex};
pub use reconcile::{PassReport, PipelineSettings, ReconciliationPipeline, RetryPolicy};
pub use scheduler::Scheduler;
pub use types::{
    Clock, CommunityId, Direction, ManualClock, PostId, PostListQuery, RankOrder, SystemClock, UserId,
};
pub use votes::{VoteRules, VoteStore};
