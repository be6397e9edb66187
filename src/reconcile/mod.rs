//! Reconciliation pass - copies ephemeral vote state into durable storage
//!
//! A pass has three steps, each run through [`with_retry`]:
//!
//! 1. fetch scores of posts still inside the retention horizon
//! 2. fetch every vote of every registered post (no retention bound)
//! 3. persist both batches in one durable transaction
//!
//! Posts past the retention horizon keep their last persisted score. Votes
//! are copied whatever the post's age. A pass that exhausts its retries is
//! abandoned as a whole; nothing is carried over to the next one.

pub mod retry;

pub use retry::{with_retry, Attempt, Backoff, RetryPolicy};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::db::{DurableStore, PersistBatch, PersistOutcome};
use crate::error::{EngineError, Result};
use crate::types::{PersistedScore, PersistedVote};
use crate::votes::VoteStore;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Tunables of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Days after creation during which a post's score is still copied
    pub retention_days: u32,
    /// Posts read from the ephemeral store per batched lookup
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retention_days: 7,
            batch_size: 500,
            retry: RetryPolicy::new(3, Duration::from_secs(10), Backoff::Linear(Duration::from_secs(1))),
        }
    }
}

/// Summary of a completed pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// Score rows fetched
    pub scores: usize,
    /// Vote rows fetched
    pub votes: usize,
    /// Rows the durable store actually changed
    pub written: PersistOutcome,
    pub duration: Duration,
}

pub struct ReconciliationPipeline {
    store: Arc<VoteStore>,
    sink: Arc<dyn DurableStore>,
    settings: PipelineSettings,
}

impl ReconciliationPipeline {
    pub fn new(store: Arc<VoteStore>, sink: Arc<dyn DurableStore>, settings: PipelineSettings) -> Self {
        Self { store, sink, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one full pass
    pub async fn run(&self) -> Result<PassReport> {
        let started = Instant::now();
        let policy = self.settings.retry;

        let scores = with_retry(&policy, "fetch_scores", |_| self.fetch_scores()).await?;
        if scores.is_empty() {
            if self.store.post_count() > 0 {
                warn!(
                    retention_days = self.settings.retention_days,
                    "No post scores inside the retention horizon"
                );
            } else {
                debug!("No posts registered yet");
            }
        }

        let votes = with_retry(&policy, "fetch_votes", |_| self.fetch_votes()).await?;

        let batch = PersistBatch::new(scores, votes);
        let written = with_retry(&policy, "persist", |attempt| {
            self.sink.persist(batch.clone(), attempt)
        })
        .await?;

        let report = PassReport {
            scores: batch.scores.len(),
            votes: batch.votes.len(),
            written,
            duration: started.elapsed(),
        };

        info!(
            scores = report.scores,
            votes = report.votes,
            scores_written = written.scores_written,
            votes_written = written.votes_written,
            duration_ms = report.duration.as_millis() as u64,
            "Reconciliation pass complete"
        );

        Ok(report)
    }

    async fn fetch_scores(&self) -> Result<Vec<PersistedScore>> {
        let store = Arc::clone(&self.store);
        let retention_days = self.settings.retention_days;
        let batch_size = self.settings.batch_size;
        tokio::task::spawn_blocking(move || collect_scores(&store, retention_days, batch_size))
            .await
            .map_err(|e| EngineError::Internal(format!("Score fetch task failed: {}", e)))
    }

    async fn fetch_votes(&self) -> Result<Vec<PersistedVote>> {
        let store = Arc::clone(&self.store);
        let batch_size = self.settings.batch_size;
        tokio::task::spawn_blocking(move || collect_votes(&store, batch_size))
            .await
            .map_err(|e| EngineError::Internal(format!("Vote fetch task failed: {}", e)))
    }
}

/// Scores of posts created within the last `retention_days`, oldest first
pub fn collect_scores(store: &VoteStore, retention_days: u32, batch_size: usize) -> Vec<PersistedScore> {
    let threshold = store
        .now()
        .saturating_sub(i64::from(retention_days).saturating_mul(SECS_PER_DAY));
    let post_ids = store.posts_created_since(threshold);

    let mut scores = Vec::with_capacity(post_ids.len());
    for chunk in post_ids.chunks(batch_size.max(1)) {
        let found = store.scores_for(chunk);
        scores.extend(
            chunk
                .iter()
                .zip(found)
                .filter_map(|(&post_id, score)| score.map(|score| PersistedScore { post_id, score })),
        );
    }

    debug!(posts = post_ids.len(), scores = scores.len(), "Fetched post scores");
    scores
}

/// Every active vote on every registered post
pub fn collect_votes(store: &VoteStore, batch_size: usize) -> Vec<PersistedVote> {
    let post_ids = store.all_posts();

    let mut votes = Vec::new();
    for chunk in post_ids.chunks(batch_size.max(1)) {
        for post in store.votes_for(chunk) {
            votes.extend(post.votes.into_iter().map(|(user_id, direction)| PersistedVote {
                post_id: post.post_id,
                user_id,
                direction,
            }));
        }
    }

    debug!(posts = post_ids.len(), votes = votes.len(), "Fetched post votes");
    votes
}
