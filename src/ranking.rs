//! Ranking index - paginated feeds over the time and score indexes
//!
//! Global feeds page directly over the vote store's sorted sets. Community
//! feeds page over a materialised intersection of the community's members
//! with the chosen index; that intersection is cached per
//! (community, order) for a short TTL and recomputed once it expires.
//!
//! Pages are 1-based: page `p` of size `n` covers ranks
//! `[(p - 1) * n, p * n)`. Ties rank by post id ascending.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::ephemeral::SortedSet;
use crate::types::{CommunityId, PostId, PostListQuery, RankOrder};
use crate::votes::VoteStore;

/// Default lifetime of a cached community ranking
pub const COMMUNITY_CACHE_TTL: Duration = Duration::from_secs(60);

/// A materialised community ranking
struct CachedRanking {
    post_ids: Arc<Vec<PostId>>,
    expires_at: Instant,
}

impl CachedRanking {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Community cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// One row of a rendered post list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedPost {
    pub post_id: PostId,
    pub score: i64,
    pub up_votes: i64,
}

pub struct RankingIndex {
    store: Arc<VoteStore>,
    ttl: Duration,
    community_cache: DashMap<(CommunityId, RankOrder), CachedRanking>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RankingIndex {
    pub fn new(store: Arc<VoteStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            community_cache: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(store: Arc<VoteStore>) -> Self {
        Self::new(store, COMMUNITY_CACHE_TTL)
    }

    /// Post ids from a global index, highest rank first.
    ///
    /// Pages past the end return an empty list.
    pub fn list_post_ids(&self, order: RankOrder, page: u64, size: u64) -> Vec<PostId> {
        match page_bounds(page, size) {
            Some((start, stop)) => self.index(order).rev_range(start, stop),
            None => Vec::new(),
        }
    }

    /// Post ids from one community, highest rank first.
    ///
    /// Unknown or empty communities return an empty list.
    pub fn list_community_post_ids(
        &self,
        community_id: CommunityId,
        order: RankOrder,
        page: u64,
        size: u64,
    ) -> Vec<PostId> {
        let Some((start, stop)) = page_bounds(page, size) else {
            return Vec::new();
        };
        let ranked = self.community_ranking(community_id, order);
        ranked
            .iter()
            .skip(start)
            .take(stop - start + 1)
            .copied()
            .collect()
    }

    /// Up-vote count per post, in request order
    pub fn get_vote_counts(&self, post_ids: &[PostId]) -> Vec<i64> {
        self.store.up_vote_counts(post_ids)
    }

    /// Resolve a list request into ranked rows with score and up votes
    pub fn list(&self, query: &PostListQuery) -> Vec<RankedPost> {
        let ids = match query.community {
            Some(community_id) => {
                self.list_community_post_ids(community_id, query.order, query.page, query.size)
            }
            None => self.list_post_ids(query.order, query.page, query.size),
        };
        let scores = self.store.scores_for(&ids);
        let up_votes = self.store.up_vote_counts(&ids);

        ids.into_iter()
            .zip(scores)
            .zip(up_votes)
            .map(|((post_id, score), up_votes)| RankedPost {
                post_id,
                score: score.unwrap_or(0),
                up_votes,
            })
            .collect()
    }

    fn index(&self, order: RankOrder) -> &SortedSet<PostId> {
        match order {
            RankOrder::Time => self.store.time_index(),
            RankOrder::Score => self.store.score_index(),
        }
    }

    fn community_ranking(&self, community_id: CommunityId, order: RankOrder) -> Arc<Vec<PostId>> {
        let key = (community_id, order);
        if let Some(entry) = self.community_cache.get(&key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(&entry.post_ids);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let members = self.store.community_members(community_id);
        let post_ids: Vec<PostId> = self
            .index(order)
            .intersect(members)
            .into_iter()
            .map(|(post_id, _)| post_id)
            .collect();
        let post_ids = Arc::new(post_ids);

        // An empty intersection is not kept, so new members show up on the next read.
        if post_ids.is_empty() {
            self.community_cache.remove(&key);
        } else {
            self.community_cache.insert(
                key,
                CachedRanking {
                    post_ids: Arc::clone(&post_ids),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
        debug!(%community_id, %order, posts = post_ids.len(), "Community ranking computed");
        post_ids
    }

    /// Drop expired community rankings, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.community_cache.len();
        self.community_cache.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.community_cache.len())
    }

    pub fn cache_stats(&self) -> RankingCacheStats {
        RankingCacheStats {
            entries: self.community_cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Inclusive rank bounds for a 1-based page; `None` when nothing can match
fn page_bounds(page: u64, size: u64) -> Option<(usize, usize)> {
    if size == 0 {
        return None;
    }
    let page = page.max(1);
    let start = (page - 1).checked_mul(size)?;
    let stop = start.checked_add(size - 1)?;
    Some((usize::try_from(start).ok()?, usize::try_from(stop).unwrap_or(usize::MAX)))
}

/// Spawn a background task that periodically drops expired community rankings
pub fn spawn_cache_cleanup_task(index: Arc<RankingIndex>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = index.purge_expired();
            let stats = index.cache_stats();
            debug!(
                removed = removed,
                entries = stats.entries,
                hits = stats.hits,
                misses = stats.misses,
                "Ranking cache cleanup completed"
            );
        }
    });

    info!(interval_secs = interval.as_secs(), "Ranking cache cleanup task started");
}
