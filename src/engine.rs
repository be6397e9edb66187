//! Vote engine - the surface exposed to content and API collaborators
//!
//! Owns the vote store and ranking index. Content management registers
//! posts here; the API layer records votes and reads feeds.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::ranking::{RankedPost, RankingCacheStats, RankingIndex};
use crate::types::{Clock, CommunityId, Direction, PostId, PostListQuery, RankOrder, UserId};
use crate::votes::{VoteRules, VoteStore};

pub struct VoteEngine {
    store: Arc<VoteStore>,
    ranking: Arc<RankingIndex>,
}

impl VoteEngine {
    pub fn new(clock: Arc<dyn Clock>, rules: VoteRules, community_cache_ttl: Duration) -> Self {
        let store = Arc::new(VoteStore::new(clock, rules));
        let ranking = Arc::new(RankingIndex::new(Arc::clone(&store), community_cache_ttl));
        Self { store, ranking }
    }

    pub fn store(&self) -> &Arc<VoteStore> {
        &self.store
    }

    pub fn ranking(&self) -> &Arc<RankingIndex> {
        &self.ranking
    }

    /// Called once by content management when a post is created
    pub fn register_post(&self, post_id: PostId, community_id: CommunityId, created_at: i64) -> bool {
        self.store.register_post(post_id, community_id, created_at)
    }

    /// Record a raw API direction (-1, 0 or 1) from `user_id` on `post_id`
    pub fn record_vote(&self, user_id: UserId, post_id: PostId, direction: i64) -> Result<()> {
        let direction = Direction::try_from(direction)?;
        let result = self.store.record_vote(post_id, user_id, direction);
        if let Err(e) = &result {
            debug!(%post_id, %user_id, error = %e, "Vote rejected");
        }
        result
    }

    pub fn list_post_ids(&self, order: RankOrder, page: u64, size: u64) -> Vec<PostId> {
        self.ranking.list_post_ids(order, page, size)
    }

    pub fn list_community_post_ids(
        &self,
        community_id: CommunityId,
        order: RankOrder,
        page: u64,
        size: u64,
    ) -> Vec<PostId> {
        self.ranking.list_community_post_ids(community_id, order, page, size)
    }

    pub fn get_vote_counts(&self, post_ids: &[PostId]) -> Vec<i64> {
        self.ranking.get_vote_counts(post_ids)
    }

    pub fn list(&self, query: &PostListQuery) -> Vec<RankedPost> {
        self.ranking.list(query)
    }

    pub fn cache_stats(&self) -> RankingCacheStats {
        self.ranking.cache_stats()
    }
}
