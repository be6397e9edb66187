//! Vote state store - per-(post, user) vote ledger and per-post score
//!
//! ## State machine (per post, per user)
//!
//! | From   | Input | To     | Score delta |
//! |--------|-------|--------|-------------|
//! | none   | +1    | Up     | +1 x weight |
//! | none   | -1    | Down   | -1 x weight |
//! | Up     | -1    | Down   | -2 x weight |
//! | Down   | +1    | Up     | +2 x weight |
//! | Up     | 0     | none   | -1 x weight |
//! | Down   | 0     | none   | +1 x weight |
//! | same   | same  | -      | DuplicateVote |
//!
//! The delta is always `(new - old) x weight`, so a user's contribution to a
//! score telescopes to `final_direction x weight` whatever path they took.
//! Votes are only accepted while `now - created_at <= window`.
//!
//! ## Concurrency
//!
//! Each post owns its own ledger map. A vote takes the ledger entry for the
//! (post, user) pair, applies the score delta as an atomic add while that
//! entry is held, then writes or removes the record. Two votes for the same
//! pair serialize on the entry; votes from different users on one post only
//! share the atomic add; different posts share nothing.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tracing::debug;

use crate::ephemeral::SortedSet;
use crate::error::{EngineError, Result};
use crate::types::{Clock, CommunityId, Direction, PostId, UserId};

/// Seconds after creation during which a post accepts votes
pub const VOTING_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

/// Score contribution of one unit of vote direction (86400 / 200)
pub const SCORE_PER_VOTE: i64 = 432;

/// Voting rules applied by [`VoteStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRules {
    pub window_secs: i64,
    pub weight: i64,
}

impl Default for VoteRules {
    fn default() -> Self {
        Self {
            window_secs: VOTING_WINDOW_SECS,
            weight: SCORE_PER_VOTE,
        }
    }
}

/// All active votes on one post, users ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostVotes {
    pub post_id: PostId,
    pub votes: Vec<(UserId, Direction)>,
}

pub struct VoteStore {
    clock: Arc<dyn Clock>,
    rules: VoteRules,
    /// post -> creation timestamp, written once at registration
    time_index: SortedSet<PostId>,
    /// post -> aggregate score
    score_index: SortedSet<PostId>,
    /// post -> (user -> direction); a present ledger marks a registered post
    ledgers: DashMap<PostId, DashMap<UserId, Direction>>,
    /// community -> member posts, append-only
    communities: DashMap<CommunityId, DashSet<PostId>>,
}

impl VoteStore {
    pub fn new(clock: Arc<dyn Clock>, rules: VoteRules) -> Self {
        Self {
            clock,
            rules,
            time_index: SortedSet::new(),
            score_index: SortedSet::new(),
            ledgers: DashMap::new(),
            communities: DashMap::new(),
        }
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, VoteRules::default())
    }

    pub fn rules(&self) -> VoteRules {
        self.rules
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Register a newly created post.
    ///
    /// Creates its zero score, its time entry and its community membership.
    /// Only the first call for a post has any effect; later calls return
    /// false and leave the existing state untouched.
    pub fn register_post(&self, post_id: PostId, community_id: CommunityId, created_at: i64) -> bool {
        match self.ledgers.entry(post_id) {
            Entry::Occupied(_) => {
                debug!(%post_id, "Post already registered, ignoring");
                false
            }
            Entry::Vacant(slot) => {
                self.score_index.add(post_id, 0);
                self.time_index.add(post_id, created_at);
                self.communities.entry(community_id).or_default().insert(post_id);
                // Ledger last: once it is visible every other entry exists.
                slot.insert(DashMap::new());
                debug!(%post_id, %community_id, created_at, "Post registered");
                true
            }
        }
    }

    /// Apply a vote from `user_id` on `post_id`.
    ///
    /// # Errors
    /// - `UnknownPost` if the post was never registered
    /// - `VoteWindowExpired` if the post is older than the voting window
    /// - `DuplicateVote` if `direction` equals the vote already on record
    ///   (including clearing a vote that does not exist)
    ///
    /// No state changes on error.
    pub fn record_vote(&self, post_id: PostId, user_id: UserId, direction: Direction) -> Result<()> {
        let ledger = self
            .ledgers
            .get(&post_id)
            .ok_or(EngineError::UnknownPost(post_id))?;

        let created_at = self.time_index.score(&post_id).ok_or_else(|| {
            EngineError::Internal(format!("post {} has a ledger but no time entry", post_id))
        })?;
        if self.clock.now() - created_at > self.rules.window_secs {
            return Err(EngineError::VoteWindowExpired(post_id));
        }

        let (previous, score) = match ledger.entry(user_id) {
            Entry::Occupied(mut record) => {
                let previous = *record.get();
                if previous == direction {
                    return Err(EngineError::DuplicateVote(post_id));
                }
                let score = self.apply_delta(post_id, previous, direction)?;
                if direction == Direction::Neutral {
                    record.remove();
                } else {
                    record.insert(direction);
                }
                (previous, score)
            }
            Entry::Vacant(slot) => {
                if direction == Direction::Neutral {
                    return Err(EngineError::DuplicateVote(post_id));
                }
                let score = self.apply_delta(post_id, Direction::Neutral, direction)?;
                slot.insert(direction);
                (Direction::Neutral, score)
            }
        };

        debug!(
            %post_id,
            %user_id,
            from = previous.value(),
            to = direction.value(),
            score,
            "Vote recorded"
        );
        Ok(())
    }

    fn apply_delta(&self, post_id: PostId, from: Direction, to: Direction) -> Result<i64> {
        let delta = (to.value() - from.value()) * self.rules.weight;
        self.score_index.incr_by(&post_id, delta).ok_or_else(|| {
            EngineError::Internal(format!("post {} has a ledger but no score entry", post_id))
        })
    }

    pub fn score(&self, post_id: PostId) -> Option<i64> {
        self.score_index.score(&post_id)
    }

    pub fn created_at(&self, post_id: PostId) -> Option<i64> {
        self.time_index.score(&post_id)
    }

    /// The stored direction for a pair; `None` means no active vote
    pub fn direction_of(&self, post_id: PostId, user_id: UserId) -> Option<Direction> {
        self.ledgers
            .get(&post_id)
            .and_then(|ledger| ledger.get(&user_id).map(|d| *d))
    }

    pub fn post_count(&self) -> usize {
        self.time_index.len()
    }

    pub fn is_member(&self, community_id: CommunityId, post_id: PostId) -> bool {
        self.communities
            .get(&community_id)
            .map(|members| members.contains(&post_id))
            .unwrap_or(false)
    }

    /// Member posts of a community, ascending. Unknown communities are empty.
    pub fn community_members(&self, community_id: CommunityId) -> Vec<PostId> {
        let mut members: Vec<PostId> = self
            .communities
            .get(&community_id)
            .map(|set| set.iter().map(|p| *p).collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Batched score lookup, one slot per requested post
    pub fn scores_for(&self, post_ids: &[PostId]) -> Vec<Option<i64>> {
        self.score_index.scores_for(post_ids)
    }

    /// Batched ledger read, one entry per requested post.
    ///
    /// Posts without a ledger come back with no votes.
    pub fn votes_for(&self, post_ids: &[PostId]) -> Vec<PostVotes> {
        post_ids
            .iter()
            .map(|&post_id| {
                let mut votes: Vec<(UserId, Direction)> = self
                    .ledgers
                    .get(&post_id)
                    .map(|ledger| ledger.iter().map(|e| (*e.key(), *e.value())).collect())
                    .unwrap_or_default();
                votes.sort_by_key(|(user, _)| *user);
                PostVotes { post_id, votes }
            })
            .collect()
    }

    /// Number of up votes per requested post, in request order
    pub fn up_vote_counts(&self, post_ids: &[PostId]) -> Vec<i64> {
        post_ids
            .iter()
            .map(|post_id| {
                self.ledgers
                    .get(post_id)
                    .map(|ledger| ledger.iter().filter(|e| *e.value() == Direction::Up).count() as i64)
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Posts created at or after `threshold`, oldest first
    pub fn posts_created_since(&self, threshold: i64) -> Vec<PostId> {
        self.time_index
            .range_by_score(threshold, i64::MAX)
            .into_iter()
            .map(|(post_id, _)| post_id)
            .collect()
    }

    /// Every registered post, oldest first
    pub fn all_posts(&self) -> Vec<PostId> {
        self.posts_created_since(i64::MIN)
    }

    pub(crate) fn time_index(&self) -> &SortedSet<PostId> {
        &self.time_index
    }

    pub(crate) fn score_index(&self) -> &SortedSet<PostId> {
        &self.score_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManualClock;

    const T0: i64 = 1_700_000_000;
    const DAY: i64 = 24 * 60 * 60;

    fn store() -> (VoteStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        (VoteStore::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_register_creates_all_entries() {
        let (store, _) = store();
        assert!(store.register_post(PostId(1), CommunityId(9), T0));

        assert_eq!(store.score(PostId(1)), Some(0));
        assert_eq!(store.created_at(PostId(1)), Some(T0));
        assert!(store.is_member(CommunityId(9), PostId(1)));
        assert_eq!(store.post_count(), 1);
    }

    #[test]
    fn test_register_is_idempotent() {
        let (store, _) = store();
        store.register_post(PostId(1), CommunityId(1), T0);
        store.record_vote(PostId(1), UserId(5), Direction::Up).unwrap();

        assert!(!store.register_post(PostId(1), CommunityId(2), T0 + 100));
        assert_eq!(store.score(PostId(1)), Some(SCORE_PER_VOTE));
        assert_eq!(store.created_at(PostId(1)), Some(T0));
        assert!(!store.is_member(CommunityId(2), PostId(1)));
    }

    #[test]
    fn test_transition_table() {
        let cases = [
            (None, Direction::Up, Some(Direction::Up), 1),
            (None, Direction::Down, Some(Direction::Down), -1),
            (Some(Direction::Up), Direction::Down, Some(Direction::Down), -2),
            (Some(Direction::Down), Direction::Up, Some(Direction::Up), 2),
            (Some(Direction::Up), Direction::Neutral, None, -1),
            (Some(Direction::Down), Direction::Neutral, None, 1),
        ];

        for (i, (from, input, to, units)) in cases.into_iter().enumerate() {
            let (store, _) = store();
            let post = PostId(i as i64);
            let user = UserId(1);
            store.register_post(post, CommunityId(1), T0);
            if let Some(initial) = from {
                store.record_vote(post, user, initial).unwrap();
            }
            let before = store.score(post).unwrap();

            store.record_vote(post, user, input).unwrap();

            assert_eq!(store.direction_of(post, user), to, "case {}", i);
            assert_eq!(store.score(post).unwrap() - before, units * SCORE_PER_VOTE, "case {}", i);
        }
    }

    #[test]
    fn test_duplicate_votes_rejected() {
        let (store, _) = store();
        let post = PostId(1);
        store.register_post(post, CommunityId(1), T0);

        assert!(matches!(
            store.record_vote(post, UserId(1), Direction::Neutral),
            Err(EngineError::DuplicateVote(_))
        ));

        store.record_vote(post, UserId(1), Direction::Up).unwrap();
        assert!(matches!(
            store.record_vote(post, UserId(1), Direction::Up),
            Err(EngineError::DuplicateVote(_))
        ));
        assert_eq!(store.score(post), Some(SCORE_PER_VOTE));

        store.record_vote(post, UserId(1), Direction::Neutral).unwrap();
        assert!(matches!(
            store.record_vote(post, UserId(1), Direction::Neutral),
            Err(EngineError::DuplicateVote(_))
        ));
        assert_eq!(store.score(post), Some(0));
    }

    #[test]
    fn test_window_boundary() {
        let (store, clock) = store();
        let post = PostId(1);
        store.register_post(post, CommunityId(1), T0);

        clock.set(T0 + VOTING_WINDOW_SECS);
        store.record_vote(post, UserId(1), Direction::Up).unwrap();

        clock.set(T0 + VOTING_WINDOW_SECS + 1);
        assert!(matches!(
            store.record_vote(post, UserId(1), Direction::Neutral),
            Err(EngineError::VoteWindowExpired(_))
        ));
        assert_eq!(store.direction_of(post, UserId(1)), Some(Direction::Up));
        assert_eq!(store.score(post), Some(SCORE_PER_VOTE));
    }

    #[test]
    fn test_unknown_post() {
        let (store, _) = store();
        assert!(matches!(
            store.record_vote(PostId(404), UserId(1), Direction::Up),
            Err(EngineError::UnknownPost(PostId(404)))
        ));
    }

    #[test]
    fn test_reference_scenario() {
        let (store, clock) = store();
        let p = PostId(100);
        store.register_post(p, CommunityId(1), T0);

        store.record_vote(p, UserId(1), Direction::Up).unwrap();
        assert_eq!(store.score(p), Some(432));
        store.record_vote(p, UserId(2), Direction::Down).unwrap();
        assert_eq!(store.score(p), Some(0));
        store.record_vote(p, UserId(1), Direction::Down).unwrap();
        assert_eq!(store.score(p), Some(-864));

        clock.set(T0 + 8 * DAY);
        assert!(matches!(
            store.record_vote(p, UserId(2), Direction::Up),
            Err(EngineError::VoteWindowExpired(_))
        ));
        assert_eq!(store.score(p), Some(-864));
        assert_eq!(
            store.votes_for(&[p]),
            vec![PostVotes {
                post_id: p,
                votes: vec![(UserId(1), Direction::Down), (UserId(2), Direction::Down)],
            }]
        );
    }

    #[test]
    fn test_up_vote_counts_and_batched_reads() {
        let (store, _) = store();
        store.register_post(PostId(1), CommunityId(1), T0);
        store.register_post(PostId(2), CommunityId(1), T0);
        store.record_vote(PostId(1), UserId(1), Direction::Up).unwrap();
        store.record_vote(PostId(1), UserId(2), Direction::Up).unwrap();
        store.record_vote(PostId(1), UserId(3), Direction::Down).unwrap();

        assert_eq!(store.up_vote_counts(&[PostId(1), PostId(2), PostId(3)]), vec![2, 0, 0]);
        assert_eq!(
            store.scores_for(&[PostId(2), PostId(1), PostId(3)]),
            vec![Some(0), Some(432), None]
        );
    }

    #[test]
    fn test_posts_created_since() {
        let (store, _) = store();
        store.register_post(PostId(1), CommunityId(1), T0 - 10 * DAY);
        store.register_post(PostId(2), CommunityId(1), T0 - 2 * DAY);
        store.register_post(PostId(3), CommunityId(2), T0);

        assert_eq!(store.posts_created_since(T0 - 3 * DAY), vec![PostId(2), PostId(3)]);
        assert_eq!(store.all_posts(), vec![PostId(1), PostId(2), PostId(3)]);
        assert_eq!(store.community_members(CommunityId(1)), vec![PostId(1), PostId(2)]);
        assert!(store.community_members(CommunityId(42)).is_empty());
    }

    #[test]
    fn test_concurrent_votes_same_pair_never_diverge() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(VoteStore::with_clock(clock));
        let post = PostId(1);
        store.register_post(post, CommunityId(1), T0);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let seq = [Direction::Up, Direction::Down, Direction::Neutral];
                    for n in 0..300 {
                        let _ = store.record_vote(post, UserId(1), seq[(n + i) % 3]);
                        let _ = store.record_vote(post, UserId(2 + i as i64), seq[n % 3]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let expected: i64 = store.votes_for(&[post])[0]
            .votes
            .iter()
            .map(|(_, d)| d.value() * SCORE_PER_VOTE)
            .sum();
        assert_eq!(store.score(post), Some(expected));
    }
}
