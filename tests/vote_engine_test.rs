//! Vote engine and reconciliation integration tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forum_rank::db::persist::upsert_all;
use forum_rank::ranking::COMMUNITY_CACHE_TTL;
use forum_rank::reconcile::{collect_scores, collect_votes, Attempt, Backoff};
use forum_rank::types::{PersistedScore, PersistedVote};
use forum_rank::{
    CommunityId, Direction, DurableStore, EngineError, ManualClock, PersistBatch, PersistDb,
    PersistOutcome, PipelineSettings, PostId, RankOrder, ReconciliationPipeline, RetryPolicy,
    SqliteStore, UserId, VoteEngine, VoteRules,
};

const T0: i64 = 1_700_000_000;
const DAY: i64 = 24 * 60 * 60;

fn engine(clock: Arc<ManualClock>) -> VoteEngine {
    VoteEngine::new(clock, VoteRules::default(), COMMUNITY_CACHE_TTL)
}

fn settings(retention_days: u32) -> PipelineSettings {
    PipelineSettings {
        retention_days,
        batch_size: 500,
        retry: RetryPolicy::new(3, Duration::from_secs(5), Backoff::Linear(Duration::from_millis(1))),
    }
}

/// Post P gets three votes, then a late vote bounces off the window
fn reference_scenario(engine: &VoteEngine, clock: &ManualClock) {
    let p = PostId(1);
    assert!(engine.register_post(p, CommunityId(9), T0));

    engine.record_vote(UserId(1), p, 1).unwrap();
    assert_eq!(engine.store().score(p), Some(432));

    engine.record_vote(UserId(2), p, -1).unwrap();
    assert_eq!(engine.store().score(p), Some(0));

    engine.record_vote(UserId(1), p, -1).unwrap();
    assert_eq!(engine.store().score(p), Some(-864));

    clock.set(T0 + 8 * DAY);
    let err = engine.record_vote(UserId(2), p, 1).unwrap_err();
    assert!(matches!(err, EngineError::VoteWindowExpired(_)));
    assert_eq!(engine.store().score(p), Some(-864));
    assert_eq!(engine.store().direction_of(p, UserId(2)), Some(Direction::Down));
}

#[tokio::test]
async fn test_reference_scenario_reconciles_into_sqlite() {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(Arc::clone(&clock));
    reference_scenario(&engine, &clock);

    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(PersistDb::open(dir.path()).unwrap());
    let sink = Arc::new(SqliteStore::new(Arc::clone(&db), 500));
    let pipeline = ReconciliationPipeline::new(Arc::clone(engine.store()), sink, settings(8));

    let report = pipeline.run().await.unwrap();
    assert_eq!((report.scores, report.votes), (1, 2));

    assert_eq!(
        db.load_scores().unwrap(),
        vec![PersistedScore { post_id: PostId(1), score: -864 }]
    );
    assert_eq!(
        db.load_votes().unwrap(),
        vec![
            PersistedVote { post_id: PostId(1), user_id: UserId(1), direction: Direction::Down },
            PersistedVote { post_id: PostId(1), user_id: UserId(2), direction: Direction::Down },
        ]
    );
}

#[tokio::test]
async fn test_short_retention_freezes_score_but_copies_votes() {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(Arc::clone(&clock));
    reference_scenario(&engine, &clock);

    let db = Arc::new(PersistDb::open_in_memory().unwrap());
    let sink = Arc::new(SqliteStore::new(Arc::clone(&db), 500));
    let pipeline = ReconciliationPipeline::new(Arc::clone(engine.store()), sink, settings(7));

    let report = pipeline.run().await.unwrap();
    assert_eq!((report.scores, report.votes), (0, 2));
    assert!(db.load_scores().unwrap().is_empty());
    assert_eq!(db.load_votes().unwrap().len(), 2);
}

#[tokio::test]
async fn test_second_pass_without_votes_is_idempotent() {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(Arc::clone(&clock));
    for post in 1..=20 {
        engine.register_post(PostId(post), CommunityId(post % 3), T0 + post);
    }
    clock.set(T0 + 100);
    for user in 1..=5 {
        for post in 1..=20 {
            let direction = if (post + user) % 2 == 0 { 1 } else { -1 };
            engine.record_vote(UserId(user), PostId(post), direction).unwrap();
        }
    }

    let db = Arc::new(PersistDb::open_in_memory().unwrap());
    let sink = Arc::new(SqliteStore::new(Arc::clone(&db), 7));
    let pipeline = ReconciliationPipeline::new(Arc::clone(engine.store()), sink, settings(7));

    let first = pipeline.run().await.unwrap();
    assert_eq!(first.written.scores_written, 20);
    assert_eq!(first.written.votes_written, 100);
    let scores = db.load_scores().unwrap();
    let votes = db.load_votes().unwrap();

    let second = pipeline.run().await.unwrap();
    assert_eq!(second.written, PersistOutcome::default());
    assert_eq!(db.load_scores().unwrap(), scores);
    assert_eq!(db.load_votes().unwrap(), votes);
}

#[tokio::test]
async fn test_cleared_vote_keeps_last_persisted_direction() {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(Arc::clone(&clock));
    engine.register_post(PostId(1), CommunityId(1), T0);
    engine.record_vote(UserId(1), PostId(1), 1).unwrap();

    let db = Arc::new(PersistDb::open_in_memory().unwrap());
    let sink = Arc::new(SqliteStore::new(Arc::clone(&db), 500));
    let pipeline = ReconciliationPipeline::new(Arc::clone(engine.store()), sink, settings(7));
    pipeline.run().await.unwrap();

    engine.record_vote(UserId(1), PostId(1), 0).unwrap();
    pipeline.run().await.unwrap();

    assert_eq!(
        db.load_scores().unwrap(),
        vec![PersistedScore { post_id: PostId(1), score: 0 }]
    );
    assert_eq!(db.load_votes().unwrap()[0].direction, Direction::Up);
}

/// Writes scores, then fails before votes inside the same transaction
struct HalfFailingStore {
    db: Arc<PersistDb>,
}

#[async_trait]
impl DurableStore for HalfFailingStore {
    async fn persist(&self, batch: PersistBatch, attempt: Attempt) -> Result<PersistOutcome, EngineError> {
        self.db.with_conn_mut(|conn| {
            // votes table gone: score upserts succeed, vote upserts fail
            conn.execute_batch("ALTER TABLE post_votes RENAME TO post_votes_hidden")
                .map_err(EngineError::from)?;
            let result = upsert_all(conn, &batch.scores, &batch.votes, 500, &attempt);
            conn.execute_batch("ALTER TABLE post_votes_hidden RENAME TO post_votes")
                .map_err(EngineError::from)?;
            result
        })
    }
}

#[tokio::test]
async fn test_vote_upsert_failure_commits_nothing() {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(Arc::clone(&clock));
    reference_scenario(&engine, &clock);

    let db = Arc::new(PersistDb::open_in_memory().unwrap());
    let sink = Arc::new(HalfFailingStore { db: Arc::clone(&db) });
    let pipeline = ReconciliationPipeline::new(Arc::clone(engine.store()), sink, settings(8));

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, EngineError::Transaction(_)));
    assert!(db.load_scores().unwrap().is_empty());
    assert!(db.load_votes().unwrap().is_empty());
}

#[test]
fn test_community_feed_only_lists_members() {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(Arc::clone(&clock));
    for post in 1..=6 {
        engine.register_post(PostId(post), CommunityId(post % 2), T0 + post);
    }
    engine.record_vote(UserId(1), PostId(3), 1).unwrap();
    engine.record_vote(UserId(2), PostId(3), 1).unwrap();
    engine.record_vote(UserId(1), PostId(5), 1).unwrap();
    engine.record_vote(UserId(1), PostId(4), -1).unwrap();

    let odd = engine.list_community_post_ids(CommunityId(1), RankOrder::Score, 1, 10);
    assert_eq!(odd, vec![PostId(3), PostId(5), PostId(1)]);

    let even = engine.list_community_post_ids(CommunityId(0), RankOrder::Time, 1, 2);
    assert_eq!(even, vec![PostId(6), PostId(4)]);

    assert!(engine
        .list_community_post_ids(CommunityId(42), RankOrder::Score, 1, 10)
        .is_empty());

    let global = engine.list_post_ids(RankOrder::Score, 1, 10);
    let scores: Vec<i64> = global
        .iter()
        .map(|p| engine.store().score(*p).unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(engine.get_vote_counts(&[PostId(3), PostId(4)]), vec![2, 0]);
}

#[test]
fn test_collectors_read_store_directly() {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(Arc::clone(&clock));
    reference_scenario(&engine, &clock);

    assert_eq!(collect_scores(engine.store(), 8, 1).len(), 1);
    assert_eq!(collect_votes(engine.store(), 1).len(), 2);
}
