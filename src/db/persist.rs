//! Batched upserts of reconciled scores and votes

use rusqlite::types::Type;
use rusqlite::{params_from_iter, Connection, Transaction};
use tracing::debug;

use crate::error::EngineError;
use crate::reconcile::Attempt;
use crate::types::{Direction, PersistedScore, PersistedVote, PostId, UserId};

use super::PersistOutcome;

/// Upper bound on rows per INSERT so a statement stays under SQLite's
/// host-parameter limit (3 parameters per vote row).
pub const MAX_ROWS_PER_STATEMENT: usize = 10_000;

/// Upsert both batches inside one transaction.
///
/// Rows are written in statements of at most `batch_size` rows. Any failure
/// rolls back the whole transaction, so either both tables reflect this
/// call or neither does. The commit only happens if `attempt` can still be
/// claimed; an abandoned attempt rolls back with `Timeout`.
pub fn upsert_all(
    conn: &mut Connection,
    scores: &[PersistedScore],
    votes: &[PersistedVote],
    batch_size: usize,
    attempt: &Attempt,
) -> Result<PersistOutcome, EngineError> {
    let rows_per_statement = batch_size.clamp(1, MAX_ROWS_PER_STATEMENT);
    let tx = conn.transaction()?;

    let mut scores_written = 0;
    for chunk in scores.chunks(rows_per_statement) {
        scores_written += upsert_scores(&tx, chunk)?;
    }

    let mut votes_written = 0;
    for chunk in votes.chunks(rows_per_statement) {
        votes_written += upsert_votes(&tx, chunk)?;
    }

    if !attempt.begin_commit() {
        debug!(attempt = attempt.number(), "Attempt abandoned, rolling back");
        return Err(EngineError::Timeout(format!(
            "persist attempt {} abandoned before commit",
            attempt.number()
        )));
    }
    tx.commit()?;

    debug!(
        scores = scores.len(),
        votes = votes.len(),
        scores_written,
        votes_written,
        "Upserted scores and votes"
    );

    Ok(PersistOutcome {
        scores_written,
        votes_written,
    })
}

fn upsert_scores(tx: &Transaction, rows: &[PersistedScore]) -> Result<usize, EngineError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let values = vec!["(?, ?)"; rows.len()].join(", ");
    let sql = format!(
        "INSERT INTO post_scores (post_id, score) VALUES {} \
         ON CONFLICT(post_id) DO UPDATE SET score = excluded.score, updated_at = datetime('now') \
         WHERE post_scores.score <> excluded.score",
        values
    );
    let params = rows.iter().flat_map(|r| [r.post_id.0, r.score]);
    Ok(tx.execute(&sql, params_from_iter(params))?)
}

fn upsert_votes(tx: &Transaction, rows: &[PersistedVote]) -> Result<usize, EngineError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let values = vec!["(?, ?, ?)"; rows.len()].join(", ");
    let sql = format!(
        "INSERT INTO post_votes (post_id, user_id, direction) VALUES {} \
         ON CONFLICT(post_id, user_id) DO UPDATE SET direction = excluded.direction, updated_at = datetime('now') \
         WHERE post_votes.direction <> excluded.direction",
        values
    );
    let params = rows
        .iter()
        .flat_map(|r| [r.post_id.0, r.user_id.0, r.direction.value()]);
    Ok(tx.execute(&sql, params_from_iter(params))?)
}

/// All persisted scores, by post id
pub fn load_scores(conn: &Connection) -> Result<Vec<PersistedScore>, EngineError> {
    let mut stmt = conn.prepare("SELECT post_id, score FROM post_scores ORDER BY post_id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PersistedScore {
                post_id: PostId(row.get(0)?),
                score: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All persisted votes, by post id then user id
pub fn load_votes(conn: &Connection) -> Result<Vec<PersistedVote>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT post_id, user_id, direction FROM post_votes ORDER BY post_id, user_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let raw: i64 = row.get(2)?;
            let direction = Direction::try_from(raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Integer, Box::new(e)))?;
            Ok(PersistedVote {
                post_id: PostId(row.get(0)?),
                user_id: UserId(row.get(1)?),
                direction,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
