//! Shared identifiers and value types

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                $name(v)
            }
        }
    };
}

id_type!(
    /// Post identifier (snowflake id issued by the content service)
    PostId
);
id_type!(
    /// User identifier
    UserId
);
id_type!(
    /// Community identifier
    CommunityId
);

/// Vote direction.
///
/// `Neutral` is only ever an input (it clears a vote); the ledger stores
/// `Up` or `Down` and expresses "no vote" by the absence of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Direction {
    Down,
    Neutral,
    Up,
}

impl Direction {
    pub fn value(self) -> i64 {
        match self {
            Direction::Down => -1,
            Direction::Neutral => 0,
            Direction::Up => 1,
        }
    }
}

impl TryFrom<i64> for Direction {
    type Error = EngineError;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(Direction::Down),
            0 => Ok(Direction::Neutral),
            1 => Ok(Direction::Up),
            other => Err(EngineError::InvalidDirection(other)),
        }
    }
}

impl From<Direction> for i64 {
    fn from(d: Direction) -> i64 {
        d.value()
    }
}

/// Which global index a listing is ranked by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrder {
    /// Newest first
    #[default]
    Time,
    /// Highest score first
    Score,
}

impl FromStr for RankOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "time" => Ok(RankOrder::Time),
            "score" => Ok(RankOrder::Score),
            other => Err(format!("unknown order '{}'", other)),
        }
    }
}

impl fmt::Display for RankOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankOrder::Time => write!(f, "time"),
            RankOrder::Score => write!(f, "score"),
        }
    }
}

/// Parameters of a post list request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostListQuery {
    #[serde(default)]
    pub community: Option<CommunityId>,
    #[serde(default)]
    pub order: RankOrder,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_size")]
    pub size: u64,
}

fn default_page() -> u64 { 1 }
fn default_size() -> u64 { 10 }

impl Default for PostListQuery {
    fn default() -> Self {
        Self {
            community: None,
            order: RankOrder::Time,
            page: default_page(),
            size: default_size(),
        }
    }
}

/// A post's aggregate score as written to durable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedScore {
    pub post_id: PostId,
    pub score: i64,
}

/// A single active vote as written to durable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedVote {
    pub post_id: PostId,
    pub user_id: UserId,
    pub direction: Direction,
}

/// Source of "now" in unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Settable clock for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self { now: AtomicI64::new(now) }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
