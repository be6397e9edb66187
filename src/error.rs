//! Error types for forum-rank

use thiserror::Error;

use crate::types::PostId;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The post is older than the voting window.
    #[error("Voting window expired for post {0}")]
    VoteWindowExpired(PostId),

    /// The requested direction equals the one already on record.
    #[error("Duplicate vote: user already voted this way on post {0}")]
    DuplicateVote(PostId),

    #[error("Post not registered: {0}")]
    UnknownPost(PostId),

    #[error("Invalid vote direction: {0} (expected -1, 0 or 1)")]
    InvalidDirection(i64),

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether a retry of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientStore(_) | EngineError::Timeout(_))
    }

    /// Domain rule violations that callers translate into a user response.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            EngineError::VoteWindowExpired(_)
                | EngineError::DuplicateVote(_)
                | EngineError::UnknownPost(_)
                | EngineError::InvalidDirection(_)
        )
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                EngineError::TransientStore(e.to_string())
            }
            _ => EngineError::Transaction(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
