use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

/// Failures of ledger, thread and like operations.
///
/// Business-rule variants leave the database untouched: the surrounding
/// transaction is rolled back before the error reaches the caller.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("thread not found")]
    ThreadNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("user is not a participant of this thread")]
    NotParticipant,

    #[error("a thread needs two distinct users")]
    SameUser,

    #[error("username already taken")]
    UsernameTaken,

    #[error("invalid message content: {0}")]
    InvalidContent(&'static str),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("crediting {amount} would overflow the balance")]
    BalanceOverflow { amount: i64 },

    #[error("insufficient balance: needed {needed}, available {available}")]
    InsufficientBalance { needed: i64, available: i64 },

    #[error("daily like limit of {limit} reached")]
    LikeLimitReached { limit: u32 },

    #[error("users cannot like themselves")]
    InvalidLike,

    #[error("daily faucet already claimed")]
    FaucetAlreadyClaimed,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
