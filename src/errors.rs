/// Error taxonomy for the indexer core.
///
/// The split matters operationally: validation rejections are normal BRC-20
/// protocol behaviour and never surface here, stream defects are skippable,
/// storage errors are retried at the block boundary, and invariant
/// violations abort the process because they mean the apply/rollback pair
/// is no longer balanced.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Reveal of an inscription id the store already knows. Upstream either
    /// replayed a block without a rollback or is duplicating events.
    #[error("duplicate inscription reveal: {0}")]
    DuplicateReveal(String),

    /// A derived counter or balance would leave its legal range.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The directive stream is inconsistent with the store (rollback of a
    /// block that was never applied, apply with an unreachable parent).
    #[error("block stream error: {0}")]
    BlockStream(String),

    /// Ordinal number outside [0, SAT_SUPPLY).
    #[error("sat ordinal out of range: {0}")]
    InvalidSatRange(u64),

    /// A column family named at open time is missing at runtime.
    #[error("column family not found: {0}")]
    MissingColumnFamily(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("row encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("event decode error: {0}")]
    EventDecode(#[from] serde_json::Error),

    #[error("malformed hex field: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChainError {
    /// Whether the ingest loop may retry the whole block after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Storage(_) | ChainError::Io(_))
    }

    /// Whether the directive can be skipped without corrupting state.
    /// The store was left untouched; only the stream itself is suspect.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            ChainError::BlockStream(_) | ChainError::EventDecode(_) | ChainError::Hex(_)
        )
    }

    /// Process exit code for the writer: 1 for invariant-class failures,
    /// 2 for exhausted I/O.
    pub fn exit_code(&self) -> i32 {
        match self {
            ChainError::Storage(_) | ChainError::Io(_) => 2,
            _ => 1,
        }
    }
}
