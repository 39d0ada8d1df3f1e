use thiserror::Error;

use crate::types::{BigmapId, KeyHash};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("heed error: {0}")]
    Heed(#[from] heed::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no allocation found for bigmap {id}")]
    MissingAlloc { id: BigmapId },

    #[error("missing temporary bigmap {id}")]
    MissingScratch { id: BigmapId },

    #[error("missing live value for bigmap {id} key {key_hash}")]
    MissingLiveValue { id: BigmapId, key_hash: KeyHash },

    #[error("bigmap {id} does not fit the packed history cache key")]
    HistoryIdOverflow { id: BigmapId },

    #[error("invalid snapshot encoding: {reason}")]
    InvalidSnapshot { reason: &'static str },

    #[error("unknown diff action code {code}")]
    UnknownAction { code: u8 },

    #[error("store scan cancelled")]
    Cancelled,
}
