//! Finalized window storage

pub mod finalized;

pub use finalized::{
    record_key, FinalizedWindowHandler, FinalizedWindowStore, HandleOutcome, RelayRetry,
    DEFAULT_SIZE_LOOKBACK_DAYS, RECORD_PREFIX,
};
