//! Minimal in-memory chain engine: blocks, best chain and orphan handling.

pub mod tracker;
pub mod types;

use thiserror::Error;

pub use tracker::{Accepted, BlockStatus, ChainTracker};
pub use types::{sha256d, Block, BlockHash};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block decode error: {0}")]
    Decode(String),
    #[error("bad block height: expected {expected}, got {got}")]
    BadHeight { expected: u64, got: u64 },
    #[error("unknown parent {0}")]
    UnknownParent(BlockHash),
}
