//! Height-triggered hard fork activation and network identity selection.

pub mod marker;
pub mod params;
pub mod schedule;
pub mod tracker;

use thiserror::Error;

pub use marker::{ForkMarker, MarkerError};
pub use params::{MagicPair, NetworkMagic, POSTFORK_MAGIC, PREFORK_MAGIC};
pub use schedule::{is_active, ForkConfig};
pub use tracker::{ForkActivation, ForkObserver, ForkState, ForkStateTracker, Transition};

#[derive(Debug, Error)]
pub enum ForkError {
    #[error("invalid network magic: {0}")]
    InvalidMagic(String),
    #[error("prefork and postfork magic must differ (both {0})")]
    IdenticalMagic(NetworkMagic),
}
