//! Peer-to-peer transport for the fork-aware node: framing, handshake,
//! network identity gate and peer sessions.

pub mod bytes;
pub mod constants;
pub mod error;
pub mod frame;
pub mod gate;
pub mod handshake;
pub mod message;
pub mod peer_manager;
pub mod session;
pub mod types;

pub use error::Error;
pub use gate::{Admission, HandshakeDecision, NetworkIdentityGate};
pub use message::{GetBlocks, Message, VersionMessage};
pub use peer_manager::{PeerCommand, PeerEvent, PeerManager, SessionTimings};
pub use types::{PeerId, PeerInfo};
