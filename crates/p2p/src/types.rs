use std::net::SocketAddr;

use forks::NetworkMagic;

/// Locally assigned peer identifier, unique for the process lifetime.
pub type PeerId = u64;

/// Snapshot of an established peer session.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub inbound: bool,
    /// Tag both sides agreed on at handshake time.
    pub handshake_magic: NetworkMagic,
    pub best_height: u64,
    pub user_agent: String,
}
