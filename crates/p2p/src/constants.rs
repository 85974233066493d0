use std::time::Duration;

pub const DEFAULT_LISTEN_PORT: u16 = 18444;
pub const MAX_PEERS: usize = 25;
pub const PING_INTERVAL: Duration = Duration::from_secs(15);
pub const USER_AGENT: &str = "/mvf-node:0.1.0/";
pub const PROTOCOL_VERSION: u32 = 70012;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

// Frame layout: magic | command | length | checksum
pub const COMMAND_SIZE: usize = 12;
pub const CHECKSUM_SIZE: usize = 4;
pub const FRAME_HEADER_SIZE: usize = forks::params::MAGIC_LEN + COMMAND_SIZE + 4 + CHECKSUM_SIZE;
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Consecutive frames under a foreign tag before a session is closed.
pub const MAX_MISMATCHED_FRAMES: u32 = 3;

/// Upper bound on blocks returned for one `getblocks` request.
pub const MAX_BLOCKS_PER_RESPONSE: usize = 500;
