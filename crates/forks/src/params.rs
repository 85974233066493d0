use std::fmt;
use std::str::FromStr;

use crate::ForkError;

/// Length of the network identity tag prefixed to every P2P frame.
pub const MAGIC_LEN: usize = 4;

/// Fixed-width network identity tag ("network magic").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkMagic(pub [u8; MAGIC_LEN]);

/// Tag spoken by every node until its own fork activates.
pub const PREFORK_MAGIC: NetworkMagic = NetworkMagic([0xfa, 0xbf, 0xb5, 0xda]);

/// Tag spoken after activation. Never equal to [`PREFORK_MAGIC`].
pub const POSTFORK_MAGIC: NetworkMagic = NetworkMagic([0xe3, 0xa1, 0xc7, 0x5f]);

impl NetworkMagic {
    pub fn as_bytes(&self) -> &[u8; MAGIC_LEN] {
        &self.0
    }
}

impl fmt::Display for NetworkMagic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for NetworkMagic {
    type Err = ForkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| ForkError::InvalidMagic(e.to_string()))?;
        if bytes.len() != MAGIC_LEN {
            return Err(ForkError::InvalidMagic(format!(
                "expected {} bytes, got {}",
                MAGIC_LEN,
                bytes.len()
            )));
        }
        let mut magic = [0u8; MAGIC_LEN];
        magic.copy_from_slice(&bytes);
        Ok(NetworkMagic(magic))
    }
}

/// The two identities a node can speak. Construction enforces that they differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicPair {
    prefork: NetworkMagic,
    postfork: NetworkMagic,
}

impl Default for MagicPair {
    fn default() -> Self {
        Self {
            prefork: PREFORK_MAGIC,
            postfork: POSTFORK_MAGIC,
        }
    }
}

impl MagicPair {
    pub fn new(prefork: NetworkMagic, postfork: NetworkMagic) -> Result<Self, ForkError> {
        if prefork == postfork {
            return Err(ForkError::IdenticalMagic(prefork));
        }
        Ok(Self { prefork, postfork })
    }

    pub fn prefork(&self) -> NetworkMagic {
        self.prefork
    }

    pub fn postfork(&self) -> NetworkMagic {
        self.postfork
    }

    /// Tag for a node whose fork latch is `active`.
    pub fn select(&self, active: bool) -> NetworkMagic {
        if active {
            self.postfork
        } else {
            self.prefork
        }
    }
}
