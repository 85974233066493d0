use std::fmt;

use sha2::{Digest, Sha256};

use crate::ChainError;

/// Size of an encoded block: height, parent, timestamp, nonce.
pub const BLOCK_ENCODED_LEN: usize = 8 + 32 + 8 + 8;

/// Fixed timestamp of the shared genesis block.
pub const GENESIS_TIMESTAMP: u64 = 1_296_688_602;

/// 32-byte block identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", hex::encode(&self.0[..8]))
    }
}

/// Minimal block: enough to build competing chains and measure height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub parent: BlockHash,
    pub timestamp: u64,
    pub nonce: u64,
}

impl Block {
    /// Genesis shared by every node.
    pub fn genesis() -> Self {
        Block {
            height: 0,
            parent: BlockHash::ZERO,
            timestamp: GENESIS_TIMESTAMP,
            nonce: 0,
        }
    }

    /// Double SHA-256 of the encoding.
    pub fn hash(&self) -> BlockHash {
        BlockHash(sha256d(&self.encode()))
    }

    /// Fixed little-endian layout: `height | parent | timestamp | nonce`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOCK_ENCODED_LEN);
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(self.parent.as_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Block, ChainError> {
        if bytes.len() != BLOCK_ENCODED_LEN {
            return Err(ChainError::Decode(format!(
                "block must be {} bytes, got {}",
                BLOCK_ENCODED_LEN,
                bytes.len()
            )));
        }
        let height = read_u64_le(&bytes[0..8]);
        let mut parent = [0u8; 32];
        parent.copy_from_slice(&bytes[8..40]);
        let timestamp = read_u64_le(&bytes[40..48]);
        let nonce = read_u64_le(&bytes[48..56]);
        Ok(Block {
            height,
            parent: BlockHash(parent),
            timestamp,
            nonce,
        })
    }

    /// Read only the height from an encoded block, without a full decode.
    pub fn peek_height(bytes: &[u8]) -> Option<u64> {
        if bytes.len() != BLOCK_ENCODED_LEN {
            return None;
        }
        Some(read_u64_le(&bytes[0..8]))
    }
}

/// SHA-256 applied twice.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_hash_is_stable() {
        assert_eq!(Block::genesis().hash(), Block::genesis().hash());
        assert_ne!(Block::genesis().hash(), BlockHash::ZERO);
    }

    #[test]
    fn test_nonce_changes_hash() {
        let a = Block {
            height: 1,
            parent: Block::genesis().hash(),
            timestamp: GENESIS_TIMESTAMP + 1,
            nonce: 1,
        };
        let b = Block { nonce: 2, ..a.clone() };
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_decode_encoded_block() {
        let block = Block {
            height: 100,
            parent: BlockHash([0xAA; 32]),
            timestamp: 1_700_000_000,
            nonce: 0xdead_beef,
        };
        let encoded = block.encode();
        assert_eq!(encoded.len(), BLOCK_ENCODED_LEN);
        assert_eq!(Block::peek_height(&encoded), Some(100));
        assert_eq!(Block::decode(&encoded).unwrap(), block);
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(Block::decode(&[0u8; 10]).is_err());
        assert_eq!(Block::peek_height(&[0u8; 10]), None);
    }

    #[test]
    fn test_sha256d_known_vector() {
        // sha256d("") is a well-known constant
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }
}
