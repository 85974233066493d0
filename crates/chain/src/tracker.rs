use std::collections::HashMap;

use tracing::{debug, info};

use crate::types::{Block, BlockHash};
use crate::ChainError;

/// Maximum number of blocks held while waiting for their parent.
const MAX_ORPHANS: usize = 256;

/// What happened to a block handed to [`ChainTracker::accept_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Extended the best chain.
    Connected,
    /// Already known (connected, side or orphan).
    Duplicate,
    /// Parent unknown; held until it arrives.
    Orphan,
    /// Parent known but not the tip. Stored, never reorganised onto.
    SideChain,
}

/// Outcome of accepting one block. `connected` lists every block newly
/// appended to the best chain, in height order, including resolved orphans.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub status: BlockStatus,
    pub connected: Vec<Block>,
}

impl Accepted {
    fn without_connect(status: BlockStatus) -> Self {
        Self {
            status,
            connected: Vec::new(),
        }
    }
}

/// In-memory chain tracker.
///
/// Tracks the best chain by height plus every other known block. The best
/// chain only ever grows at the tip; reorganisation is not supported.
pub struct ChainTracker {
    blocks: HashMap<BlockHash, Block>,
    /// Best chain hashes, indexed by height.
    best_chain: Vec<BlockHash>,
    orphans: HashMap<BlockHash, Block>,
}

impl Default for ChainTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainTracker {
    /// Create a tracker holding only the shared genesis block.
    pub fn new() -> Self {
        let genesis = Block::genesis();
        let hash = genesis.hash();
        let mut blocks = HashMap::new();
        blocks.insert(hash, genesis);
        info!(genesis = %hash, "chain tracker initialized");
        Self {
            blocks,
            best_chain: vec![hash],
            orphans: HashMap::new(),
        }
    }

    pub fn best_height(&self) -> u64 {
        (self.best_chain.len() - 1) as u64
    }

    pub fn tip_hash(&self) -> BlockHash {
        self.best_chain[self.best_chain.len() - 1]
    }

    pub fn hash_at(&self, height: u64) -> Option<BlockHash> {
        usize::try_from(height)
            .ok()
            .and_then(|h| self.best_chain.get(h))
            .copied()
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Template for the next block on the tip.
    pub fn next_block(&self, timestamp: u64, nonce: u64) -> Block {
        Block {
            height: self.best_height() + 1,
            parent: self.tip_hash(),
            timestamp,
            nonce,
        }
    }

    /// Best-chain blocks above `height`, provided `hash` is our block at that
    /// height. Returns nothing if the locator is not on our best chain.
    pub fn blocks_after(&self, height: u64, hash: &BlockHash, limit: usize) -> Vec<Block> {
        if self.hash_at(height).as_ref() != Some(hash) {
            return Vec::new();
        }
        (height + 1..=self.best_height())
            .take(limit)
            .filter_map(|h| self.hash_at(h))
            .filter_map(|h| self.blocks.get(&h).cloned())
            .collect()
    }

    pub fn accept_block(&mut self, block: Block) -> Result<Accepted, ChainError> {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) || self.orphans.contains_key(&hash) {
            return Ok(Accepted::without_connect(BlockStatus::Duplicate));
        }

        if !self.blocks.contains_key(&block.parent) {
            self.add_orphan(hash, block);
            return Ok(Accepted::without_connect(BlockStatus::Orphan));
        }

        let mut connected = Vec::new();
        let status = self.attach(hash, block, &mut connected)?;

        // Resolve orphans whose ancestry is now complete.
        let mut pending = vec![hash];
        while let Some(parent_hash) = pending.pop() {
            let children: Vec<BlockHash> = self
                .orphans
                .iter()
                .filter(|(_, b)| b.parent == parent_hash)
                .map(|(h, _)| *h)
                .collect();
            for child_hash in children {
                let Some(child) = self.orphans.remove(&child_hash) else {
                    continue;
                };
                match self.attach(child_hash, child, &mut connected) {
                    Ok(_) => pending.push(child_hash),
                    Err(e) => debug!(hash = %child_hash, err = %e, "dropping invalid orphan"),
                }
            }
        }

        Ok(Accepted { status, connected })
    }

    fn attach(
        &mut self,
        hash: BlockHash,
        block: Block,
        connected: &mut Vec<Block>,
    ) -> Result<BlockStatus, ChainError> {
        let parent_height = self
            .blocks
            .get(&block.parent)
            .map(|p| p.height)
            .ok_or(ChainError::UnknownParent(block.parent))?;

        if block.height != parent_height + 1 {
            return Err(ChainError::BadHeight {
                expected: parent_height + 1,
                got: block.height,
            });
        }

        let extends_tip = block.parent == self.tip_hash();
        self.blocks.insert(hash, block.clone());
        if extends_tip {
            self.best_chain.push(hash);
            connected.push(block);
            Ok(BlockStatus::Connected)
        } else {
            debug!(height = block.height, hash = %hash, "stored side-chain block");
            Ok(BlockStatus::SideChain)
        }
    }

    fn add_orphan(&mut self, hash: BlockHash, block: Block) {
        if self.orphans.len() >= MAX_ORPHANS {
            if let Some(evict) = self.orphans.keys().next().copied() {
                self.orphans.remove(&evict);
            }
        }
        debug!(height = block.height, hash = %hash, "holding orphan block");
        self.orphans.insert(hash, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extend(t: &mut ChainTracker, nonce: u64) -> Block {
        let b = t.next_block(1_000 + t.best_height(), nonce);
        let accepted = t.accept_block(b.clone()).unwrap();
        assert_eq!(accepted.status, BlockStatus::Connected);
        b
    }

    /// Build `n` blocks on top of `parent` without inserting them.
    fn build_on(parent: &Block, n: u64, nonce: u64) -> Vec<Block> {
        let mut out = Vec::new();
        let mut prev = parent.clone();
        for _ in 0..n {
            let b = Block {
                height: prev.height + 1,
                parent: prev.hash(),
                timestamp: prev.timestamp + 1,
                nonce,
            };
            out.push(b.clone());
            prev = b;
        }
        out
    }

    #[test]
    fn test_new_tracker_at_genesis() {
        let t = ChainTracker::new();
        assert_eq!(t.best_height(), 0);
        assert_eq!(t.tip_hash(), Block::genesis().hash());
        assert_eq!(t.hash_at(0), Some(Block::genesis().hash()));
        assert_eq!(t.hash_at(1), None);
    }

    #[test]
    fn test_extend_tip() {
        let mut t = ChainTracker::new();
        for i in 0..5 {
            extend(&mut t, i);
        }
        assert_eq!(t.best_height(), 5);
    }

    #[test]
    fn test_duplicate_is_ignored() {
        let mut t = ChainTracker::new();
        let b = extend(&mut t, 1);
        let again = t.accept_block(b).unwrap();
        assert_eq!(again.status, BlockStatus::Duplicate);
        assert!(again.connected.is_empty());
        assert_eq!(t.best_height(), 1);
    }

    #[test]
    fn test_orphans_connect_in_order() {
        let mut t = ChainTracker::new();
        let blocks = build_on(&Block::genesis(), 4, 7);

        // Deliver 4, 3, 2 first: all orphans
        for b in blocks[1..].iter().rev() {
            let a = t.accept_block(b.clone()).unwrap();
            assert_eq!(a.status, BlockStatus::Orphan);
        }
        assert_eq!(t.orphan_count(), 3);

        let a = t.accept_block(blocks[0].clone()).unwrap();
        assert_eq!(a.status, BlockStatus::Connected);
        let heights: Vec<u64> = a.connected.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![1, 2, 3, 4]);
        assert_eq!(t.best_height(), 4);
        assert_eq!(t.orphan_count(), 0);
    }

    #[test]
    fn test_side_chain_does_not_move_tip() {
        let mut t = ChainTracker::new();
        let main = build_on(&Block::genesis(), 3, 1);
        for b in &main {
            t.accept_block(b.clone()).unwrap();
        }
        let side = build_on(&main[0], 5, 2);
        for b in &side {
            let a = t.accept_block(b.clone()).unwrap();
            assert_eq!(a.status, BlockStatus::SideChain);
            assert!(a.connected.is_empty());
        }
        // Longer side chain is stored but never adopted
        assert_eq!(t.best_height(), 3);
        assert_eq!(t.tip_hash(), main[2].hash());
    }

    #[test]
    fn test_bad_height_rejected() {
        let mut t = ChainTracker::new();
        let bad = Block {
            height: 5,
            parent: Block::genesis().hash(),
            timestamp: 1,
            nonce: 0,
        };
        assert!(matches!(
            t.accept_block(bad),
            Err(ChainError::BadHeight {
                expected: 1,
                got: 5
            })
        ));
    }

    #[test]
    fn test_blocks_after_locator() {
        let mut t = ChainTracker::new();
        for i in 0..10 {
            extend(&mut t, i);
        }
        let locator = t.hash_at(4).unwrap();
        let after = t.blocks_after(4, &locator, 3);
        let heights: Vec<u64> = after.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![5, 6, 7]);

        // Unknown locator yields nothing
        assert!(t.blocks_after(4, &BlockHash([0xEE; 32]), 100).is_empty());
        // Locator at tip yields nothing
        assert!(t.blocks_after(10, &t.tip_hash(), 100).is_empty());
    }

    #[test]
    fn test_orphan_pool_is_bounded() {
        let mut t = ChainTracker::new();
        for i in 0..(MAX_ORPHANS as u64 + 10) {
            let b = Block {
                height: 50,
                parent: BlockHash([0x11; 32]),
                timestamp: i,
                nonce: i,
            };
            t.accept_block(b).unwrap();
        }
        assert_eq!(t.orphan_count(), MAX_ORPHANS);
    }
}
