/// Per-node hard fork configuration.
///
/// Nodes are not required to agree on `trigger_height`; two nodes with
/// different values split into separate networks once one of them crosses
/// its own threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkConfig {
    pub trigger_height: u64,
}

impl ForkConfig {
    pub fn new(trigger_height: u64) -> Self {
        Self { trigger_height }
    }

    /// Returns true if the fork is active for a chain whose best block is at `height`.
    pub fn is_active_at(&self, height: u64) -> bool {
        is_active(height, self.trigger_height)
    }
}

/// Returns true if the fork is active at the given best height.
///
/// Inclusive: the block at `trigger_height` is the first post-fork block.
/// Only locally validated height participates, so two nodes at the same tip
/// with the same trigger always agree.
pub fn is_active(best_height: u64, trigger_height: u64) -> bool {
    best_height >= trigger_height
}
