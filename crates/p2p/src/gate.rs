//! Network identity gate.
//!
//! Selects the tag stamped on outbound frames and decides, per inbound frame
//! and per handshake, whether the remote identity is acceptable. Every
//! decision reads the fork latch exactly once so a frame is judged against a
//! single consistent tag.

use std::sync::Arc;

use forks::{ForkStateTracker, NetworkMagic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeDecision {
    Accept,
    Reject { local: NetworkMagic },
}

/// Verdict for one inbound post-handshake frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Tag matches our current identity.
    Current,
    /// Postfork-tagged block that would activate this still-dormant node.
    /// Lets the node cross the fork on the block that triggers it.
    CatchUp,
    /// Foreign tag; drop the frame.
    Mismatch,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        !matches!(self, Admission::Mismatch)
    }
}

#[derive(Clone)]
pub struct NetworkIdentityGate {
    tracker: Arc<ForkStateTracker>,
}

impl NetworkIdentityGate {
    pub fn new(tracker: Arc<ForkStateTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Arc<ForkStateTracker> {
        &self.tracker
    }

    /// Tag for the next outbound frame.
    pub fn current_tag(&self) -> NetworkMagic {
        self.tracker.current_magic()
    }

    /// Peers are only admitted when they present our current tag.
    pub fn on_handshake(&self, peer_tag: NetworkMagic) -> HandshakeDecision {
        let local = self.current_tag();
        if peer_tag == local {
            HandshakeDecision::Accept
        } else {
            HandshakeDecision::Reject { local }
        }
    }

    /// Judge an inbound frame by its tag. `block_height` is the height of the
    /// carried block when the frame is a block announcement.
    pub fn admit(&self, tag: NetworkMagic, block_height: Option<u64>) -> Admission {
        let active = self.tracker.is_active();
        let magics = self.tracker.magics();
        if tag == magics.select(active) {
            return Admission::Current;
        }
        match block_height {
            Some(height)
                if !active
                    && tag == magics.postfork()
                    && self.tracker.config().is_active_at(height) =>
            {
                Admission::CatchUp
            }
            _ => Admission::Mismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forks::{ForkConfig, MagicPair, POSTFORK_MAGIC, PREFORK_MAGIC};

    fn gate(trigger: u64) -> NetworkIdentityGate {
        NetworkIdentityGate::new(Arc::new(ForkStateTracker::new(
            ForkConfig::new(trigger),
            MagicPair::default(),
        )))
    }

    #[test]
    fn test_tag_follows_latch() {
        let g = gate(100);
        assert_eq!(g.current_tag(), PREFORK_MAGIC);
        g.tracker().on_block_connected(100);
        assert_eq!(g.current_tag(), POSTFORK_MAGIC);
    }

    #[test]
    fn test_handshake_requires_current_tag() {
        let g = gate(100);
        assert_eq!(g.on_handshake(PREFORK_MAGIC), HandshakeDecision::Accept);
        assert_eq!(
            g.on_handshake(POSTFORK_MAGIC),
            HandshakeDecision::Reject {
                local: PREFORK_MAGIC
            }
        );

        g.tracker().on_block_connected(150);
        assert_eq!(g.on_handshake(POSTFORK_MAGIC), HandshakeDecision::Accept);
        assert!(matches!(
            g.on_handshake(PREFORK_MAGIC),
            HandshakeDecision::Reject { .. }
        ));
    }

    #[test]
    fn test_admit_current_and_foreign() {
        let g = gate(100);
        assert_eq!(g.admit(PREFORK_MAGIC, None), Admission::Current);
        assert_eq!(g.admit(POSTFORK_MAGIC, None), Admission::Mismatch);
        assert_eq!(
            g.admit(NetworkMagic([1, 2, 3, 4]), Some(500)),
            Admission::Mismatch
        );
    }

    #[test]
    fn test_catch_up_only_for_triggering_blocks() {
        let g = gate(100);
        assert_eq!(g.admit(POSTFORK_MAGIC, Some(99)), Admission::Mismatch);
        assert_eq!(g.admit(POSTFORK_MAGIC, Some(100)), Admission::CatchUp);

        let far = gate(999_999);
        assert_eq!(far.admit(POSTFORK_MAGIC, Some(100)), Admission::Mismatch);
    }

    #[test]
    fn test_active_node_drops_prefork_frames() {
        let g = gate(100);
        g.tracker().on_block_connected(100);
        assert_eq!(g.admit(POSTFORK_MAGIC, Some(101)), Admission::Current);
        assert_eq!(g.admit(PREFORK_MAGIC, Some(101)), Admission::Mismatch);
        assert_eq!(g.admit(PREFORK_MAGIC, None), Admission::Mismatch);
    }
}
