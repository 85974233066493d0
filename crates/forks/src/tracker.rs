use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, warn};

use crate::marker::ForkMarker;
use crate::params::{MagicPair, NetworkMagic};
use crate::schedule::ForkConfig;

/// Details of a genuine in-run Dormant → Active transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkActivation {
    pub height: u64,
    pub trigger_height: u64,
    pub magic: NetworkMagic,
}

/// Subscriber for fork lifecycle events.
///
/// Callbacks run inside the transition window with the tracker's writer lock
/// held, so they must be O(1) and must not call back into the tracker.
pub trait ForkObserver: Send + Sync {
    /// The fork activated during this process' lifetime. Fires at most once.
    fn on_activation(&self, activation: &ForkActivation);

    /// A marker from a previous run was found at startup. Never paired with
    /// `on_activation` in the same process.
    fn on_prior_marker_detected(&self, marker: &ForkMarker, magic: NetworkMagic);
}

/// Result of feeding a height (or a marker) to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still dormant.
    Unchanged,
    /// This call performed the one-time activation actions.
    Activated { height: u64 },
    /// Latched from a persisted marker at startup.
    RestoredFromMarker,
    /// Latch was already set; nothing to do.
    AlreadyActive,
}

/// Point-in-time view of the fork state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkState {
    pub active: bool,
    pub prior_marker_observed: bool,
    pub activation_actions_performed: bool,
    pub activation_height: Option<u64>,
    pub trigger_height: u64,
}

#[derive(Default)]
struct Latch {
    prior_marker_observed: bool,
    activation_actions_performed: bool,
    activation_height: Option<u64>,
}

/// Latched fork state machine: `Dormant → Active`, never back.
///
/// `active` is read lock-free. The transition itself runs under `latch`,
/// so only one caller ever performs the activation actions.
pub struct ForkStateTracker {
    config: ForkConfig,
    magics: MagicPair,
    active: AtomicBool,
    latch: Mutex<Latch>,
    observers: RwLock<Vec<Arc<dyn ForkObserver>>>,
}

impl ForkStateTracker {
    pub fn new(config: ForkConfig, magics: MagicPair) -> Self {
        Self {
            config,
            magics,
            active: AtomicBool::new(false),
            latch: Mutex::new(Latch::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> ForkConfig {
        self.config
    }

    pub fn magics(&self) -> MagicPair {
        self.magics
    }

    pub fn add_observer(&self, observer: Arc<dyn ForkObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Whether the fork latch is set.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Identity tag derived from the latch.
    pub fn current_magic(&self) -> NetworkMagic {
        self.magics.select(self.is_active())
    }

    pub fn snapshot(&self) -> ForkState {
        let latch = self.lock_latch();
        ForkState {
            active: self.is_active(),
            prior_marker_observed: latch.prior_marker_observed,
            activation_actions_performed: latch.activation_actions_performed,
            activation_height: latch.activation_height,
            trigger_height: self.config.trigger_height,
        }
    }

    /// Evaluate startup state. The marker is consulted before height.
    ///
    /// `best_height` is `None` while the chain engine is not initialised;
    /// the decision is then deferred to the first block-connect.
    pub fn startup(&self, best_height: Option<u64>, marker: Option<&ForkMarker>) -> Transition {
        let mut latch = self.lock_latch();
        if self.is_active() {
            return Transition::AlreadyActive;
        }

        if let Some(marker) = marker {
            if marker.trigger_height != self.config.trigger_height {
                warn!(
                    marker_trigger = marker.trigger_height,
                    configured_trigger = self.config.trigger_height,
                    "fork marker was written under a different trigger height"
                );
            }
            latch.prior_marker_observed = true;
            latch.activation_actions_performed = true;
            latch.activation_height = Some(marker.activation_height);
            self.active.store(true, Ordering::Release);

            let magic = self.magics.postfork();
            for observer in self.observers_snapshot() {
                observer.on_prior_marker_detected(marker, magic);
            }
            return Transition::RestoredFromMarker;
        }

        match best_height {
            Some(height) => self.try_activate(&mut latch, height),
            None => {
                debug!("best height unknown at startup, deferring fork evaluation");
                Transition::Unchanged
            }
        }
    }

    /// Re-evaluate after a block was connected at `height`.
    ///
    /// Must be called before the block is announced to anyone else so the
    /// latch and tag are consistent with the height observers can see.
    pub fn on_block_connected(&self, height: u64) -> Transition {
        if self.is_active() {
            return Transition::AlreadyActive;
        }
        let mut latch = self.lock_latch();
        self.try_activate(&mut latch, height)
    }

    fn try_activate(&self, latch: &mut Latch, height: u64) -> Transition {
        // Re-check under the lock: a racing caller may have won.
        if self.is_active() || latch.activation_actions_performed {
            return Transition::AlreadyActive;
        }
        if !self.config.is_active_at(height) {
            return Transition::Unchanged;
        }

        self.active.store(true, Ordering::Release);
        latch.activation_height = Some(height);

        let activation = ForkActivation {
            height,
            trigger_height: self.config.trigger_height,
            magic: self.magics.postfork(),
        };
        for observer in self.observers_snapshot() {
            observer.on_activation(&activation);
        }

        latch.activation_actions_performed = true;
        Transition::Activated { height }
    }

    fn lock_latch(&self) -> MutexGuard<'_, Latch> {
        self.latch.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn observers_snapshot(&self) -> Vec<Arc<dyn ForkObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
