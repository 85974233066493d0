//! Log adapter for fork events and subscriber setup.
//!
//! Operators and test harnesses grep for the `MVF:` records and the
//! `isMVFHardForkActive=` flag, so their text is fixed.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use chain::{Block, BlockHash};
use forks::{ForkActivation, ForkMarker, ForkObserver, NetworkMagic};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Turns tracker events into the greppable fork records.
pub struct LogObserver;

impl ForkObserver for LogObserver {
    fn on_activation(&self, activation: &ForkActivation) {
        info!(
            height = activation.height,
            trigger = activation.trigger_height,
            magic = %activation.magic,
            "MVF: performing fork activation actions"
        );
        info!(magic = %activation.magic, "MVF: enabling isMVFHardForkActive");
    }

    fn on_prior_marker_detected(&self, marker: &ForkMarker, magic: NetworkMagic) {
        info!(
            trigger = marker.trigger_height,
            activated_at = marker.activation_height,
            "MVF: found marker config file"
        );
        info!(magic = %magic, "MVF: enabling isMVFHardForkActive");
    }
}

/// Status line emitted whenever the best chain advances.
pub fn log_new_tip(block: &Block, hash: &BlockHash, active: bool) {
    info!(
        height = block.height,
        hash = %hash,
        "UpdateTip: new best={} height={} isMVFHardForkActive={}",
        hash,
        block.height,
        u8::from(active)
    );
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    use forks::{ForkConfig, ForkStateTracker, MagicPair};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture<F: FnOnce()>(f: F) -> String {
        let buf = Capture::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        buf.text()
    }

    fn tracker(trigger: u64) -> ForkStateTracker {
        let t = ForkStateTracker::new(ForkConfig::new(trigger), MagicPair::default());
        t.add_observer(Arc::new(LogObserver));
        t
    }

    #[test]
    fn test_activation_records_once() {
        let logs = capture(|| {
            let t = tracker(3);
            for h in 0..10 {
                t.on_block_connected(h);
            }
        });
        assert_eq!(logs.matches("MVF: performing fork activation actions").count(), 1);
        assert!(logs.contains("MVF: enabling isMVFHardForkActive"));
        assert!(!logs.contains("MVF: found marker config file"));
    }

    #[test]
    fn test_marker_path_records() {
        let logs = capture(|| {
            let t = tracker(3);
            let marker = ForkMarker {
                trigger_height: 3,
                activation_height: 3,
            };
            t.startup(Some(0), Some(&marker));
            t.on_block_connected(10);
        });
        assert!(logs.contains("MVF: found marker config file"));
        assert!(logs.contains("MVF: enabling isMVFHardForkActive"));
        assert!(!logs.contains("MVF: performing fork activation actions"));
    }

    #[test]
    fn test_dormant_node_is_silent() {
        let logs = capture(|| {
            let t = tracker(100);
            t.startup(Some(0), None);
            for h in 1..100 {
                t.on_block_connected(h);
            }
        });
        assert!(!logs.contains("MVF:"));
    }

    #[test]
    fn test_tip_line_flag() {
        let block = Block::genesis();
        let hash = block.hash();
        let logs = capture(|| {
            log_new_tip(&block, &hash, false);
            log_new_tip(&block, &hash, true);
        });
        assert!(logs.contains("isMVFHardForkActive=0"));
        assert!(logs.contains("isMVFHardForkActive=1"));
    }
}
