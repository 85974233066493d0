#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use forks::{ForkActivation, ForkMarker, ForkObserver, MagicPair, NetworkMagic};
use mvf_node::{Node, RuntimeConfig};

pub fn config(fork_height: u64, datadir: &Path) -> RuntimeConfig {
    RuntimeConfig {
        fork_height,
        datadir: datadir.to_path_buf(),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        connect: Vec::new(),
        max_peers: 8,
        rpc_addr: "127.0.0.1:0".parse().unwrap(),
        magics: MagicPair::default(),
        log_level: "info".to_string(),
        log_file: None,
    }
}

/// Counts tracker events; stands in for grepping the node's log.
#[derive(Default)]
pub struct EventCounter {
    pub activations: AtomicUsize,
    pub markers: AtomicUsize,
}

impl EventCounter {
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn markers(&self) -> usize {
        self.markers.load(Ordering::SeqCst)
    }
}

impl ForkObserver for EventCounter {
    fn on_activation(&self, _activation: &ForkActivation) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }

    fn on_prior_marker_detected(&self, _marker: &ForkMarker, _magic: NetworkMagic) {
        self.markers.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build and start a node with an event counter attached before startup.
pub async fn start_node(fork_height: u64, datadir: &Path) -> (Arc<Node>, Arc<EventCounter>) {
    let node = Node::new(config(fork_height, datadir));
    let counter = Arc::new(EventCounter::default());
    node.fork_tracker().add_observer(counter.clone());
    node.start().await.expect("node failed to start");
    (node, counter)
}

/// Poll `check` until it returns true, panicking after 15 seconds.
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub async fn wait_for_height(node: &Arc<Node>, height: u64) {
    let n = node.clone();
    wait_for(&format!("height {}", height), move || {
        let n = n.clone();
        async move { n.block_count().await == height }
    })
    .await;
}

pub async fn wait_for_connections(node: &Arc<Node>, count: usize) {
    let n = node.clone();
    wait_for(&format!("{} connections", count), move || {
        let n = n.clone();
        async move { n.connection_count().await == count }
    })
    .await;
}
