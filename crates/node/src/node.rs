use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use chain::{Block, BlockHash, BlockStatus, ChainError, ChainTracker};
use forks::marker::{load_marker, write_marker, MARKER_FILE_NAME};
use forks::{ForkConfig, ForkMarker, ForkStateTracker, Transition};
use p2p::{Admission, GetBlocks, NetworkIdentityGate, PeerEvent, PeerId, PeerInfo, PeerManager};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::logging::{log_new_tip, LogObserver};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("p2p error: {0}")]
    P2p(#[from] p2p::Error),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("node already started")]
    AlreadyStarted,
    #[error("generated block was not connected ({0:?})")]
    NotConnected(BlockStatus),
}

/// Fork status as reported over RPC.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkInfo {
    #[serde(rename = "isMVFHardForkActive")]
    pub active: bool,
    pub fork_height: u64,
    pub activation_height: Option<u64>,
    pub prior_marker_observed: bool,
    pub network_magic: String,
    pub best_height: u64,
}

/// Node orchestrator: owns the chain, the fork tracker and the peer manager,
/// and runs the P2P event loop.
pub struct Node {
    config: RuntimeConfig,
    tracker: Arc<ForkStateTracker>,
    chain: Mutex<ChainTracker>,
    peer_manager: Arc<PeerManager>,
    peer_rx: Mutex<Option<mpsc::Receiver<PeerEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    p2p_addr: OnceLock<SocketAddr>,
}

impl Node {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let tracker = Arc::new(ForkStateTracker::new(
            ForkConfig::new(config.fork_height),
            config.magics,
        ));
        tracker.add_observer(Arc::new(LogObserver));

        let gate = NetworkIdentityGate::new(tracker.clone());
        let (peer_manager, peer_rx) = PeerManager::new(gate, config.max_peers);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Node {
            config,
            tracker,
            chain: Mutex::new(ChainTracker::new()),
            peer_manager: Arc::new(peer_manager),
            peer_rx: Mutex::new(Some(peer_rx)),
            shutdown_tx,
            event_task: Mutex::new(None),
            p2p_addr: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Tracker driving this node's identity. Observers added before
    /// [`Node::start`] also see startup events.
    pub fn fork_tracker(&self) -> &Arc<ForkStateTracker> {
        &self.tracker
    }

    /// Bound P2P address, once started.
    pub fn p2p_addr(&self) -> Option<SocketAddr> {
        self.p2p_addr.get().copied()
    }

    fn marker_path(&self) -> PathBuf {
        self.config.datadir.join(MARKER_FILE_NAME)
    }

    /// Evaluate the fork state, start the P2P listener, dial configured peers
    /// and spawn the event loop.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, NodeError> {
        let peer_rx = self.peer_rx.lock().await.take().ok_or(NodeError::AlreadyStarted)?;

        info!(
            fork_height = self.config.fork_height,
            datadir = %self.config.datadir.display(),
            "starting mvf node"
        );

        let marker_path = self.marker_path();
        let marker = match load_marker(&marker_path) {
            Ok(marker) => marker,
            Err(e) => {
                warn!(path = %marker_path.display(), err = %e, "ignoring unreadable fork marker");
                None
            }
        };

        let best_height = self.chain.lock().await.best_height();
        match self.tracker.startup(Some(best_height), marker.as_ref()) {
            Transition::Activated { height } => self.persist_marker(height).await,
            Transition::RestoredFromMarker => {
                debug!(path = %marker_path.display(), "fork state restored from marker");
            }
            Transition::Unchanged | Transition::AlreadyActive => {}
        }
        self.peer_manager.set_best_height(best_height);

        let addr = self.peer_manager.start_listener(self.config.listen_addr).await?;
        let _ = self.p2p_addr.set(addr);

        for peer in &self.config.connect {
            info!(addr = %peer, "connecting to peer");
            self.peer_manager.connect_to(*peer).await;
        }

        let node = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            node.event_loop(peer_rx, shutdown_rx).await;
        });
        *self.event_task.lock().await = Some(task);

        info!(
            addr = %addr,
            active = self.tracker.is_active(),
            magic = %self.tracker.current_magic(),
            "node initialized, entering main loop"
        );
        Ok(addr)
    }

    /// Dial a peer in the background.
    pub async fn connect(&self, addr: SocketAddr) {
        self.peer_manager.connect_to(addr).await;
    }

    /// Mine `count` blocks on the local tip and announce each one.
    pub async fn generate(&self, count: u64) -> Result<Vec<BlockHash>, NodeError> {
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (block, activated) = {
                let mut chain = self.chain.lock().await;
                let parent_ts = chain.get(&chain.tip_hash()).map(|b| b.timestamp).unwrap_or(0);
                let block = chain.next_block(unix_now().max(parent_ts + 1), rand::random());
                let accepted = chain.accept_block(block.clone())?;
                if accepted.status != BlockStatus::Connected {
                    return Err(NodeError::NotConnected(accepted.status));
                }
                let activated = self.on_blocks_connected(&chain, &accepted.connected);
                (block, activated)
            };
            if let Some(height) = activated {
                self.persist_marker(height).await;
            }
            hashes.push(block.hash());
            self.peer_manager.broadcast_block(&block, None).await;
        }
        Ok(hashes)
    }

    pub async fn block_count(&self) -> u64 {
        self.chain.lock().await.best_height()
    }

    pub async fn best_block_hash(&self) -> BlockHash {
        self.chain.lock().await.tip_hash()
    }

    /// Fork state and best height read under the chain lock, so the flag
    /// always agrees with the reported height.
    pub async fn fork_info(&self) -> ForkInfo {
        let chain = self.chain.lock().await;
        let state = self.tracker.snapshot();
        ForkInfo {
            active: state.active,
            fork_height: state.trigger_height,
            activation_height: state.activation_height,
            prior_marker_observed: state.prior_marker_observed,
            network_magic: self.tracker.current_magic().to_string(),
            best_height: chain.best_height(),
        }
    }

    pub async fn peer_info(&self) -> Vec<PeerInfo> {
        self.peer_manager.peers().await
    }

    pub async fn connection_count(&self) -> usize {
        self.peer_manager.peer_count().await
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.peer_manager.shutdown().await;
        if let Some(task) = self.event_task.lock().await.take() {
            task.abort();
        }
        info!("node stopped");
    }

    /// Run until Ctrl+C: start P2P, serve RPC, then shut down.
    pub async fn run(self: &Arc<Self>) -> Result<(), NodeError> {
        self.start().await?;

        let listener = tokio::net::TcpListener::bind(self.config.rpc_addr).await?;
        let node = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = crate::rpc::serve_rpc(node, listener).await {
                error!(err = %e, "RPC server failed");
            }
        });

        info!("node is running (Ctrl+C to stop)");
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(err = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");

        self.shutdown().await;
        Ok(())
    }

    async fn event_loop(
        self: Arc<Self>,
        mut peer_rx: mpsc::Receiver<PeerEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                Some(event) = peer_rx.recv() => self.handle_event(event).await,
                _ = shutdown_rx.changed() => break,
            }
        }
    }

    async fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Connected {
                peer_id,
                addr,
                inbound,
                best_height,
                user_agent,
            } => {
                let peers = self.peer_manager.peer_count().await;
                debug!(
                    peer = peer_id,
                    addr = %addr,
                    inbound,
                    agent = %user_agent,
                    peers,
                    "peer session established"
                );
                let (ours, tip) = {
                    let chain = self.chain.lock().await;
                    (chain.best_height(), chain.tip_hash())
                };
                if best_height > ours {
                    self.request_from(peer_id, ours, tip).await;
                }
            }
            PeerEvent::Disconnected { peer_id, reason } => {
                let peers = self.peer_manager.peer_count().await;
                debug!(peer = peer_id, reason = %reason, peers, "peer disconnected");
            }
            PeerEvent::Block {
                peer_id,
                block,
                admission,
            } => {
                if admission == Admission::CatchUp {
                    info!(
                        peer = peer_id,
                        height = block.height,
                        "accepting postfork block at our trigger height"
                    );
                }
                self.process_block(block, peer_id, admission).await;
            }
            PeerEvent::GetBlocks { peer_id, request } => {
                crate::server::serve_get_blocks(&self.peer_manager, &self.chain, peer_id, request)
                    .await;
            }
        }
    }

    async fn process_block(&self, block: Block, source: PeerId, admission: Admission) {
        let hash = block.hash();
        let (accepted, activated, ours, tip) = {
            let mut chain = self.chain.lock().await;
            let accepted = match chain.accept_block(block) {
                Ok(a) => a,
                Err(e) => {
                    debug!(peer = source, hash = %hash, err = %e, "rejected block");
                    return;
                }
            };
            let activated = self.on_blocks_connected(&chain, &accepted.connected);
            (accepted, activated, chain.best_height(), chain.tip_hash())
        };

        if let Some(height) = activated {
            self.persist_marker(height).await;
        }

        if accepted.status == BlockStatus::Orphan {
            if admission == Admission::CatchUp {
                // A request under our prefork tag would be dropped by the
                // postfork sender and count against the session.
                debug!(
                    peer = source,
                    hash = %hash,
                    "postfork orphan, not requesting its ancestry"
                );
            } else {
                // Missing ancestry; ask the sender for what follows our tip.
                self.request_from(source, ours, tip).await;
            }
        }

        for connected in &accepted.connected {
            self.peer_manager
                .broadcast_block(connected, Some(source))
                .await;
        }
    }

    /// Fork evaluation and tip bookkeeping for newly connected blocks. Runs
    /// under the chain lock, before any of them is relayed. Returns the
    /// activation height when one of the blocks activated the fork; the
    /// marker is written after the lock is released.
    fn on_blocks_connected(&self, chain: &ChainTracker, connected: &[Block]) -> Option<u64> {
        let mut activated = None;
        for block in connected {
            if let Transition::Activated { height } = self.tracker.on_block_connected(block.height)
            {
                activated = Some(height);
            }
            self.peer_manager.set_best_height(block.height);
            let hash = chain.hash_at(block.height).unwrap_or_else(|| block.hash());
            log_new_tip(block, &hash, self.tracker.is_active());
        }
        activated
    }

    async fn persist_marker(&self, activation_height: u64) {
        let marker = ForkMarker {
            trigger_height: self.config.fork_height,
            activation_height,
        };
        let path = self.marker_path();
        let target = path.clone();
        match tokio::task::spawn_blocking(move || write_marker(&target, &marker)).await {
            Ok(Ok(())) => debug!(path = %path.display(), "wrote fork marker"),
            Ok(Err(e)) => warn!(path = %path.display(), err = %e, "failed to write fork marker"),
            Err(e) => warn!(err = %e, "fork marker write task failed"),
        }
    }

    async fn request_from(&self, peer_id: PeerId, height: u64, hash: BlockHash) {
        let queued = self
            .peer_manager
            .request_blocks(peer_id, GetBlocks { height, hash })
            .await;
        if queued {
            debug!(peer = peer_id, from = height, "requested blocks");
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
