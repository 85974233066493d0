use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chain::Block;
use forks::NetworkMagic;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::constants::{
    CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT, MAX_MISMATCHED_FRAMES, PING_INTERVAL, PROTOCOL_VERSION,
    READ_TIMEOUT, USER_AGENT,
};
use crate::error::Error;
use crate::gate::{Admission, NetworkIdentityGate};
use crate::handshake::perform_handshake;
use crate::message::{self, GetBlocks, Message, VersionMessage};
use crate::session::Session;
use crate::types::{PeerId, PeerInfo};

#[derive(Debug)]
pub enum PeerEvent {
    Connected {
        peer_id: PeerId,
        addr: SocketAddr,
        inbound: bool,
        best_height: u64,
        user_agent: String,
    },
    Disconnected {
        peer_id: PeerId,
        reason: String,
    },
    Block {
        peer_id: PeerId,
        block: Block,
        admission: Admission,
    },
    GetBlocks {
        peer_id: PeerId,
        request: GetBlocks,
    },
}

#[derive(Debug)]
pub enum PeerCommand {
    /// Send a pre-encoded payload under the tag that was current when the
    /// node produced it.
    SendRaw {
        magic: NetworkMagic,
        command: &'static str,
        payload: Arc<Vec<u8>>,
    },
    Disconnect,
}

/// Liveness timers for established sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub ping_interval: Duration,
    /// A session is closed when no frame arrives for this long.
    pub read_timeout: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            read_timeout: READ_TIMEOUT,
        }
    }
}

struct PeerHandle {
    cmd_tx: mpsc::Sender<PeerCommand>,
    info: PeerInfo,
}

/// State shared between the manager and every session task.
struct PeerContext {
    gate: NetworkIdentityGate,
    nonce: u64,
    listen_port: AtomicU16,
    best_height: AtomicU64,
    max_peers: usize,
    timings: SessionTimings,
    next_peer_id: AtomicU64,
    active_peers: RwLock<HashMap<PeerId, PeerHandle>>,
    event_tx: mpsc::Sender<PeerEvent>,
}

impl PeerContext {
    fn local_version(&self) -> VersionMessage {
        VersionMessage {
            protocol_version: PROTOCOL_VERSION,
            nonce: self.nonce,
            best_height: self.best_height.load(Ordering::Relaxed),
            listen_port: self.listen_port.load(Ordering::Relaxed),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

pub struct PeerManager {
    ctx: Arc<PeerContext>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerManager {
    pub fn new(gate: NetworkIdentityGate, max_peers: usize) -> (Self, mpsc::Receiver<PeerEvent>) {
        Self::with_timings(gate, max_peers, SessionTimings::default())
    }

    pub fn with_timings(
        gate: NetworkIdentityGate,
        max_peers: usize,
        timings: SessionTimings,
    ) -> (Self, mpsc::Receiver<PeerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);

        let ctx = PeerContext {
            gate,
            nonce: rand::random(),
            listen_port: AtomicU16::new(0),
            best_height: AtomicU64::new(0),
            max_peers,
            timings,
            next_peer_id: AtomicU64::new(1),
            active_peers: RwLock::new(HashMap::new()),
            event_tx,
        };

        let manager = PeerManager {
            ctx: Arc::new(ctx),
            listener_task: Mutex::new(None),
        };

        (manager, event_rx)
    }

    pub fn gate(&self) -> &NetworkIdentityGate {
        &self.ctx.gate
    }

    /// Bind and start accepting peers. Returns the bound address.
    pub async fn start_listener(&self, addr: SocketAddr) -> Result<SocketAddr, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Io(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        self.ctx.listen_port.store(local_addr.port(), Ordering::Relaxed);

        info!(addr = %local_addr, "P2P TCP listener started");

        let ctx = self.ctx.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let peer_count = ctx.active_peers.read().await.len();
                        if peer_count >= ctx.max_peers {
                            debug!(addr = %addr, "rejecting connection, max peers reached");
                            continue;
                        }
                        debug!(addr = %addr, "incoming connection");
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, addr, true, ctx).await;
                        });
                    }
                    Err(e) => {
                        warn!(err = %e, "accept failed");
                    }
                }
            }
        });

        *self.listener_task.lock().await = Some(task);
        Ok(local_addr)
    }

    /// Dial `addr` in the background. Failures are logged, not returned.
    pub async fn connect_to(&self, addr: SocketAddr) {
        let peer_count = self.ctx.active_peers.read().await.len();
        if peer_count >= self.ctx.max_peers {
            return;
        }

        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => handle_connection(stream, addr, false, ctx).await,
                Ok(Err(e)) => debug!(addr = %addr, err = %e, "outbound connection failed"),
                Err(_) => debug!(addr = %addr, "outbound connection timed out"),
            }
        });
    }

    pub async fn peer_count(&self) -> usize {
        self.ctx.active_peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        let peers = self.ctx.active_peers.read().await;
        let mut out: Vec<PeerInfo> = peers.values().map(|h| h.info.clone()).collect();
        out.sort_by_key(|p| p.id);
        out
    }

    /// Height advertised in `version` to new peers.
    pub fn set_best_height(&self, height: u64) {
        self.ctx.best_height.store(height, Ordering::Relaxed);
    }

    /// Send a command to a specific peer. Returns true if the command was queued.
    pub async fn send_command(&self, peer_id: PeerId, cmd: PeerCommand) -> bool {
        let peers = self.ctx.active_peers.read().await;
        if let Some(handle) = peers.get(&peer_id) {
            handle.cmd_tx.try_send(cmd).is_ok()
        } else {
            false
        }
    }

    /// Announce a block to every peer except `exclude`.
    pub async fn broadcast_block(&self, block: &Block, exclude: Option<PeerId>) {
        let magic = self.ctx.gate.current_tag();
        let payload = Arc::new(block.encode());
        let peers = self.ctx.active_peers.read().await;
        let mut sent = 0usize;
        for (id, handle) in peers.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if handle
                .cmd_tx
                .try_send(PeerCommand::SendRaw {
                    magic,
                    command: message::BLOCK,
                    payload: Arc::clone(&payload),
                })
                .is_ok()
            {
                sent += 1;
            }
        }
        drop(peers);

        debug!(height = block.height, peers = sent, "broadcast block to peers");
    }

    /// Queue a batch of blocks for one peer without blocking the caller.
    pub async fn send_blocks(&self, peer_id: PeerId, blocks: Vec<Block>) {
        let cmd_tx = {
            let peers = self.ctx.active_peers.read().await;
            match peers.get(&peer_id) {
                Some(handle) => handle.cmd_tx.clone(),
                None => return,
            }
        };
        let magic = self.ctx.gate.current_tag();
        tokio::spawn(async move {
            for block in blocks {
                let cmd = PeerCommand::SendRaw {
                    magic,
                    command: message::BLOCK,
                    payload: Arc::new(block.encode()),
                };
                if cmd_tx.send(cmd).await.is_err() {
                    break;
                }
            }
        });
    }

    pub async fn request_blocks(&self, peer_id: PeerId, request: GetBlocks) -> bool {
        let payload = Message::GetBlocks(request).encode_payload();
        self.send_command(
            peer_id,
            PeerCommand::SendRaw {
                magic: self.ctx.gate.current_tag(),
                command: message::GETBLOCKS,
                payload: Arc::new(payload),
            },
        )
        .await
    }

    /// Stop accepting, ask every session to close and wait briefly for them to drain.
    pub async fn shutdown(&self) {
        if let Some(task) = self.listener_task.lock().await.take() {
            task.abort();
        }

        let peers = self.ctx.active_peers.read().await;
        let count = peers.len();
        for handle in peers.values() {
            let _ = handle.cmd_tx.try_send(PeerCommand::Disconnect);
        }
        drop(peers);

        if count > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            info!(peers = count, "disconnected all peers");
        }
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, inbound: bool, ctx: Arc<PeerContext>) {
    let mut session = Session::new(stream, addr);
    let local = ctx.local_version();

    let outcome = match timeout(
        HANDSHAKE_TIMEOUT,
        perform_handshake(&mut session, &ctx.gate, &local),
    )
    .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(Error::MagicMismatch { local, remote })) => {
            info!(
                addr = %addr,
                local = %local,
                remote = %remote,
                "rejecting peer on a different network"
            );
            return;
        }
        Ok(Err(e)) => {
            debug!(addr = %addr, inbound, err = %e, "handshake failed");
            return;
        }
        Err(_) => {
            debug!(addr = %addr, inbound, "handshake timed out");
            return;
        }
    };

    let peer_id = ctx.next_peer_id.fetch_add(1, Ordering::Relaxed);
    let info = PeerInfo {
        id: peer_id,
        addr,
        inbound,
        handshake_magic: outcome.magic,
        best_height: outcome.remote.best_height,
        user_agent: outcome.remote.user_agent.clone(),
    };

    // Register peer with command channel
    let (cmd_tx, cmd_rx) = mpsc::channel::<PeerCommand>(256);
    {
        let mut peers = ctx.active_peers.write().await;
        if peers.len() >= ctx.max_peers {
            debug!(addr = %addr, "dropping peer, max peers reached");
            return;
        }
        peers.insert(peer_id, PeerHandle { cmd_tx, info });
    }

    info!(
        peer = peer_id,
        addr = %addr,
        inbound,
        agent = %outcome.remote.user_agent,
        height = outcome.remote.best_height,
        "peer connected"
    );

    if ctx
        .event_tx
        .send(PeerEvent::Connected {
            peer_id,
            addr,
            inbound,
            best_height: outcome.remote.best_height,
            user_agent: outcome.remote.user_agent,
        })
        .await
        .is_err()
    {
        warn!("event channel closed");
        ctx.active_peers.write().await.remove(&peer_id);
        return;
    }

    let reason = run_peer_session(&mut session, peer_id, cmd_rx, &ctx).await;

    // Cleanup
    ctx.active_peers.write().await.remove(&peer_id);

    if ctx
        .event_tx
        .send(PeerEvent::Disconnected {
            peer_id,
            reason: reason.clone(),
        })
        .await
        .is_err()
    {
        warn!("event channel closed, cannot send Disconnected event");
    }

    debug!(peer = peer_id, addr = %addr, reason = %reason, "peer disconnected");
}

async fn run_peer_session(
    session: &mut Session,
    peer_id: PeerId,
    mut cmd_rx: mpsc::Receiver<PeerCommand>,
    ctx: &PeerContext,
) -> String {
    let read_timeout = ctx.timings.read_timeout;
    let mut ping_timer = interval(ctx.timings.ping_interval);
    ping_timer.tick().await; // skip first immediate tick

    // Only inbound frames push the deadline back; our own pings do not.
    let read_deadline = sleep(read_timeout);
    tokio::pin!(read_deadline);

    let mut mismatched: u32 = 0;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(PeerCommand::SendRaw { magic, command, payload }) => {
                        if let Err(e) = session.write_frame(magic, command, &payload).await {
                            break format!("send {} failed: {}", command, e);
                        }
                    }
                    Some(PeerCommand::Disconnect) | None => break "disconnect requested".to_string(),
                }
            }
            _ = ping_timer.tick() => {
                let ping = Message::Ping(rand::random()).encode_payload();
                if let Err(e) = session.write_frame(ctx.gate.current_tag(), message::PING, &ping).await {
                    break format!("ping send failed: {}", e);
                }
            }
            _ = &mut read_deadline => {
                break format!("read timeout ({}ms)", read_timeout.as_millis());
            }
            result = session.read_frame() => {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(e) => break e.to_string(),
                };
                read_deadline.as_mut().reset(Instant::now() + read_timeout);

                let block_height = if frame.command == message::BLOCK {
                    Block::peek_height(&frame.payload)
                } else {
                    None
                };
                let admission = ctx.gate.admit(frame.magic, block_height);
                if admission == Admission::Mismatch {
                    mismatched += 1;
                    debug!(
                        peer = peer_id,
                        command = %frame.command,
                        magic = %frame.magic,
                        count = mismatched,
                        "dropping frame with foreign network magic"
                    );
                    if mismatched >= MAX_MISMATCHED_FRAMES {
                        break format!("peer stayed on network {}", frame.magic);
                    }
                    continue;
                }
                mismatched = 0;

                let msg = match Message::decode(&frame.command, &frame.payload) {
                    Ok(m) => m,
                    Err(e) => break format!("bad {} message: {}", frame.command, e),
                };

                match msg {
                    Message::Ping(nonce) => {
                        let pong = Message::Pong(nonce).encode_payload();
                        if let Err(e) = session.write_frame(ctx.gate.current_tag(), message::PONG, &pong).await {
                            break format!("pong send failed: {}", e);
                        }
                    }
                    Message::Pong(_) => {
                        // Peer is alive, nothing to do
                    }
                    Message::Block(block) => {
                        if let Some(handle) = ctx.active_peers.write().await.get_mut(&peer_id) {
                            handle.info.best_height = handle.info.best_height.max(block.height);
                        }
                        if ctx.event_tx.send(PeerEvent::Block { peer_id, block, admission }).await.is_err() {
                            warn!("event channel closed");
                            break "event channel closed".to_string();
                        }
                    }
                    Message::GetBlocks(request) => {
                        if ctx.event_tx.send(PeerEvent::GetBlocks { peer_id, request }).await.is_err() {
                            warn!("event channel closed");
                            break "event channel closed".to_string();
                        }
                    }
                    Message::Version(_) | Message::Verack => {
                        debug!(peer = peer_id, "ignoring repeated handshake message");
                    }
                    Message::Unknown(command) => {
                        debug!(peer = peer_id, command = %command, "unknown message, ignoring");
                    }
                }
            }
        }
    }
}
