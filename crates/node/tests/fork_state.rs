//! Fork state as seen from outside a single node: RPC-visible flag vs
//! height, marker timing, and how a dormant node reacts to postfork orphans.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chain::{Block, BlockHash};
use forks::marker::{load_marker, MARKER_FILE_NAME};
use forks::{ForkMarker, POSTFORK_MAGIC, PREFORK_MAGIC};
use p2p::constants::PROTOCOL_VERSION;
use p2p::message;
use p2p::session::Session;
use p2p::{GetBlocks, Message, VersionMessage};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::Instant;

use common::{start_node, wait_for_connections};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fork_info_agrees_with_height_while_mining() {
    let dir = TempDir::new().unwrap();
    let (node, _) = start_node(50, dir.path()).await;

    let done = Arc::new(AtomicBool::new(false));
    let poller = {
        let node = node.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut torn = 0usize;
            let mut samples = 0usize;
            loop {
                let finished = done.load(Ordering::SeqCst);
                let info = node.fork_info().await;
                if info.active != (info.best_height >= info.fork_height) {
                    torn += 1;
                }
                samples += 1;
                if finished {
                    break;
                }
                tokio::task::yield_now().await;
            }
            (torn, samples)
        })
    };

    node.generate(100).await.unwrap();
    done.store(true, Ordering::SeqCst);

    let (torn, samples) = poller.await.unwrap();
    assert!(samples > 0);
    assert_eq!(torn, 0, "{} of {} samples disagreed with the height", torn, samples);

    let info = node.fork_info().await;
    assert!(info.active);
    assert_eq!(info.best_height, 100);
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_marker_on_disk_when_generate_returns() {
    let dir = TempDir::new().unwrap();
    let (node, counter) = start_node(3, dir.path()).await;

    node.generate(2).await.unwrap();
    assert!(!dir.path().join(MARKER_FILE_NAME).exists());

    node.generate(1).await.unwrap();
    let marker = load_marker(&dir.path().join(MARKER_FILE_NAME)).unwrap();
    assert_eq!(
        marker,
        Some(ForkMarker {
            trigger_height: 3,
            activation_height: 3,
        })
    );
    assert_eq!(counter.activations(), 1);
    node.shutdown().await;
}

fn orphan(height: u64, nonce: u64) -> Block {
    Block {
        height,
        parent: BlockHash([0xab; 32]),
        timestamp: 1,
        nonce,
    }
}

/// Next `getblocks` sent to `peer`, skipping everything else.
async fn next_getblocks(peer: &mut Session, within: Duration) -> Option<GetBlocks> {
    let deadline = Instant::now() + within;
    loop {
        let frame = match tokio::time::timeout_at(deadline, peer.read_frame()).await {
            Ok(frame) => frame.unwrap(),
            Err(_) => return None,
        };
        if let Ok(Message::GetBlocks(request)) = Message::decode(&frame.command, &frame.payload) {
            return Some(request);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_postfork_orphan_does_not_request_ancestry() {
    let dir = TempDir::new().unwrap();
    let (node, _) = start_node(5, dir.path()).await;

    // Hand-driven peer on the prefork tag
    let addr = node.p2p_addr().unwrap();
    let mut peer = Session::new(TcpStream::connect(addr).await.unwrap(), addr);
    let version = Message::Version(VersionMessage {
        protocol_version: PROTOCOL_VERSION,
        nonce: 0xfeed,
        best_height: 0,
        listen_port: 0,
        user_agent: "/test-peer/".to_string(),
    });
    peer.write_frame(PREFORK_MAGIC, message::VERSION, &version.encode_payload())
        .await
        .unwrap();
    peer.write_frame(PREFORK_MAGIC, message::VERACK, &[]).await.unwrap();
    wait_for_connections(&node, 1).await;

    // Postfork block past our trigger with unknown ancestry: kept as an
    // orphan, and no getblocks goes out under the prefork tag.
    peer.write_frame(POSTFORK_MAGIC, message::BLOCK, &orphan(7, 1).encode())
        .await
        .unwrap();
    assert!(next_getblocks(&mut peer, Duration::from_millis(700)).await.is_none());
    assert!(!node.fork_info().await.active);
    assert_eq!(node.block_count().await, 0);

    // A prefork orphan still asks for what follows our tip
    peer.write_frame(PREFORK_MAGIC, message::BLOCK, &orphan(3, 2).encode())
        .await
        .unwrap();
    let request = next_getblocks(&mut peer, Duration::from_secs(5))
        .await
        .expect("no getblocks for prefork orphan");
    assert_eq!(request.height, 0);
    assert_eq!(node.connection_count().await, 1);

    node.shutdown().await;
}
