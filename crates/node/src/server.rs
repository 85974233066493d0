use chain::ChainTracker;
use p2p::constants::MAX_BLOCKS_PER_RESPONSE;
use p2p::{GetBlocks, PeerId, PeerManager};
use tokio::sync::Mutex;
use tracing::debug;

/// Serve a `getblocks` request from the local best chain.
///
/// A locator that is not on our best chain gets no reply; the peer is on a
/// branch we will never serve.
pub async fn serve_get_blocks(
    pm: &PeerManager,
    chain: &Mutex<ChainTracker>,
    peer_id: PeerId,
    request: GetBlocks,
) {
    let blocks = {
        let chain = chain.lock().await;
        chain.blocks_after(request.height, &request.hash, MAX_BLOCKS_PER_RESPONSE)
    };

    if blocks.is_empty() {
        debug!(
            peer = peer_id,
            height = request.height,
            hash = %request.hash,
            "nothing to serve for getblocks"
        );
        return;
    }

    debug!(
        peer = peer_id,
        from = request.height + 1,
        count = blocks.len(),
        "serving blocks"
    );
    pm.send_blocks(peer_id, blocks).await;
}
