use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use p2p::PeerInfo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::node::Node;

/// Upper bound on blocks mined by one `generate` call.
const MAX_GENERATE: u64 = 1_000;

#[derive(Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
    id: serde_json::Value,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: serde_json::Value,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: serde_json::Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PeerView {
    id: u64,
    addr: String,
    inbound: bool,
    network_magic: String,
    best_height: u64,
    user_agent: String,
}

impl From<PeerInfo> for PeerView {
    fn from(p: PeerInfo) -> Self {
        Self {
            id: p.id,
            addr: p.addr.to_string(),
            inbound: p.inbound,
            network_magic: p.handshake_magic.to_string(),
            best_height: p.best_height,
            user_agent: p.user_agent,
        }
    }
}

async fn handle_rpc(
    State(node): State<Arc<Node>>,
    Json(req): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse::error(
            req.id,
            -32600,
            "invalid JSON-RPC version".into(),
        ));
    }

    debug!(method = %req.method, "RPC request");

    match req.method.as_str() {
        "getblockcount" => Json(JsonRpcResponse::success(
            req.id,
            serde_json::json!(node.block_count().await),
        )),
        "getbestblockhash" => Json(JsonRpcResponse::success(
            req.id,
            serde_json::json!(node.best_block_hash().await.to_string()),
        )),
        "getforkinfo" => Json(JsonRpcResponse::success(
            req.id,
            serde_json::json!(node.fork_info().await),
        )),
        "getpeerinfo" => {
            let peers: Vec<PeerView> = node.peer_info().await.into_iter().map(Into::into).collect();
            Json(JsonRpcResponse::success(req.id, serde_json::json!(peers)))
        }
        "getconnectioncount" => Json(JsonRpcResponse::success(
            req.id,
            serde_json::json!(node.connection_count().await),
        )),
        "generate" => handle_generate(&node, req.id, req.params).await,
        "addnode" => handle_add_node(&node, req.id, req.params).await,
        _ => {
            warn!(method = %req.method, "unknown RPC method");
            Json(JsonRpcResponse::error(
                req.id,
                -32601,
                format!("method not found: {}", req.method),
            ))
        }
    }
}

async fn handle_generate(
    node: &Node,
    id: serde_json::Value,
    params: serde_json::Value,
) -> Json<JsonRpcResponse> {
    let count = match params.as_array().and_then(|p| p.first()) {
        None => 1,
        Some(v) => match v.as_u64() {
            Some(n) if n <= MAX_GENERATE => n,
            _ => {
                return Json(JsonRpcResponse::error(
                    id,
                    -32602,
                    format!("count must be an integer in 0..={}", MAX_GENERATE),
                ));
            }
        },
    };

    match node.generate(count).await {
        Ok(hashes) => {
            let hashes: Vec<String> = hashes.iter().map(|h| h.to_string()).collect();
            Json(JsonRpcResponse::success(id, serde_json::json!(hashes)))
        }
        Err(e) => {
            error!(err = %e, "generate failed");
            Json(JsonRpcResponse::error(id, -32000, e.to_string()))
        }
    }
}

async fn handle_add_node(
    node: &Node,
    id: serde_json::Value,
    params: serde_json::Value,
) -> Json<JsonRpcResponse> {
    let addr = match params
        .as_array()
        .and_then(|p| p.first())
        .and_then(|v| v.as_str())
    {
        Some(s) => s,
        None => {
            return Json(JsonRpcResponse::error(
                id,
                -32602,
                "expected 1 param: [\"host:port\"]".into(),
            ));
        }
    };

    let addr: SocketAddr = match addr.parse() {
        Ok(a) => a,
        Err(_) => {
            return Json(JsonRpcResponse::error(
                id,
                -32602,
                format!("invalid address: {}", addr),
            ));
        }
    };

    node.connect(addr).await;
    Json(JsonRpcResponse::success(id, serde_json::Value::Null))
}

/// Serve JSON-RPC on an already bound listener.
pub async fn serve_rpc(node: Arc<Node>, listener: TcpListener) -> std::io::Result<()> {
    let app = Router::new().route("/", post(handle_rpc)).with_state(node);

    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "RPC server started");
    }

    axum::serve(listener, app).await
}
