//! Fork-aware toy chain node: configuration, logging adapter, P2P event
//! loop and JSON-RPC surface.

pub mod config;
pub mod logging;
pub mod node;
pub mod rpc;
pub mod server;

pub use config::{ConfigError, RuntimeConfig};
pub use node::{ForkInfo, Node, NodeError};
