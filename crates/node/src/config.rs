use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use forks::{ForkError, MagicPair, NetworkMagic, POSTFORK_MAGIC, PREFORK_MAGIC};
use p2p::constants::{DEFAULT_LISTEN_PORT, MAX_PEERS};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_RPC_PORT: u16 = 18443;

// ============================================================================
// CLI STRUCTS
// ============================================================================

/// MVF node: toy chain node with a height-triggered network hard fork.
#[derive(Parser, Debug)]
#[command(name = "mvf-node", version = "0.1.0")]
pub struct Cli {
    /// Path to TOML configuration file.
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    /// Block height at which this node activates the fork (required).
    #[arg(long = "forkheight")]
    pub fork_height: Option<u64>,

    /// Directory for the fork marker file.
    #[arg(long = "datadir")]
    pub datadir: Option<PathBuf>,

    /// Address to bind the P2P listener to.
    #[arg(long = "bind")]
    pub bind: Option<IpAddr>,

    /// Listen port for P2P (TCP). 0 picks a free port.
    #[arg(short = 'l', long = "listen")]
    pub listen: Option<u16>,

    /// Comma-separated peer addresses (host:port) to connect to at startup.
    #[arg(long = "connect", value_delimiter = ',')]
    pub connect: Vec<String>,

    /// Maximum number of P2P sessions.
    #[arg(long = "maxpeers")]
    pub max_peers: Option<usize>,

    /// JSON-RPC server host.
    #[arg(long = "rpc-host")]
    pub rpc_host: Option<IpAddr>,

    /// JSON-RPC server port.
    #[arg(long = "rpc-port")]
    pub rpc_port: Option<u16>,

    /// Network magic spoken before the fork, as 4 hex bytes.
    #[arg(long = "prefork-magic")]
    pub prefork_magic: Option<String>,

    /// Network magic spoken after the fork, as 4 hex bytes.
    #[arg(long = "postfork-magic")]
    pub postfork_magic: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Also write logs to this file (plain text, appended).
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

// ============================================================================
// CONFIG FILE STRUCTS
// ============================================================================

/// Configuration loaded from TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub fork_height: Option<u64>,
    pub datadir: Option<String>,
    pub bind: Option<IpAddr>,
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub connect: Vec<String>,
    pub max_peers: Option<usize>,
    pub rpc_host: Option<IpAddr>,
    pub rpc_port: Option<u16>,
    pub prefork_magic: Option<String>,
    pub postfork_magic: Option<String>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

// ============================================================================
// RUNTIME CONFIG
// ============================================================================

/// Final merged configuration for runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub fork_height: u64,
    pub datadir: PathBuf,
    pub listen_addr: SocketAddr,
    pub connect: Vec<SocketAddr>,
    pub max_peers: usize,
    pub rpc_addr: SocketAddr,
    pub magics: MagicPair,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Merge CLI args with config file. Precedence: CLI > config file > defaults.
    pub fn from_cli_and_file(cli: &Cli, file: ConfigFile) -> Result<Self, ConfigError> {
        let fork_height = cli
            .fork_height
            .or(file.fork_height)
            .ok_or(ConfigError::MissingRequired("forkheight"))?;

        let datadir = cli
            .datadir
            .clone()
            .or_else(|| file.datadir.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("data"));

        let bind = cli
            .bind
            .or(file.bind)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let listen_port = cli.listen.or(file.listen_port).unwrap_or(DEFAULT_LISTEN_PORT);

        let connect_raw = if !cli.connect.is_empty() {
            cli.connect.clone()
        } else {
            file.connect
        };
        let connect = connect_raw
            .iter()
            .map(|s| {
                s.trim()
                    .parse::<SocketAddr>()
                    .map_err(|_| ConfigError::InvalidValue {
                        field: "connect",
                        value: s.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let max_peers = cli.max_peers.or(file.max_peers).unwrap_or(MAX_PEERS);
        if max_peers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "maxpeers",
                value: "0".to_string(),
            });
        }

        let rpc_host = cli
            .rpc_host
            .or(file.rpc_host)
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let rpc_port = cli.rpc_port.or(file.rpc_port).unwrap_or(DEFAULT_RPC_PORT);

        let prefork = parse_magic(cli.prefork_magic.clone().or(file.prefork_magic), PREFORK_MAGIC)?;
        let postfork =
            parse_magic(cli.postfork_magic.clone().or(file.postfork_magic), POSTFORK_MAGIC)?;
        let magics = MagicPair::new(prefork, postfork)?;

        let log_level = cli
            .log_level
            .clone()
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        let log_file = cli
            .log_file
            .clone()
            .or_else(|| file.log_file.map(PathBuf::from));

        Ok(RuntimeConfig {
            fork_height,
            datadir,
            listen_addr: SocketAddr::new(bind, listen_port),
            connect,
            max_peers,
            rpc_addr: SocketAddr::new(rpc_host, rpc_port),
            magics,
            log_level,
            log_file,
        })
    }
}

fn parse_magic(value: Option<String>, default: NetworkMagic) -> Result<NetworkMagic, ConfigError> {
    match value {
        Some(s) => Ok(s.parse::<NetworkMagic>()?),
        None => Ok(default),
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--{0} is required (via CLI or config file)")]
    MissingRequired(&'static str),
    #[error("invalid value for --{field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error(transparent)]
    Fork(#[from] ForkError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

// ============================================================================
// LOADING FUNCTIONS
// ============================================================================

/// Load TOML config file, returns default if path is None.
pub fn load_config_file(path: Option<&PathBuf>) -> Result<ConfigFile, ConfigError> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)?;
            toml::from_str(&content).map_err(ConfigError::Toml)
        }
        None => Ok(ConfigFile::default()),
    }
}
