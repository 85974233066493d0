use chain::{Block, BlockHash};

use crate::bytes::{put_var_bytes, Reader};
use crate::error::Error;

pub const VERSION: &str = "version";
pub const VERACK: &str = "verack";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const BLOCK: &str = "block";
pub const GETBLOCKS: &str = "getblocks";

const MAX_USER_AGENT_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub protocol_version: u32,
    /// Random per-process value used to detect connecting to ourselves.
    pub nonce: u64,
    pub best_height: u64,
    pub listen_port: u16,
    pub user_agent: String,
}

impl VersionMessage {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 8 + 8 + 2 + 1 + self.user_agent.len());
        out.extend_from_slice(&self.protocol_version.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.best_height.to_le_bytes());
        out.extend_from_slice(&self.listen_port.to_le_bytes());
        put_var_bytes(&mut out, self.user_agent.as_bytes());
        out
    }

    fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(payload);
        let protocol_version = r.read_u32_le()?;
        let nonce = r.read_u64_le()?;
        let best_height = r.read_u64_le()?;
        let listen_port = r.read_u16_le()?;
        let agent = r.read_var_bytes()?;
        if agent.len() > MAX_USER_AGENT_LEN {
            return Err(Error::Decode(format!(
                "user agent too long: {} bytes",
                agent.len()
            )));
        }
        let user_agent = String::from_utf8_lossy(agent).into_owned();
        r.finish()?;
        Ok(Self {
            protocol_version,
            nonce,
            best_height,
            listen_port,
            user_agent,
        })
    }
}

/// Request for best-chain blocks above a locator the requester already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetBlocks {
    pub height: u64,
    pub hash: BlockHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Ping(u64),
    Pong(u64),
    Block(Block),
    GetBlocks(GetBlocks),
    /// Command we don't speak; payload is dropped.
    Unknown(String),
}

impl Message {
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => VERSION,
            Message::Verack => VERACK,
            Message::Ping(_) => PING,
            Message::Pong(_) => PONG,
            Message::Block(_) => BLOCK,
            Message::GetBlocks(_) => GETBLOCKS,
            Message::Unknown(cmd) => cmd,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Message::Version(v) => v.encode(),
            Message::Verack | Message::Unknown(_) => Vec::new(),
            Message::Ping(nonce) | Message::Pong(nonce) => nonce.to_le_bytes().to_vec(),
            Message::Block(block) => block.encode(),
            Message::GetBlocks(req) => {
                let mut out = Vec::with_capacity(40);
                out.extend_from_slice(&req.height.to_le_bytes());
                out.extend_from_slice(req.hash.as_bytes());
                out
            }
        }
    }

    pub fn decode(command: &str, payload: &[u8]) -> Result<Message, Error> {
        match command {
            VERSION => Ok(Message::Version(VersionMessage::decode(payload)?)),
            VERACK => {
                Reader::new(payload).finish()?;
                Ok(Message::Verack)
            }
            PING | PONG => {
                let mut r = Reader::new(payload);
                let nonce = r.read_u64_le()?;
                r.finish()?;
                if command == PING {
                    Ok(Message::Ping(nonce))
                } else {
                    Ok(Message::Pong(nonce))
                }
            }
            BLOCK => Block::decode(payload)
                .map(Message::Block)
                .map_err(|e| Error::Decode(e.to_string())),
            GETBLOCKS => {
                let mut r = Reader::new(payload);
                let height = r.read_u64_le()?;
                let hash = BlockHash(r.read_hash()?);
                r.finish()?;
                Ok(Message::GetBlocks(GetBlocks { height, hash }))
            }
            other => Ok(Message::Unknown(other.to_string())),
        }
    }
}
