use forks::NetworkMagic;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame error: {0}")]
    Frame(String),
    #[error("message decode error: {0}")]
    Decode(String),
    #[error("handshake error: {0}")]
    Handshake(String),
    #[error("network magic mismatch: local {local}, remote {remote}")]
    MagicMismatch {
        local: NetworkMagic,
        remote: NetworkMagic,
    },
    #[error("connected to self")]
    SelfConnection,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("timeout: {0}")]
    Timeout(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
