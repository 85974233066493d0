use std::net::SocketAddr;

use forks::NetworkMagic;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::constants::FRAME_HEADER_SIZE;
use crate::error::Error;
use crate::frame::{decode_header, encode_frame, verify_payload, Frame, FrameHeader};

// Partial-read progress survives across calls so `read_frame` can be raced
// in `tokio::select!` without losing bytes.
enum ReadState {
    Header {
        buffer: [u8; FRAME_HEADER_SIZE],
        read: usize,
    },
    Body {
        header: FrameHeader,
        buffer: Vec<u8>,
        read: usize,
    },
}

impl ReadState {
    fn fresh() -> Self {
        ReadState::Header {
            buffer: [0u8; FRAME_HEADER_SIZE],
            read: 0,
        }
    }
}

pub struct Session {
    pub stream: TcpStream,
    pub remote_addr: SocketAddr,
    read_state: ReadState,
}

impl Session {
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Session {
        Session {
            stream,
            remote_addr,
            read_state: ReadState::fresh(),
        }
    }

    pub async fn write_frame(
        &mut self,
        magic: NetworkMagic,
        command: &str,
        payload: &[u8],
    ) -> Result<(), Error> {
        let frame = encode_frame(magic, command, payload)?;
        self.stream.write_all(&frame).await.map_err(Error::from)
    }

    /// Read one complete frame. The magic is returned as seen on the wire.
    pub async fn read_frame(&mut self) -> Result<Frame, Error> {
        // Phase 1: header
        if let ReadState::Header { buffer, read } = &mut self.read_state {
            while *read < FRAME_HEADER_SIZE {
                let n = self.stream.read(&mut buffer[*read..]).await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
                *read += n;
            }
            let header = decode_header(buffer)?;
            self.read_state = ReadState::Body {
                buffer: vec![0u8; header.length as usize],
                header,
                read: 0,
            };
        }

        // Phase 2: payload
        if let ReadState::Body { buffer, read, .. } = &mut self.read_state {
            while *read < buffer.len() {
                let n = self.stream.read(&mut buffer[*read..]).await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
                *read += n;
            }
        }

        match std::mem::replace(&mut self.read_state, ReadState::fresh()) {
            ReadState::Body { header, buffer, .. } => {
                verify_payload(&header, &buffer)?;
                Ok(Frame {
                    magic: header.magic,
                    command: header.command,
                    payload: buffer,
                })
            }
            ReadState::Header { .. } => Err(Error::Frame("read state out of order".to_string())),
        }
    }
}
