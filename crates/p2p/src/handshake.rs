use forks::NetworkMagic;
use tracing::debug;

use crate::error::Error;
use crate::gate::{HandshakeDecision, NetworkIdentityGate};
use crate::message::{Message, VersionMessage, VERACK, VERSION};
use crate::session::Session;

/// Result of a completed version/verack exchange.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    pub remote: VersionMessage,
    /// Tag both sides presented.
    pub magic: NetworkMagic,
}

/// Exchange `version`/`verack` with the remote.
///
/// Both sides send `version` first, so the exchange is symmetric and the
/// same routine serves inbound and outbound connections. The caller bounds
/// it with a timeout.
pub async fn perform_handshake(
    session: &mut Session,
    gate: &NetworkIdentityGate,
    local: &VersionMessage,
) -> Result<HandshakeOutcome, Error> {
    let ours = Message::Version(local.clone());
    session
        .write_frame(gate.current_tag(), VERSION, &ours.encode_payload())
        .await?;

    let frame = session.read_frame().await?;
    if frame.command != VERSION {
        return Err(Error::Handshake(format!(
            "expected version, got {}",
            frame.command
        )));
    }
    if let HandshakeDecision::Reject { local } = gate.on_handshake(frame.magic) {
        return Err(Error::MagicMismatch {
            local,
            remote: frame.magic,
        });
    }
    let remote = match Message::decode(&frame.command, &frame.payload)? {
        Message::Version(v) => v,
        other => {
            return Err(Error::Handshake(format!(
                "unexpected {} during handshake",
                other.command()
            )))
        }
    };
    if remote.nonce == local.nonce {
        return Err(Error::SelfConnection);
    }

    session
        .write_frame(gate.current_tag(), VERACK, &[])
        .await?;

    let ack = session.read_frame().await?;
    if ack.command != VERACK {
        return Err(Error::Handshake(format!(
            "expected verack, got {}",
            ack.command
        )));
    }
    if ack.magic != frame.magic {
        return Err(Error::MagicMismatch {
            local: frame.magic,
            remote: ack.magic,
        });
    }

    debug!(
        addr = %session.remote_addr,
        agent = %remote.user_agent,
        height = remote.best_height,
        magic = %frame.magic,
        "handshake complete"
    );

    Ok(HandshakeOutcome {
        remote,
        magic: frame.magic,
    })
}
