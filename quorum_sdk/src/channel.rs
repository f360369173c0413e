//! Duplex Channel boundary.
//!
//! The channel is shared by every session of a process. Inbound traffic is
//! delivered as [`ChannelEvent`]s on a single queue in arrival order, and the
//! coordinator demultiplexes by [`SessionKey`]. Frames on the wire are
//! prost-encoded `ChannelEnvelope`s.

use crate::{
    exception::*,
    session::{PeerId, SessionDescriptor, SessionKey},
};
use async_trait::async_trait;
use quorum_proto::prelude::Message;
use quorum_proto::protogen::quorum::{self as pb, channel_envelope::Body};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    PeerJoined { peer: PeerId, party_number: u16 },
    PeerLeft { peer: PeerId },
    Abort { peer: PeerId, reason: String },
    /// Protocol traffic between the engines; `dst == None` means every member.
    ComputationInput {
        src: PeerId,
        dst: Option<PeerId>,
        body: Vec<u8>,
    },
    /// A peer finished its part of the computation.
    ComputationOutput { peer: PeerId, digest: Vec<u8> },
}

impl ChannelMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::PeerJoined { .. } => "peer-joined",
            ChannelMessage::PeerLeft { .. } => "peer-left",
            ChannelMessage::Abort { .. } => "abort",
            ChannelMessage::ComputationInput { .. } => "computation-input",
            ChannelMessage::ComputationOutput { .. } => "computation-output",
        }
    }

    pub fn encode_frame(&self, key: &SessionKey) -> Vec<u8> {
        let body = match self.clone() {
            ChannelMessage::PeerJoined { peer, party_number } => Body::PeerJoined(pb::PeerJoined {
                peer_id: peer,
                party_number: party_number as u32,
            }),
            ChannelMessage::PeerLeft { peer } => Body::PeerLeft(pb::PeerLeft { peer_id: peer }),
            ChannelMessage::Abort { peer, reason } => Body::Abort(pb::Abort {
                peer_id: peer,
                reason,
            }),
            ChannelMessage::ComputationInput { src, dst, body } => {
                Body::ComputationInput(pb::ComputationInput {
                    src,
                    dst: dst.unwrap_or_default(),
                    body,
                })
            }
            ChannelMessage::ComputationOutput { peer, digest } => {
                Body::ComputationOutput(pb::ComputationOutput {
                    peer_id: peer,
                    digest,
                })
            }
        };
        pb::ChannelEnvelope {
            group_id: key.group_id.clone(),
            session_id: key.session_id.clone(),
            body: Some(body),
        }
        .encode_to_vec()
    }

    pub fn decode_frame(frame: &[u8]) -> Outcome<(SessionKey, ChannelMessage)> {
        let envelope = pb::ChannelEnvelope::decode(frame).or_invalid("decode channel frame")?;
        let key = SessionKey::new(&envelope.group_id, &envelope.session_id)?;
        let message = match envelope.body {
            Some(Body::PeerJoined(m)) => ChannelMessage::PeerJoined {
                peer: m.peer_id,
                party_number: u16::try_from(m.party_number)
                    .or_invalid("party number out of range")?,
            },
            Some(Body::PeerLeft(m)) => ChannelMessage::PeerLeft { peer: m.peer_id },
            Some(Body::Abort(m)) => ChannelMessage::Abort {
                peer: m.peer_id,
                reason: m.reason,
            },
            Some(Body::ComputationInput(m)) => ChannelMessage::ComputationInput {
                src: m.src,
                dst: Some(m.dst).filter(|d| !d.is_empty()),
                body: m.body,
            },
            Some(Body::ComputationOutput(m)) => ChannelMessage::ComputationOutput {
                peer: m.peer_id,
                digest: m.digest,
            },
            None => {
                return Err(CoordError::InvalidParameters(format!(
                    "empty channel frame for session {key}"
                )))
            }
        };
        Ok((key, message))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Session {
        key: SessionKey,
        message: ChannelMessage,
    },
    /// The transport is gone; every live session is lost.
    Disconnected,
}

/// Connection to the coordination server.
#[async_trait]
pub trait DuplexChannel: Send + Sync {
    /// Register a freshly created session; the creator signs up as `peer` and
    /// receives its party number.
    async fn open(&self, descriptor: &SessionDescriptor, peer: &str) -> Outcome<u16>;

    /// The server's record of a session, `None` if it has none.
    async fn lookup(&self, key: &SessionKey) -> Outcome<Option<SessionDescriptor>>;

    /// Sign up to an existing session; the other members see `peer-joined`.
    ///
    /// Returns the server's record as of the signup, `peer` included, so no
    /// member admitted in between is missed.
    async fn join(&self, key: &SessionKey, peer: &str) -> Outcome<SessionDescriptor>;

    async fn send(&self, key: &SessionKey, message: ChannelMessage) -> Outcome<()>;
}
