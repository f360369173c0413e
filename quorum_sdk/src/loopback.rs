//! In-process coordination server.
//!
//! Every connected peer gets a [`LoopbackChannel`] and its own inbound queue.
//! Messages travel as encoded frames and are fanned out to the other members
//! of the session they are scoped to, the way the hosted server relays them.

use crate::{
    assert_throw,
    channel::{ChannelEvent, ChannelMessage, DuplexChannel},
    exception::*,
    session::{Phase, PeerId, SessionDescriptor, SessionKey},
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

struct HubSession {
    descriptor: SessionDescriptor,
    departed: HashSet<PeerId>,
    finished: HashSet<PeerId>,
}

impl HubSession {
    /// The record as handed to peers: departed members are left out, their
    /// party numbers are never reissued.
    fn view(&self) -> SessionDescriptor {
        let mut descriptor = self.descriptor.clone();
        descriptor
            .participants
            .retain(|(p, _)| !self.departed.contains(p));
        descriptor
    }

    fn quorum(&self) -> usize {
        self.descriptor
            .kind
            .quorum(&self.descriptor.params.parameters())
    }

    /// The roster is fixed once enough members attend.
    fn seal_if_quorate(&mut self) {
        if self.descriptor.phase == Phase::AwaitingPeers && self.members().count() >= self.quorum()
        {
            self.descriptor.phase = Phase::Computing;
        }
    }

    fn members(&self) -> impl Iterator<Item = &PeerId> {
        self.descriptor
            .participants
            .iter()
            .map(|(p, _)| p)
            .filter(|p| !self.departed.contains(*p))
    }
}

#[derive(Default)]
struct HubState {
    peers: HashMap<PeerId, mpsc::UnboundedSender<ChannelEvent>>,
    sessions: HashMap<SessionKey, HubSession>,
}

impl HubState {
    fn ensure_connected(&self, peer: &str) -> Outcome<()> {
        if self.peers.contains_key(peer) {
            Ok(())
        } else {
            Err(CoordError::ChannelDisconnected)
        }
    }

    /// Deliver to every member of `key` but `from`, or only to `dst`.
    fn fan_out(&self, key: &SessionKey, from: &str, dst: Option<&str>, message: &ChannelMessage) {
        let Some(session) = self.sessions.get(key) else {
            return;
        };
        for member in session.members() {
            if member == from || dst.is_some_and(|d| d != member) {
                continue;
            }
            if let Some(tx) = self.peers.get(member) {
                let _ = tx.send(ChannelEvent::Session {
                    key: key.clone(),
                    message: message.clone(),
                });
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(
        &self,
        peer: &str,
    ) -> (LoopbackChannel, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.peers.insert(peer.to_owned(), tx);
        debug!(peer, "peer connected");
        let channel = LoopbackChannel {
            peer: peer.to_owned(),
            hub: self.state.clone(),
        };
        (channel, rx)
    }

    /// Drop a peer's connection. The peer sees `Disconnected`, the other
    /// members of its open sessions see it leave.
    pub async fn disconnect(&self, peer: &str) {
        let mut hub = self.state.lock().await;
        if let Some(tx) = hub.peers.remove(peer) {
            let _ = tx.send(ChannelEvent::Disconnected);
        }
        let affected: Vec<SessionKey> = hub
            .sessions
            .iter()
            .filter(|(_, s)| !s.descriptor.phase.is_terminal() && s.members().any(|m| m == peer))
            .map(|(k, _)| k.clone())
            .collect();
        let left = ChannelMessage::PeerLeft {
            peer: peer.to_owned(),
        };
        for key in affected {
            hub.fan_out(&key, peer, None, &left);
            if let Some(session) = hub.sessions.get_mut(&key) {
                session.departed.insert(peer.to_owned());
            }
        }
        debug!(peer, "peer disconnected");
    }

    /// Seed a session record, e.g. one another server instance created.
    pub async fn register(&self, descriptor: SessionDescriptor) {
        self.state.lock().await.sessions.insert(
            descriptor.key.clone(),
            HubSession {
                descriptor,
                departed: HashSet::new(),
                finished: HashSet::new(),
            },
        );
    }

    pub async fn phase(&self, key: &SessionKey) -> Option<Phase> {
        let hub = self.state.lock().await;
        hub.sessions.get(key).map(|s| s.descriptor.phase)
    }
}

#[derive(Clone)]
pub struct LoopbackChannel {
    peer: PeerId,
    hub: Arc<Mutex<HubState>>,
}

impl LoopbackChannel {
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl DuplexChannel for LoopbackChannel {
    async fn open(&self, descriptor: &SessionDescriptor, peer: &str) -> Outcome<u16> {
        let mut hub = self.hub.lock().await;
        hub.ensure_connected(&self.peer)?;
        assert_throw!(
            !hub.sessions.contains_key(&descriptor.key),
            InvalidParameters,
            "session {} already exists",
            descriptor.key
        );
        let mut descriptor = descriptor.clone();
        descriptor.phase = Phase::AwaitingPeers;
        descriptor.participants = vec![(peer.to_owned(), 1)];
        hub.sessions.insert(
            descriptor.key.clone(),
            HubSession {
                descriptor,
                departed: HashSet::new(),
                finished: HashSet::new(),
            },
        );
        Ok(1)
    }

    async fn lookup(&self, key: &SessionKey) -> Outcome<Option<SessionDescriptor>> {
        let hub = self.hub.lock().await;
        hub.ensure_connected(&self.peer)?;
        Ok(hub.sessions.get(key).map(HubSession::view))
    }

    async fn join(&self, key: &SessionKey, peer: &str) -> Outcome<SessionDescriptor> {
        let mut hub = self.hub.lock().await;
        hub.ensure_connected(&self.peer)?;
        let session = hub
            .sessions
            .get_mut(key)
            .ok_or_else(|| CoordError::SessionNotFound(key.to_string()))?;
        if session.descriptor.phase.is_terminal() {
            return Err(CoordError::SessionClosed(key.to_string()));
        }
        if session.descriptor.phase == Phase::Computing {
            return Err(CoordError::SessionClosed(format!(
                "{key} already started computing"
            )));
        }
        let existing = session
            .descriptor
            .participants
            .iter()
            .find(|(p, _)| p == peer)
            .map(|(_, n)| *n);
        if let Some(party_number) = existing {
            session.departed.remove(peer);
            session.seal_if_quorate();
            let descriptor = session.view();
            let joined = ChannelMessage::PeerJoined {
                peer: peer.to_owned(),
                party_number,
            };
            hub.fan_out(key, peer, None, &joined);
            return Ok(descriptor);
        }
        let party_number = session
            .descriptor
            .participants
            .iter()
            .map(|(_, n)| *n)
            .max()
            .map_or(1, |n| n + 1);
        assert_throw!(
            party_number <= session.descriptor.params.parameters().parties,
            InvalidParameters,
            "session {key} is full"
        );
        session
            .descriptor
            .participants
            .push((peer.to_owned(), party_number));
        session.seal_if_quorate();
        let descriptor = session.view();
        let joined = ChannelMessage::PeerJoined {
            peer: peer.to_owned(),
            party_number,
        };
        hub.fan_out(key, peer, None, &joined);
        Ok(descriptor)
    }

    async fn send(&self, key: &SessionKey, message: ChannelMessage) -> Outcome<()> {
        let frame = message.encode_frame(key);
        let mut hub = self.hub.lock().await;
        hub.ensure_connected(&self.peer)?;
        let (key, message) = ChannelMessage::decode_frame(&frame)?;
        let session = hub
            .sessions
            .get_mut(&key)
            .ok_or_else(|| CoordError::SessionNotFound(key.to_string()))?;

        let mut dst = None;
        let closed = session.descriptor.phase.is_terminal();
        match &message {
            ChannelMessage::Abort { .. } if !closed => session.descriptor.phase = Phase::Aborted,
            ChannelMessage::Abort { .. } => {}
            ChannelMessage::PeerLeft { peer } => {
                session.departed.insert(peer.clone());
            }
            ChannelMessage::ComputationOutput { peer, .. } => {
                session.finished.insert(peer.clone());
                if !closed && session.finished.len() >= session.quorum() {
                    session.descriptor.phase = Phase::Completed;
                }
            }
            ChannelMessage::ComputationInput { dst: Some(d), .. } => dst = Some(d.clone()),
            ChannelMessage::ComputationInput { dst: None, .. } => {
                if session.descriptor.phase == Phase::AwaitingPeers {
                    session.descriptor.phase = Phase::Computing;
                }
            }
            ChannelMessage::PeerJoined { .. } => {}
        }
        hub.fan_out(&key, &self.peer, dst.as_deref(), &message);
        Ok(())
    }
}
