//! Computation Engine Bridge.
//!
//! The threshold math itself is opaque. An operation runs on its own tokio
//! task, exchanges protocol traffic through an inbox/outbox pair the
//! coordinator relays over the channel, and reports back through the
//! coordinator's event queue. Session bookkeeping never waits on it.

use crate::{
    channel::{ChannelMessage, DuplexChannel},
    coordinator::CoordinatorEvent,
    route::Address,
    session::{Parameters, PeerId, SessionKey},
    state::ShareMaterial,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Keygen,
    SignMessage,
    SignTransaction,
}

/// One engine-level message. Inbound: `peer` is the sender. Outbound: `peer`
/// is the recipient, `None` for every member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    pub peer: Option<PeerId>,
    pub body: Vec<u8>,
}

pub struct OperationInput {
    pub key: SessionKey,
    pub party_number: u16,
    pub parameters: Parameters,
    /// Attending participants ordered by party number.
    pub roster: Vec<(PeerId, u16)>,
    pub target: Option<Address>,
    /// Local key share, present for signing.
    pub share: Option<ShareMaterial>,
    pub payload: Vec<u8>,
    pub inbox: mpsc::UnboundedReceiver<PeerMessage>,
    pub outbox: mpsc::UnboundedSender<PeerMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputationOutput {
    KeyShare {
        address: Address,
        share: ShareMaterial,
    },
    Signature(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ComputationError(pub String);

pub type ComputationResult = Result<ComputationOutput, ComputationError>;

#[async_trait]
pub trait ComputeEngine: Send + Sync {
    async fn run_operation(&self, kind: OperationKind, input: OperationInput) -> ComputationResult;
}

/// Handles of a running operation.
pub(crate) struct Running {
    pub inbox: mpsc::UnboundedSender<PeerMessage>,
    pub relay: JoinHandle<()>,
}

/// Start `kind` off the coordinator's control flow.
///
/// The result is posted as [`CoordinatorEvent::Computed`]; an operation that
/// outlives `limit` reports a timeout instead.
pub(crate) fn spawn_operation(
    engine: Arc<dyn ComputeEngine>,
    channel: Arc<dyn DuplexChannel>,
    me: PeerId,
    kind: OperationKind,
    mut input: OperationInput,
    limit: Duration,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
) -> Running {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<PeerMessage>();
    input.inbox = inbox_rx;
    input.outbox = outbox_tx;
    let key = input.key.clone();

    let relay_key = key.clone();
    let relay = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            let message = ChannelMessage::ComputationInput {
                src: me.clone(),
                dst: msg.peer,
                body: msg.body,
            };
            if let Err(err) = channel.send(&relay_key, message).await {
                warn!(session = %relay_key, %err, "failed to relay engine traffic");
            }
        }
    });

    tokio::spawn(async move {
        debug!(session = %key, ?kind, "operation started");
        let result = match tokio::time::timeout(limit, engine.run_operation(kind, input)).await {
            Ok(result) => result,
            Err(_) => Err(ComputationError("timed out".into())),
        };
        // The coordinator may be gone already; the result is then dropped.
        let _ = events.send(CoordinatorEvent::Computed { key, result });
    });

    Running {
        inbox: inbox_tx,
        relay,
    }
}

impl OperationInput {
    /// Input with placeholder mailboxes; `spawn_operation` wires the real ones.
    pub(crate) fn detached(
        key: SessionKey,
        party_number: u16,
        parameters: Parameters,
        roster: Vec<(PeerId, u16)>,
        target: Option<Address>,
        share: Option<ShareMaterial>,
        payload: Vec<u8>,
    ) -> Self {
        let (_, inbox) = mpsc::unbounded_channel();
        let (outbox, _) = mpsc::unbounded_channel();
        Self {
            key,
            party_number,
            parameters,
            roster,
            target,
            share,
            payload,
            inbox,
            outbox,
        }
    }
}
