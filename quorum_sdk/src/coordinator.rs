//! Session Coordinator.
//!
//! Owns the lifecycle of every session this process takes part in. All state
//! changes happen on the coordinator's own control flow: inbound channel
//! traffic, engine results and quorum timers arrive as [`CoordinatorEvent`]s
//! and are applied one at a time by [`SessionCoordinator::step`]. The engine
//! and the timers run on their own tasks and only ever post events back.
//!
//! ```text
//! created -> awaiting-peers -> computing -> completed
//!                 \                 \
//!                  +----------------+--> aborted
//! ```
//!
//! At most one non-terminal session exists per (target address, kind) slot.

use crate::{
    assert_throw,
    channel::{ChannelEvent, ChannelMessage, DuplexChannel},
    engine::{
        spawn_operation, ComputationOutput, ComputationResult, ComputeEngine, OperationInput,
        OperationKind, PeerMessage, Running,
    },
    exception::*,
    identity::{ActivityWatch, Identity, IdentityProof},
    manager::AppStateManager,
    route::{Address, SessionRoute},
    session::{Parameters, Phase, PeerId, Session, SessionKey, SessionKind, SessionParams, SigningType},
    state::{KeyShare, MessageProof, SessionFruit, TransactionReceipt},
};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Closed sessions remembered so that late traffic is recognized as late.
const RETIRED_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum CoordinatorEvent {
    Channel(ChannelEvent),
    Computed {
        key: SessionKey,
        result: ComputationResult,
    },
    QuorumTimeout(SessionKey),
    /// The inbound queue has been closed by the channel.
    InboundClosed,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub quorum_timeout: Duration,
    pub computation_timeout: Duration,
    pub activity_poll: Duration,
    /// Group parameters for sessions this process creates without their own.
    pub parameters: Parameters,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            quorum_timeout: Duration::from_secs(120),
            computation_timeout: Duration::from_secs(300),
            activity_poll: Duration::from_secs(30),
            parameters: Parameters::default(),
        }
    }
}

/// The one outcome every session ends with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReport {
    /// The result is in; `persisted` tells whether it reached the store.
    Completed {
        key: SessionKey,
        fruit: SessionFruit,
        persisted: Outcome<()>,
    },
    Aborted {
        key: SessionKey,
        error: CoordError,
    },
}

impl SessionReport {
    pub fn key(&self) -> &SessionKey {
        match self {
            SessionReport::Completed { key, .. } => key,
            SessionReport::Aborted { key, .. } => key,
        }
    }

    /// One line for the user.
    pub fn notification(&self) -> String {
        match self {
            SessionReport::Completed {
                key,
                fruit,
                persisted: Ok(()),
            } => format!("Session {key} completed: {}", fruit.summary()),
            SessionReport::Completed {
                key,
                fruit,
                persisted: Err(err),
            } => format!(
                "Session {key} completed with {}, but it was not saved: {err}",
                fruit.summary()
            ),
            SessionReport::Aborted { key, error } => format!("Session {key} failed: {error}"),
        }
    }
}

/// Durable record of how sessions ended.
#[async_trait]
pub trait SessionLog: Send + Sync {
    async fn record(&self, identity: &Identity, report: &SessionReport);
}

struct LiveSession {
    session: Session,
    quorum_timer: Option<JoinHandle<()>>,
    running: Option<Running>,
    /// Engine traffic that arrived before the local operation started.
    backlog: Vec<PeerMessage>,
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Some(timer) = self.quorum_timer.take() {
            timer.abort();
        }
    }
}

type Slot = (Option<Address>, SessionKind);

pub struct SessionCoordinator {
    me: PeerId,
    identity: Identity,
    channel: Arc<dyn DuplexChannel>,
    engine: Arc<dyn ComputeEngine>,
    states: Arc<AppStateManager>,
    journal: Option<Arc<dyn SessionLog>>,
    settings: CoordinatorSettings,
    live: HashMap<SessionKey, LiveSession>,
    slots: HashMap<Slot, SessionKey>,
    retired: IndexMap<SessionKey, Phase>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    inbound_open: bool,
    events_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    events_rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
    pending: VecDeque<SessionReport>,
}

impl SessionCoordinator {
    /// `inbound` is the channel's event queue for peer `me`.
    pub fn new(
        me: &str,
        identity: Identity,
        channel: Arc<dyn DuplexChannel>,
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
        engine: Arc<dyn ComputeEngine>,
        states: Arc<AppStateManager>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            me: me.to_owned(),
            identity,
            channel,
            engine,
            states,
            journal: None,
            settings: CoordinatorSettings::default(),
            live: HashMap::new(),
            slots: HashMap::new(),
            retired: IndexMap::new(),
            inbound,
            inbound_open: true,
            events_tx,
            events_rx,
            pending: VecDeque::new(),
        }
    }

    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn SessionLog>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn peer_id(&self) -> &str {
        &self.me
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Poll whether this coordinator's identity is still active, at the
    /// configured interval.
    pub fn watch_activity(&self, service: Arc<dyn IdentityProof>) -> ActivityWatch {
        ActivityWatch::spawn(service, self.identity.clone(), self.settings.activity_poll)
    }

    /// Phase of a live or recently closed session.
    pub fn phase(&self, key: &SessionKey) -> Option<Phase> {
        match self.live.get(key) {
            Some(live) => Some(live.session.phase),
            None => self.retired.get(key).copied(),
        }
    }

    pub fn session(&self, key: &SessionKey) -> Option<&Session> {
        self.live.get(key).map(|live| &live.session)
    }

    pub fn live_sessions(&self) -> usize {
        self.live.len()
    }

    /// Start a new session and sign up as its first participant.
    pub async fn create_session(
        &mut self,
        kind: SessionKind,
        params: SessionParams,
    ) -> Outcome<Session> {
        let params = params.or_parameters(self.settings.parameters);
        params.validate(kind)?;
        self.check_slot(params.target.as_ref(), kind)?;
        self.check_key_share(kind, params.target.as_ref()).await?;

        let key = SessionKey::generate();
        let mut session = Session::new(key.clone(), kind, params);
        debug!(session = %key, %kind, "session created");
        let number = self.channel.open(&session.descriptor(), &self.me).await?;
        session.admit(&self.me, number)?;
        Ok(self.enter(session).await)
    }

    /// Join an existing session by its identifiers.
    pub async fn join_session(&mut self, group_id: &str, session_id: &str) -> Outcome<Session> {
        let key = SessionKey::new(group_id, session_id)?;
        self.join(key, None).await
    }

    /// Join the session a validated entry point refers to. The route's kind
    /// and address must match the session's.
    pub async fn join_route(&mut self, route: &SessionRoute) -> Outcome<Session> {
        self.join(route.key().clone(), Some(route)).await
    }

    /// Leave or stop a session this process takes part in.
    ///
    /// Before computation the peers are told we left; during computation they
    /// are told to abort, and a result that still arrives is discarded.
    pub async fn cancel(&mut self, key: &SessionKey) -> Outcome<()> {
        let phase = match self.live.get(key) {
            Some(live) => live.session.phase,
            None if self.retired.contains_key(key) => {
                return Err(CoordError::SessionClosed(key.to_string()))
            }
            None => return Err(CoordError::SessionNotFound(key.to_string())),
        };
        let computing = phase == Phase::Computing;
        if !computing {
            let left = ChannelMessage::PeerLeft {
                peer: self.me.clone(),
            };
            if let Err(err) = self.channel.send(key, left).await {
                warn!(session = %key, %err, "failed to announce leaving");
            }
        }
        let error = CoordError::SessionClosed(format!("{key} cancelled locally"));
        self.abort(key, error, computing).await;
        info!(session = %key, ?phase, "session cancelled");
        Ok(())
    }

    /// Wait for the next session outcome, driving every live session
    /// meanwhile. `None` once the channel is gone and nothing is left to do.
    pub async fn next_report(&mut self) -> Option<SessionReport> {
        loop {
            if let Some(report) = self.pending.pop_front() {
                return Some(report);
            }
            if !self.inbound_open && self.live.is_empty() {
                return None;
            }
            let event = tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => event,
                inbound = self.inbound.recv(), if self.inbound_open => match inbound {
                    Some(event) => CoordinatorEvent::Channel(event),
                    None => CoordinatorEvent::InboundClosed,
                },
            };
            let reports = self.step(event).await;
            self.pending.extend(reports);
        }
    }

    /// Apply one event.
    pub async fn step(&mut self, event: CoordinatorEvent) -> Vec<SessionReport> {
        match event {
            CoordinatorEvent::Channel(ChannelEvent::Session { key, message }) => {
                self.on_peer_event(&key, message).await.into_iter().collect()
            }
            CoordinatorEvent::Channel(ChannelEvent::Disconnected) => self.lose_channel().await,
            CoordinatorEvent::InboundClosed => {
                self.inbound_open = false;
                self.lose_channel().await
            }
            CoordinatorEvent::Computed { key, result } => self
                .on_computation_result(&key, result)
                .await
                .into_iter()
                .collect(),
            CoordinatorEvent::QuorumTimeout(key) => {
                let waiting = self
                    .live
                    .get(&key)
                    .is_some_and(|live| live.session.phase < Phase::Computing);
                if !waiting {
                    return Vec::new();
                }
                vec![
                    self.abort(&key, CoordError::QuorumTimeout(key.to_string()), true)
                        .await,
                ]
            }
        }
    }

    /// Apply one message from the channel.
    ///
    /// Traffic for sessions we do not know, or that already closed, is
    /// ignored.
    pub async fn on_peer_event(
        &mut self,
        key: &SessionKey,
        message: ChannelMessage,
    ) -> Option<SessionReport> {
        let Some(live) = self.live.get_mut(key) else {
            match self.retired.get(key) {
                Some(phase) => {
                    debug!(session = %key, ?phase, kind = message.kind(), "late message ignored")
                }
                None => debug!(session = %key, kind = message.kind(), "message for unknown session"),
            }
            return None;
        };

        match message {
            ChannelMessage::PeerJoined { peer, party_number } => {
                if live.session.phase >= Phase::Computing {
                    warn!(session = %key, %peer, "signup after computation started ignored");
                    return None;
                }
                if let Err(err) = live.session.admit(&peer, party_number) {
                    warn!(session = %key, %peer, %err, "rejected peer signup");
                    return None;
                }
                live.session.departed.remove(&peer);
                info!(
                    session = %key,
                    %peer,
                    party_number,
                    attending = live.session.attending(),
                    quorum = live.session.quorum(),
                    "peer joined"
                );
                self.maybe_start(key).await
            }
            ChannelMessage::PeerLeft { peer } => {
                if live.session.phase == Phase::Computing {
                    if !live.session.roster().iter().any(|(p, _)| *p == peer) {
                        debug!(session = %key, %peer, "non-member left during computation");
                        return None;
                    }
                    warn!(session = %key, %peer, "peer left during computation");
                    return Some(self.abort(key, CoordError::ChannelDisconnected, true).await);
                }
                if live.session.participants.contains_key(&peer) {
                    live.session.departed.insert(peer.clone());
                    info!(session = %key, %peer, "peer left before computation");
                }
                None
            }
            ChannelMessage::Abort { peer, reason } => {
                let error = CoordError::SessionClosed(format!("{key} aborted by {peer}: {reason}"));
                Some(self.abort(key, error, false).await)
            }
            ChannelMessage::ComputationInput { src, dst, body } => {
                if src == self.me || dst.as_ref().is_some_and(|d| *d != self.me) {
                    return None;
                }
                let msg = PeerMessage {
                    peer: Some(src),
                    body,
                };
                match &live.running {
                    Some(running) => {
                        if running.inbox.send(msg).is_err() {
                            debug!(session = %key, "engine no longer reading its inbox");
                        }
                    }
                    None => live.backlog.push(msg),
                }
                None
            }
            ChannelMessage::ComputationOutput { peer, .. } => {
                live.session.finished.insert(peer.clone());
                debug!(
                    session = %key,
                    %peer,
                    finished = live.session.finished.len(),
                    "peer finished computing"
                );
                None
            }
        }
    }

    /// Apply an engine result. Results for sessions that already closed are
    /// discarded.
    pub async fn on_computation_result(
        &mut self,
        key: &SessionKey,
        result: ComputationResult,
    ) -> Option<SessionReport> {
        let session = match self.live.get(key) {
            Some(live) if live.session.phase == Phase::Computing => live.session.clone(),
            _ => {
                debug!(session = %key, ok = result.is_ok(), "computation result discarded");
                return None;
            }
        };
        let fruit = result
            .map_err(|err| CoordError::ComputationFailed(err.0))
            .and_then(|output| fruit_of(&session, output));
        match fruit {
            Ok(fruit) => Some(self.complete(key, fruit).await),
            Err(err) => Some(self.abort(key, err, true).await),
        }
    }

    async fn join(&mut self, key: SessionKey, route: Option<&SessionRoute>) -> Outcome<Session> {
        if self.live.contains_key(&key) {
            return Err(CoordError::SessionAlreadyActive(format!("session {key}")));
        }
        let desc = self
            .channel
            .lookup(&key)
            .await?
            .ok_or_else(|| CoordError::SessionNotFound(key.to_string()))?;
        if desc.phase.is_terminal() {
            return Err(CoordError::SessionClosed(key.to_string()));
        }
        if desc.phase >= Phase::Computing {
            return Err(CoordError::SessionClosed(format!(
                "{key} already started computing"
            )));
        }
        if let Some(route) = route {
            assert_throw!(
                route.kind() == desc.kind && route.address() == desc.params.target.as_ref(),
                InvalidParameters,
                "route {route} does not match the {} session {key}",
                desc.kind
            );
        }
        self.check_slot(desc.params.target.as_ref(), desc.kind)?;
        self.check_key_share(desc.kind, desc.params.target.as_ref())
            .await?;

        let signed_up = self.channel.join(&key, &self.me).await?;
        let session = Session::from_descriptor(&signed_up)?;
        assert_throw!(
            session.participants.contains_key(&self.me),
            InvalidParameters,
            "signup to {key} was not recorded"
        );
        info!(session = %key, kind = %session.kind, "joined session");
        Ok(self.enter(session).await)
    }

    fn check_slot(&self, target: Option<&Address>, kind: SessionKind) -> Outcome<()> {
        let slot = (target.cloned(), kind);
        if let Some(active) = self.slots.get(&slot) {
            let what = match target {
                Some(address) => format!("{kind} on {address} (session {active})"),
                None => format!("{kind} (session {active})"),
            };
            return Err(CoordError::SessionAlreadyActive(what));
        }
        Ok(())
    }

    /// Signing needs the target's share; keygen must not shadow one.
    async fn check_key_share(&self, kind: SessionKind, target: Option<&Address>) -> Outcome<()> {
        let state = self.states.load(&self.identity).await?;
        match (kind, target) {
            (SessionKind::Sign(_), Some(address)) => {
                assert_throw!(
                    state.has_key_share(address),
                    InvalidParameters,
                    "no key share for {address}"
                );
            }
            (SessionKind::Sign(_), None) => {
                return Err(CoordError::InvalidParameters(
                    "a signing session needs a target address".into(),
                ))
            }
            (SessionKind::Keygen, Some(address)) => {
                assert_throw!(
                    !state.has_key_share(address),
                    InvalidParameters,
                    "{address} already holds a key share"
                );
            }
            (SessionKind::Keygen, None) => {}
        }
        Ok(())
    }

    /// Register a session we signed up to and start waiting for peers.
    async fn enter(&mut self, mut session: Session) -> Session {
        let key = session.key.clone();
        session.phase = Phase::AwaitingPeers;
        info!(
            session = %key,
            kind = %session.kind,
            attending = session.attending(),
            quorum = session.quorum(),
            "awaiting peers"
        );
        let mut snapshot = session.clone();
        let timer = self.arm_quorum_timer(&key);
        self.slots
            .insert((session.params.target.clone(), session.kind), key.clone());
        self.live.insert(
            key.clone(),
            LiveSession {
                session,
                quorum_timer: Some(timer),
                running: None,
                backlog: Vec::new(),
            },
        );

        if let Some(report) = self.maybe_start(&key).await {
            self.pending.push_back(report);
        }
        if let Some(phase) = self.phase(&key) {
            snapshot.phase = phase;
        }
        snapshot
    }

    fn arm_quorum_timer(&self, key: &SessionKey) -> JoinHandle<()> {
        let events = self.events_tx.clone();
        let limit = self.settings.quorum_timeout;
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let _ = events.send(CoordinatorEvent::QuorumTimeout(key));
        })
    }

    /// Begin computing once quorum is reached.
    async fn maybe_start(&mut self, key: &SessionKey) -> Option<SessionReport> {
        let live = self.live.get_mut(key)?;
        if live.session.phase != Phase::AwaitingPeers || !live.session.has_quorum() {
            return None;
        }
        live.session.phase = Phase::Computing;
        if let Some(timer) = live.quorum_timer.take() {
            timer.abort();
        }
        let session = live.session.clone();

        let share = match (session.kind, session.params.target.as_ref()) {
            (SessionKind::Sign(_), Some(address)) => {
                let state = match self.states.load(&self.identity).await {
                    Ok(state) => state,
                    Err(err) => return Some(self.abort(key, err, true).await),
                };
                match state.key_shares.get(address) {
                    Some(KeyShare { share, .. }) => Some(share.clone()),
                    None => {
                        let err = CoordError::ComputationFailed(format!(
                            "key share for {address} is gone"
                        ));
                        return Some(self.abort(key, err, true).await);
                    }
                }
            }
            _ => None,
        };
        let kind = match session.kind {
            SessionKind::Keygen => OperationKind::Keygen,
            SessionKind::Sign(SigningType::Message) => OperationKind::SignMessage,
            SessionKind::Sign(SigningType::Transaction) => OperationKind::SignTransaction,
        };
        let party_number = session
            .participants
            .get(&self.me)
            .copied()
            .unwrap_or_default();
        let input = OperationInput::detached(
            key.clone(),
            party_number,
            session.params.parameters(),
            session.roster(),
            session.params.target.clone(),
            share,
            session
                .params
                .request
                .as_ref()
                .map(|r| r.payload.clone())
                .unwrap_or_default(),
        );
        let running = spawn_operation(
            self.engine.clone(),
            self.channel.clone(),
            self.me.clone(),
            kind,
            input,
            self.settings.computation_timeout,
            self.events_tx.clone(),
        );

        let live = self.live.get_mut(key)?;
        for msg in live.backlog.drain(..) {
            let _ = running.inbox.send(msg);
        }
        live.running = Some(running);
        info!(session = %key, roster = ?session.roster(), "quorum reached, computing");
        None
    }

    async fn complete(&mut self, key: &SessionKey, fruit: SessionFruit) -> SessionReport {
        if let Some(live) = self.live.get_mut(key) {
            live.session.phase = Phase::Completed;
        }
        let done = ChannelMessage::ComputationOutput {
            peer: self.me.clone(),
            digest: public_digest(&fruit),
        };
        if let Err(err) = self.channel.send(key, done).await {
            warn!(session = %key, %err, "failed to announce completion");
        }

        let persisted = self
            .states
            .apply_session_result(&self.identity, &fruit)
            .await
            .map(|_| ());
        match &persisted {
            Ok(()) => info!(session = %key, fruit = %fruit.summary(), "session completed"),
            Err(err) => warn!(session = %key, %err, "session completed but not persisted"),
        }
        self.retire(key);
        let report = SessionReport::Completed {
            key: key.clone(),
            fruit,
            persisted,
        };
        self.log(&report).await;
        report
    }

    /// Close a session as aborted. With `notify` the other members are told
    /// to abort as well.
    async fn abort(&mut self, key: &SessionKey, error: CoordError, notify: bool) -> SessionReport {
        if let Some(live) = self.live.get_mut(key) {
            live.session.phase = Phase::Aborted;
            if let Some(running) = live.running.take() {
                running.relay.abort();
            }
        }
        if notify {
            let abort = ChannelMessage::Abort {
                peer: self.me.clone(),
                reason: error.to_string(),
            };
            if let Err(err) = self.channel.send(key, abort).await {
                debug!(session = %key, %err, "failed to notify peers of abort");
            }
        }
        if error.is_protocol() {
            warn!(session = %key, %error, "session aborted");
        } else {
            error!(session = %key, %error, "session aborted");
        }
        self.retire(key);
        let report = SessionReport::Aborted {
            key: key.clone(),
            error,
        };
        self.log(&report).await;
        report
    }

    async fn lose_channel(&mut self) -> Vec<SessionReport> {
        let keys: Vec<SessionKey> = self.live.keys().cloned().collect();
        let mut reports = Vec::with_capacity(keys.len());
        for key in keys {
            reports.push(self.abort(&key, CoordError::ChannelDisconnected, false).await);
        }
        reports
    }

    fn retire(&mut self, key: &SessionKey) {
        let Some(live) = self.live.remove(key) else {
            return;
        };
        let slot = (live.session.params.target.clone(), live.session.kind);
        if self.slots.get(&slot) == Some(key) {
            self.slots.remove(&slot);
        }
        self.retired.insert(key.clone(), live.session.phase);
        while self.retired.len() > RETIRED_CAPACITY {
            self.retired.shift_remove_index(0);
        }
    }

    async fn log(&self, report: &SessionReport) {
        if let Some(journal) = &self.journal {
            journal.record(&self.identity, report).await;
        }
    }
}

/// Turn the engine's output into the fruit this session was started for.
fn fruit_of(session: &Session, output: ComputationOutput) -> Outcome<SessionFruit> {
    let params = &session.params;
    match (session.kind, output) {
        (SessionKind::Keygen, ComputationOutput::KeyShare { address, share }) => {
            if let Some(target) = &params.target {
                assert_throw!(
                    *target == address,
                    ComputationFailed,
                    "engine produced a key for {address} instead of {target}"
                );
            }
            Ok(SessionFruit::KeyShare {
                address,
                share: KeyShare {
                    label: params.label.clone(),
                    share,
                },
            })
        }
        (SessionKind::Sign(signing_type), ComputationOutput::Signature(signature)) => {
            let (Some(address), Some(request)) = (params.target.clone(), params.request.as_ref())
            else {
                return Err(CoordError::ComputationFailed(
                    "signing session lost its request".into(),
                ));
            };
            Ok(match signing_type {
                SigningType::Message => SessionFruit::MessageProof {
                    message_id: request.id.clone(),
                    proof: MessageProof { address, signature },
                },
                SigningType::Transaction => SessionFruit::TransactionReceipt {
                    tx_id: request.id.clone(),
                    receipt: TransactionReceipt {
                        address,
                        receipt: signature,
                    },
                },
            })
        }
        (kind, _) => Err(CoordError::ComputationFailed(format!(
            "engine returned the wrong kind of output for a {kind} session"
        ))),
    }
}

/// What may be shown to the other members: never key material.
fn public_digest(fruit: &SessionFruit) -> Vec<u8> {
    match fruit {
        SessionFruit::KeyShare { address, .. } => address.as_str().as_bytes().to_vec(),
        SessionFruit::MessageProof { proof, .. } => proof.signature.clone(),
        SessionFruit::TransactionReceipt { receipt, .. } => receipt.receipt.clone(),
    }
}
