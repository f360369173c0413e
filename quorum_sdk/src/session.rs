use crate::{assert_throw, exception::*, route::Address, util::is_route_safe};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type PeerId = String;

/// Scopes one protocol run on the coordination server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub group_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(group_id: &str, session_id: &str) -> Outcome<Self> {
        assert_throw!(
            is_route_safe(group_id),
            InvalidParameters,
            "malformed group id «{group_id}»"
        );
        assert_throw!(
            is_route_safe(session_id),
            InvalidParameters,
            "malformed session id «{session_id}»"
        );
        Ok(Self {
            group_id: group_id.to_owned(),
            session_id: session_id.to_owned(),
        })
    }

    pub fn generate() -> Self {
        Self {
            group_id: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_id, self.session_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningType {
    Message,
    Transaction,
}

impl SigningType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningType::Message => "message",
            SigningType::Transaction => "transaction",
        }
    }
}

impl FromStr for SigningType {
    type Err = CoordError;

    fn from_str(s: &str) -> Outcome<Self> {
        match s {
            "message" => Ok(SigningType::Message),
            "transaction" => Ok(SigningType::Transaction),
            other => Err(CoordError::InvalidParameters(format!(
                "unknown signing type «{other}»"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Keygen,
    Sign(SigningType),
}

impl SessionKind {
    pub fn signing_type(&self) -> Option<SigningType> {
        match self {
            SessionKind::Keygen => None,
            SessionKind::Sign(st) => Some(*st),
        }
    }

    /// Participants required before computation may start.
    ///
    /// Key generation needs every party; signing needs the threshold crossed.
    pub fn quorum(&self, params: &Parameters) -> usize {
        match self {
            SessionKind::Keygen => params.parties as usize,
            SessionKind::Sign(_) => params.threshold as usize + 1,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Keygen => write!(f, "keygen"),
            SessionKind::Sign(st) => write!(f, "sign-{}", st.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Created,
    AwaitingPeers,
    Computing,
    Completed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }
}

/// Group parameters used during key generation and signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    /// Number of parties `n`.
    pub parties: u16,
    /// Threshold `t`; signing commences once `t + 1` parties attend.
    pub threshold: u16,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            parties: 3,
            threshold: 1,
        }
    }
}

impl Parameters {
    pub fn validate(&self) -> Outcome<()> {
        assert_throw!(
            self.threshold >= 1,
            InvalidParameters,
            "threshold may not be zero"
        );
        assert_throw!(
            self.threshold < self.parties,
            InvalidParameters,
            "threshold {} must be below the party count {}",
            self.threshold,
            self.parties
        );
        Ok(())
    }
}

/// What a signing session signs: a message or a transaction, and the id its
/// proof or receipt is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub id: String,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Address the session acts for. Required for signing, optional for keygen.
    pub target: Option<Address>,
    pub label: String,
    /// Left empty, the creating coordinator fills in its configured
    /// parameters.
    #[serde(default)]
    pub parameters: Option<Parameters>,
    pub request: Option<SignRequest>,
}

impl SessionParams {
    pub fn keygen(label: &str) -> Self {
        Self {
            target: None,
            label: label.to_owned(),
            parameters: None,
            request: None,
        }
    }

    pub fn sign(target: Address, id: &str, payload: Vec<u8>) -> Self {
        Self {
            target: Some(target),
            label: String::new(),
            parameters: None,
            request: Some(SignRequest {
                id: id.to_owned(),
                payload,
            }),
        }
    }

    pub fn with_target(mut self, target: Address) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Keep explicit parameters, otherwise take `fallback`.
    pub fn or_parameters(mut self, fallback: Parameters) -> Self {
        self.parameters.get_or_insert(fallback);
        self
    }

    pub fn parameters(&self) -> Parameters {
        self.parameters.unwrap_or_default()
    }

    pub fn validate(&self, kind: SessionKind) -> Outcome<()> {
        self.parameters().validate()?;
        match kind {
            SessionKind::Keygen => {
                assert_throw!(
                    self.request.is_none(),
                    InvalidParameters,
                    "a keygen session carries nothing to sign"
                );
            }
            SessionKind::Sign(_) => {
                assert_throw!(
                    self.target.is_some(),
                    InvalidParameters,
                    "a signing session needs a target address"
                );
                let request = self.request.as_ref().ok_or_else(|| {
                    CoordError::InvalidParameters("a signing session needs a request".into())
                })?;
                assert_throw!(
                    !request.id.is_empty(),
                    InvalidParameters,
                    "the signing request needs an id"
                );
            }
        }
        Ok(())
    }
}

/// The coordination server's view of a session, as returned by a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub key: SessionKey,
    pub kind: SessionKind,
    pub params: SessionParams,
    pub phase: Phase,
    /// Party numbers issued so far, in signup order.
    pub participants: Vec<(PeerId, u16)>,
}

/// One protocol run as tracked locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub key: SessionKey,
    pub kind: SessionKind,
    pub params: SessionParams,
    pub phase: Phase,
    /// Grows monotonically until the session closes.
    pub participants: IndexMap<PeerId, u16>,
    pub departed: HashSet<PeerId>,
    pub finished: HashSet<PeerId>,
}

impl Session {
    pub fn new(key: SessionKey, kind: SessionKind, params: SessionParams) -> Self {
        Self {
            key,
            kind,
            params,
            phase: Phase::Created,
            participants: IndexMap::new(),
            departed: HashSet::new(),
            finished: HashSet::new(),
        }
    }

    pub fn from_descriptor(desc: &SessionDescriptor) -> Outcome<Self> {
        let mut session = Self::new(desc.key.clone(), desc.kind, desc.params.clone());
        for (peer, number) in desc.participants.iter() {
            session.admit(peer, *number)?;
        }
        Ok(session)
    }

    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            key: self.key.clone(),
            kind: self.kind,
            params: self.params.clone(),
            phase: self.phase,
            participants: self
                .participants
                .iter()
                .map(|(p, n)| (p.clone(), *n))
                .collect(),
        }
    }

    /// Next free party number, following the last signup.
    pub fn next_party_number(&self) -> u16 {
        self.participants.values().max().map_or(1, |n| n + 1)
    }

    /// Register a participant under an issued party number.
    ///
    /// Re-admitting a peer under its own number is a no-op.
    pub fn admit(&mut self, peer: &str, party_number: u16) -> Outcome<()> {
        let parties = self.params.parameters().parties;
        assert_throw!(
            party_number != 0,
            InvalidParameters,
            "party number may not be zero"
        );
        assert_throw!(
            party_number <= parties,
            InvalidParameters,
            "party number {party_number} is out of range 1..={parties}"
        );
        if let Some(existing) = self.participants.get(peer) {
            assert_throw!(
                *existing == party_number,
                InvalidParameters,
                "peer {peer} already holds party number {existing}"
            );
            return Ok(());
        }
        assert_throw!(
            !self.participants.values().any(|n| *n == party_number),
            InvalidParameters,
            "party number {party_number} already exists for session {}",
            self.key
        );
        self.participants.insert(peer.to_owned(), party_number);
        Ok(())
    }

    pub fn attending(&self) -> usize {
        self.participants
            .keys()
            .filter(|p| !self.departed.contains(*p))
            .count()
    }

    pub fn quorum(&self) -> usize {
        self.kind.quorum(&self.params.parameters())
    }

    pub fn has_quorum(&self) -> bool {
        self.attending() >= self.quorum()
    }

    /// Attending participants ordered by party number.
    pub fn roster(&self) -> Vec<(PeerId, u16)> {
        let mut roster: Vec<(PeerId, u16)> = self
            .participants
            .iter()
            .filter(|(p, _)| !self.departed.contains(*p))
            .map(|(p, n)| (p.clone(), *n))
            .collect();
        roster.sort_by_key(|(_, n)| *n);
        roster
    }
}
