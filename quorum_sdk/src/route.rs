//! Route-addressable session entry points.
//!
//! Two shapes are accepted, with or without a leading `#`:
//!
//! ```text
//! /keys/join/{groupId}/{sessionId}
//! /keys/{address}/sign/join/{signingType}/{groupId}/{sessionId}
//! ```
//!
//! These identifiers are the only state that survives in a URL, so every
//! segment is validated before it reaches the coordinator.

use crate::{
    assert_throw,
    exception::*,
    session::{SessionKey, SessionKind, SigningType},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wallet address, `0x` followed by up to 40 hex digits. Stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = CoordError;

    fn from_str(s: &str) -> Outcome<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| CoordError::InvalidParameters(format!("address «{s}» lacks 0x")))?;
        assert_throw!(
            !digits.is_empty() && digits.len() <= 40,
            InvalidParameters,
            "address «{s}» has a bad length"
        );
        assert_throw!(
            digits.chars().all(|c| c.is_ascii_hexdigit()),
            InvalidParameters,
            "address «{s}» is not hex"
        );
        Ok(Address(format!("0x{}", digits.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Address {
    type Error = CoordError;

    fn try_from(s: String) -> Outcome<Self> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(a: Address) -> String {
        a.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRoute {
    JoinKeygen {
        key: SessionKey,
    },
    JoinSign {
        address: Address,
        signing_type: SigningType,
        key: SessionKey,
    },
}

impl SessionRoute {
    pub fn parse(path: &str) -> Outcome<Self> {
        let path = path.strip_prefix('#').unwrap_or(path);
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["keys", "join", group_id, session_id] => Ok(SessionRoute::JoinKeygen {
                key: SessionKey::new(group_id, session_id)?,
            }),
            ["keys", address, "sign", "join", signing_type, group_id, session_id] => {
                Ok(SessionRoute::JoinSign {
                    address: address.parse()?,
                    signing_type: signing_type.parse()?,
                    key: SessionKey::new(group_id, session_id)?,
                })
            }
            _ => Err(CoordError::InvalidParameters(format!(
                "«{path}» is not a session entry point"
            ))),
        }
    }

    pub fn key(&self) -> &SessionKey {
        match self {
            SessionRoute::JoinKeygen { key } => key,
            SessionRoute::JoinSign { key, .. } => key,
        }
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            SessionRoute::JoinKeygen { .. } => SessionKind::Keygen,
            SessionRoute::JoinSign { signing_type, .. } => SessionKind::Sign(*signing_type),
        }
    }

    pub fn address(&self) -> Option<&Address> {
        match self {
            SessionRoute::JoinKeygen { .. } => None,
            SessionRoute::JoinSign { address, .. } => Some(address),
        }
    }

    /// Canonical path, also used as the return path for identity proofs.
    pub fn to_path(&self) -> String {
        match self {
            SessionRoute::JoinKeygen { key } => {
                format!("/keys/join/{}/{}", key.group_id, key.session_id)
            }
            SessionRoute::JoinSign {
                address,
                signing_type,
                key,
            } => format!(
                "/keys/{}/sign/join/{}/{}/{}",
                address,
                signing_type.as_str(),
                key.group_id,
                key.session_id
            ),
        }
    }
}

impl fmt::Display for SessionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}
