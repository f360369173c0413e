//! The persisted application state of one identity and the session results
//! ("fruits") merged into it.

use crate::{exception::*, route::Address};
use indexmap::IndexMap;
use quorum_proto::protogen::quorum::{self as pb, session_fruit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque key material produced by the computation engine.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct ShareMaterial(#[serde(with = "hex::serde")] Vec<u8>);

impl ShareMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ShareMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareMaterial(<{} bytes>)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShare {
    pub label: String,
    pub share: ShareMaterial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProof {
    pub address: Address,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub address: Address,
    #[serde(with = "hex::serde")]
    pub receipt: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    /// Insertion order is kept for display.
    #[serde(default)]
    pub key_shares: IndexMap<Address, KeyShare>,
    #[serde(default)]
    pub message_proofs: BTreeMap<String, MessageProof>,
    #[serde(default)]
    pub transaction_receipts: BTreeMap<String, TransactionReceipt>,
}

impl AppState {
    pub fn is_empty(&self) -> bool {
        self.key_shares.is_empty()
            && self.message_proofs.is_empty()
            && self.transaction_receipts.is_empty()
    }

    pub fn has_key_share(&self, address: &Address) -> bool {
        self.key_shares.contains_key(address)
    }

    /// Merge a session result. Entries are keyed, so merging the same fruit
    /// twice leaves the state as merging it once; an existing entry under the
    /// same key is overwritten.
    pub fn merge(&mut self, fruit: &SessionFruit) {
        match fruit {
            SessionFruit::KeyShare { address, share } => {
                // IndexMap::insert keeps the original slot of an existing key.
                self.key_shares.insert(address.clone(), share.clone());
            }
            SessionFruit::MessageProof { message_id, proof } => {
                self.message_proofs.insert(message_id.clone(), proof.clone());
            }
            SessionFruit::TransactionReceipt { tx_id, receipt } => {
                self.transaction_receipts
                    .insert(tx_id.clone(), receipt.clone());
            }
        }
    }
}

/// Output of a completed session, ready to be merged into [`AppState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFruit {
    KeyShare {
        address: Address,
        share: KeyShare,
    },
    MessageProof {
        message_id: String,
        proof: MessageProof,
    },
    TransactionReceipt {
        tx_id: String,
        receipt: TransactionReceipt,
    },
}

impl SessionFruit {
    /// Short description for logs; never includes key material.
    pub fn summary(&self) -> String {
        match self {
            SessionFruit::KeyShare { address, share } => {
                format!("key share {} «{}»", address, share.label)
            }
            SessionFruit::MessageProof { message_id, proof } => {
                format!("message proof {} by {}", message_id, proof.address)
            }
            SessionFruit::TransactionReceipt { tx_id, receipt } => {
                format!("transaction receipt {} by {}", tx_id, receipt.address)
            }
        }
    }
}

impl From<&SessionFruit> for pb::SessionFruit {
    fn from(fruit: &SessionFruit) -> Self {
        let value = match fruit {
            SessionFruit::KeyShare { address, share } => {
                session_fruit::Value::KeyShare(pb::KeyShareFruit {
                    address: address.to_string(),
                    label: share.label.clone(),
                    share: share.share.as_bytes().to_vec(),
                })
            }
            SessionFruit::MessageProof { message_id, proof } => {
                session_fruit::Value::MessageProof(pb::MessageProofFruit {
                    message_id: message_id.clone(),
                    address: proof.address.to_string(),
                    signature: proof.signature.clone(),
                })
            }
            SessionFruit::TransactionReceipt { tx_id, receipt } => {
                session_fruit::Value::TransactionReceipt(pb::TransactionReceiptFruit {
                    tx_id: tx_id.clone(),
                    address: receipt.address.to_string(),
                    receipt: receipt.receipt.clone(),
                })
            }
        };
        pb::SessionFruit { value: Some(value) }
    }
}

impl TryFrom<pb::SessionFruit> for SessionFruit {
    type Error = CoordError;

    fn try_from(fruit: pb::SessionFruit) -> Outcome<Self> {
        match fruit.value {
            Some(session_fruit::Value::KeyShare(ks)) => Ok(SessionFruit::KeyShare {
                address: ks.address.parse()?,
                share: KeyShare {
                    label: ks.label,
                    share: ShareMaterial::new(ks.share),
                },
            }),
            Some(session_fruit::Value::MessageProof(mp)) => Ok(SessionFruit::MessageProof {
                message_id: mp.message_id,
                proof: MessageProof {
                    address: mp.address.parse()?,
                    signature: mp.signature,
                },
            }),
            Some(session_fruit::Value::TransactionReceipt(tr)) => {
                Ok(SessionFruit::TransactionReceipt {
                    tx_id: tr.tx_id,
                    receipt: TransactionReceipt {
                        address: tr.address.parse()?,
                        receipt: tr.receipt,
                    },
                })
            }
            None => Err(CoordError::InvalidParameters(
                "session fruit carries no value".into(),
            )),
        }
    }
}
