//! Identity-proof boundary: activity checks, proof requests and sign-out.

use crate::{
    assert_throw, exception::*, manager::AppStateManager, route::SessionRoute,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Email-linked principal. Keys the remote state and the activity checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identity {
    type Err = CoordError;

    fn from_str(s: &str) -> Outcome<Self> {
        let email = s.trim().to_ascii_lowercase();
        let (local, domain) = email
            .split_once('@')
            .ok_or_else(|| CoordError::InvalidParameters(format!("«{s}» is not an email")))?;
        assert_throw!(
            !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
            InvalidParameters,
            "«{s}» is not an email"
        );
        assert_throw!(
            !email.chars().any(char::is_whitespace),
            InvalidParameters,
            "«{s}» contains whitespace"
        );
        Ok(Identity(email))
    }
}

impl TryFrom<String> for Identity {
    type Error = CoordError;

    fn try_from(s: String) -> Outcome<Self> {
        s.parse()
    }
}

impl From<Identity> for String {
    fn from(i: Identity) -> String {
        i.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait IdentityProof: Send + Sync {
    async fn is_active(&self, identity: &Identity) -> Outcome<bool>;

    async fn deactivate(&self, identity: &Identity) -> Outcome<()>;

    /// Trigger out-of-band proof delivery; the proof leads back to `return_path`.
    async fn request_proof(&self, identity: &Identity, return_path: &str) -> Outcome<()>;
}

/// Periodic activity poll. Dropping the watch cancels the poll.
pub struct ActivityWatch {
    state: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl ActivityWatch {
    pub fn spawn(service: Arc<dyn IdentityProof>, identity: Identity, every: Duration) -> Self {
        let (tx, state) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match service.is_active(&identity).await {
                    Ok(active) => {
                        tx.send_if_modified(|current| {
                            let changed = *current != active;
                            *current = active;
                            changed
                        });
                    }
                    Err(err) => {
                        warn!(%identity, %err, "activity check failed, keeping last value");
                    }
                }
                if tx.is_closed() {
                    debug!(%identity, "activity watch dropped");
                    break;
                }
            }
        });
        Self { state, task }
    }

    pub fn is_active(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait for the next change; `None` once the poll has stopped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.state.changed().await.ok()?;
        Some(*self.state.borrow())
    }
}

impl Drop for ActivityWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Identity is active; continue to the route at once.
    Proceed(SessionRoute),
    /// A proof was sent; following it returns to `return_path`.
    ProofRequested { return_path: String },
}

/// Resolves whether a session entry point may be entered right away.
///
/// Activity is checked first. An active identity proceeds immediately; an
/// inactive one gets a proof request whose return path is the canonical path
/// of the validated route, never a caller-supplied target.
pub struct EntryGate {
    service: Arc<dyn IdentityProof>,
}

impl EntryGate {
    pub fn new(service: Arc<dyn IdentityProof>) -> Self {
        Self { service }
    }

    pub async fn admit(&self, identity: &Identity, route: &SessionRoute) -> Outcome<Admission> {
        if self.service.is_active(identity).await? {
            debug!(%identity, %route, "identity active, proceeding");
            return Ok(Admission::Proceed(route.clone()));
        }
        let return_path = route.to_path();
        self.service.request_proof(identity, &return_path).await?;
        info!(%identity, %return_path, "identity proof requested");
        Ok(Admission::ProofRequested { return_path })
    }
}

/// Deactivate the identity and reset its persisted state.
pub async fn sign_out(
    service: &dyn IdentityProof,
    states: &AppStateManager,
    identity: &Identity,
) -> Outcome<()> {
    service.deactivate(identity).await?;
    states.clear(identity).await?;
    info!(%identity, "signed out");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{KeyShare, SessionFruit, ShareMaterial};
    use crate::store::{MemoryStore, StateStore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeProofs {
        active: AtomicBool,
        checks: AtomicUsize,
        requested: Mutex<Vec<(Identity, String)>>,
    }

    #[async_trait]
    impl IdentityProof for FakeProofs {
        async fn is_active(&self, _identity: &Identity) -> Outcome<bool> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.active.load(Ordering::SeqCst))
        }

        async fn deactivate(&self, _identity: &Identity) -> Outcome<()> {
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn request_proof(&self, identity: &Identity, return_path: &str) -> Outcome<()> {
            self.requested
                .lock()
                .await
                .push((identity.clone(), return_path.to_owned()));
            Ok(())
        }
    }

    fn bob() -> Identity {
        " Bob@Example.com ".parse().unwrap()
    }

    #[test]
    fn identity_is_normalized_email() {
        assert_eq!(bob().as_str(), "bob@example.com");
        assert!("bob".parse::<Identity>().is_err());
        assert!("@example.com".parse::<Identity>().is_err());
        assert!("a@b@c".parse::<Identity>().is_err());
        assert!("a b@c".parse::<Identity>().is_err());
    }

    #[tokio::test]
    async fn active_identity_proceeds_without_proof() {
        let proofs = Arc::new(FakeProofs::default());
        proofs.active.store(true, Ordering::SeqCst);
        let gate = EntryGate::new(proofs.clone());
        let route = SessionRoute::parse("/keys/join/g1/s1").unwrap();
        let admission = gate.admit(&bob(), &route).await.unwrap();
        assert_eq!(admission, Admission::Proceed(route));
        assert!(proofs.requested.lock().await.is_empty());
    }

    #[tokio::test]
    async fn inactive_identity_gets_proof_back_to_route() {
        let proofs = Arc::new(FakeProofs::default());
        let gate = EntryGate::new(proofs.clone());
        let route = SessionRoute::parse("#/keys/0xABC/sign/join/message/g1/s1").unwrap();
        let admission = gate.admit(&bob(), &route).await.unwrap();
        let expected = "/keys/0xabc/sign/join/message/g1/s1".to_string();
        assert_eq!(
            admission,
            Admission::ProofRequested {
                return_path: expected.clone()
            }
        );
        assert_eq!(*proofs.requested.lock().await, vec![(bob(), expected)]);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_polls_until_dropped() {
        let proofs = Arc::new(FakeProofs::default());
        let mut watch =
            ActivityWatch::spawn(proofs.clone(), bob(), Duration::from_secs(30));
        assert!(!watch.is_active());

        proofs.active.store(true, Ordering::SeqCst);
        assert_eq!(watch.changed().await, Some(true));
        assert!(watch.is_active());

        let checks = proofs.checks.load(Ordering::SeqCst);
        drop(watch);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(proofs.checks.load(Ordering::SeqCst), checks);
    }

    #[tokio::test]
    async fn sign_out_deactivates_and_clears() {
        let proofs = FakeProofs::default();
        proofs.active.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryStore::new());
        let states = AppStateManager::new(store.clone());
        states
            .apply_session_result(
                &bob(),
                &SessionFruit::KeyShare {
                    address: "0xabc".parse().unwrap(),
                    share: KeyShare {
                        label: "main".into(),
                        share: ShareMaterial::new(vec![1]),
                    },
                },
            )
            .await
            .unwrap();
        sign_out(&proofs, &states, &bob()).await.unwrap();
        assert!(!proofs.active.load(Ordering::SeqCst));
        assert!(store.load(&bob()).await.unwrap().unwrap().is_empty());
    }
}
