//! Application State Manager: the only path by which an identity's
//! [`AppState`] changes.
//!
//! Mutations for one identity are serialized behind a per-identity writer
//! lock. `tokio::sync::Mutex` hands the lock out in FIFO order, so a second
//! concurrent `apply_session_result` or `clear` waits its turn and is applied
//! afterwards instead of being rejected.
//!
//! The remote store is the source of truth: every mutation starts from a fresh
//! `load`, and the in-memory snapshot only reflects what was last loaded or
//! successfully saved.

use crate::{
    exception::*,
    identity::Identity,
    state::{AppState, SessionFruit},
    store::StateStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct AppStateManager {
    store: Arc<dyn StateStore>,
    snapshots: Mutex<HashMap<Identity, AppState>>,
    writers: Mutex<HashMap<Identity, Arc<Mutex<()>>>>,
}

impl AppStateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            snapshots: Mutex::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Load the identity's state. Absence yields the empty state and nothing
    /// is written back, so a state that has not synced yet is never clobbered.
    ///
    /// Waits for a write in flight, so the snapshot never falls behind it.
    pub async fn load(&self, identity: &Identity) -> Outcome<AppState> {
        let writer = self.writer(identity).await;
        let _turn = writer.lock().await;
        self.reload(identity).await
    }

    /// Merge a completed session's output and persist it at once.
    ///
    /// On a failed write the in-memory snapshot is rolled back to the state
    /// loaded just before the merge and `PersistenceFailed` is returned.
    pub async fn apply_session_result(
        &self,
        identity: &Identity,
        fruit: &SessionFruit,
    ) -> Outcome<AppState> {
        let writer = self.writer(identity).await;
        let _turn = writer.lock().await;

        let before = self.reload(identity).await?;
        let mut merged = before.clone();
        merged.merge(fruit);
        self.write_through(identity, before, merged, &fruit.summary())
            .await
    }

    /// Reset to the empty state and persist; used on deactivation.
    pub async fn clear(&self, identity: &Identity) -> Outcome<()> {
        let writer = self.writer(identity).await;
        let _turn = writer.lock().await;

        let before = self.reload(identity).await?;
        self.write_through(identity, before, AppState::default(), "clear")
            .await?;
        Ok(())
    }

    /// Last loaded or saved state, without touching the store.
    pub async fn snapshot(&self, identity: &Identity) -> Option<AppState> {
        self.snapshots.lock().await.get(identity).cloned()
    }

    /// Fetch and record as the snapshot. Callers hold the writer lock.
    async fn reload(&self, identity: &Identity) -> Outcome<AppState> {
        let state = self.fetch(identity).await?;
        self.snapshots
            .lock()
            .await
            .insert(identity.clone(), state.clone());
        Ok(state)
    }

    async fn fetch(&self, identity: &Identity) -> Outcome<AppState> {
        match self.store.load(identity).await? {
            Some(state) => Ok(state),
            None => {
                debug!(%identity, "no stored state, using the empty state");
                Ok(AppState::default())
            }
        }
    }

    async fn write_through(
        &self,
        identity: &Identity,
        before: AppState,
        after: AppState,
        what: &str,
    ) -> Outcome<AppState> {
        self.snapshots
            .lock()
            .await
            .insert(identity.clone(), after.clone());
        match self.store.save(identity, &after).await {
            Ok(()) => {
                info!(%identity, what, "state persisted");
                Ok(after)
            }
            Err(err) => {
                warn!(%identity, what, %err, "persist failed, rolling back");
                self.snapshots
                    .lock()
                    .await
                    .insert(identity.clone(), before);
                Err(match err {
                    CoordError::PersistenceFailed(_) => err,
                    other => CoordError::PersistenceFailed(other.to_string()),
                })
            }
        }
    }

    async fn writer(&self, identity: &Identity) -> Arc<Mutex<()>> {
        self.writers
            .lock()
            .await
            .entry(identity.clone())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Address;
    use crate::state::{KeyShare, MessageProof, ShareMaterial};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn alice() -> Identity {
        "alice@example.com".parse().unwrap()
    }

    fn key_fruit(address: &str) -> SessionFruit {
        SessionFruit::KeyShare {
            address: address.parse::<Address>().unwrap(),
            share: KeyShare {
                label: format!("key {address}"),
                share: ShareMaterial::new(address.as_bytes().to_vec()),
            },
        }
    }

    /// Store whose writes can be made to fail, and which can stall writes to
    /// widen race windows.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
        stall: bool,
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        async fn load(&self, identity: &Identity) -> Outcome<Option<AppState>> {
            self.inner.load(identity).await
        }

        async fn save(&self, identity: &Identity, state: &AppState) -> Outcome<()> {
            if self.stall {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(CoordError::PersistenceFailed("store offline".into()));
            }
            self.inner.save(identity, state).await
        }
    }

    #[tokio::test]
    async fn load_of_unknown_identity_is_empty_and_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let manager = AppStateManager::new(store.clone());
        let state = manager.load(&alice()).await.unwrap();
        assert!(state.is_empty());
        assert_eq!(store.save_count(), 0);
        assert_eq!(store.load(&alice()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn saved_state_loads_back_equal() {
        let store = Arc::new(MemoryStore::new());
        let manager = AppStateManager::new(store.clone());
        let mut state = AppState::default();
        state.merge(&key_fruit("0xabc"));
        state.merge(&SessionFruit::MessageProof {
            message_id: "msg-1".into(),
            proof: MessageProof {
                address: "0xabc".parse().unwrap(),
                signature: vec![1, 2, 3],
            },
        });
        store.save(&alice(), &state).await.unwrap();
        assert_eq!(manager.load(&alice()).await.unwrap(), state);
    }

    #[tokio::test]
    async fn apply_persists_immediately() {
        let store = Arc::new(MemoryStore::new());
        let manager = AppStateManager::new(store.clone());
        let state = manager
            .apply_session_result(&alice(), &key_fruit("0xabc"))
            .await
            .unwrap();
        assert_eq!(state.key_shares.len(), 1);
        assert_eq!(store.load(&alice()).await.unwrap(), Some(state.clone()));
        assert_eq!(manager.snapshot(&alice()).await, Some(state));
    }

    #[tokio::test]
    async fn failed_write_rolls_back_memory() {
        let store = Arc::new(FlakyStore::default());
        let manager = AppStateManager::new(store.clone());
        let first = manager
            .apply_session_result(&alice(), &key_fruit("0x01"))
            .await
            .unwrap();

        store.failing.store(true, Ordering::SeqCst);
        let err = manager
            .apply_session_result(&alice(), &key_fruit("0x02"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::PersistenceFailed(_)));
        assert_eq!(manager.snapshot(&alice()).await, Some(first.clone()));
        assert_eq!(store.load(&alice()).await.unwrap(), Some(first));

        // The manager stays usable once the store recovers.
        store.failing.store(false, Ordering::SeqCst);
        let state = manager
            .apply_session_result(&alice(), &key_fruit("0x02"))
            .await
            .unwrap();
        assert_eq!(state.key_shares.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_applies_are_serialized() {
        let store = Arc::new(FlakyStore {
            stall: true,
            ..Default::default()
        });
        let manager = Arc::new(AppStateManager::new(store.clone()));
        let mut handles = Vec::new();
        for i in 1..=8u8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let address = format!("0x{i:02x}");
                manager
                    .apply_session_result(&alice(), &key_fruit(&address))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let stored = store.load(&alice()).await.unwrap().unwrap();
        assert_eq!(stored.key_shares.len(), 8);
    }

    #[tokio::test]
    async fn reapplying_a_result_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let manager = AppStateManager::new(store.clone());
        let fruit = key_fruit("0xabc");
        let once = manager.apply_session_result(&alice(), &fruit).await.unwrap();
        let twice = manager.apply_session_result(&alice(), &fruit).await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn apply_starts_from_the_store_not_the_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let device_a = AppStateManager::new(store.clone());
        let device_b = AppStateManager::new(store.clone());
        device_a.load(&alice()).await.unwrap();
        device_b
            .apply_session_result(&alice(), &key_fruit("0x0b"))
            .await
            .unwrap();
        let state = device_a
            .apply_session_result(&alice(), &key_fruit("0x0a"))
            .await
            .unwrap();
        assert_eq!(state.key_shares.len(), 2);
    }

    #[tokio::test]
    async fn load_waits_for_a_write_in_flight() {
        let store = Arc::new(FlakyStore {
            stall: true,
            ..Default::default()
        });
        let manager = Arc::new(AppStateManager::new(store.clone()));
        let writing = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .apply_session_result(&alice(), &key_fruit("0xabc"))
                    .await
            })
        };
        // Let the write take its turn and stall in the store.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let loaded = manager.load(&alice()).await.unwrap();
        let written = writing.await.unwrap().unwrap();
        assert_eq!(loaded, written);
        assert_eq!(manager.snapshot(&alice()).await, Some(written));
    }

    #[tokio::test]
    async fn failed_clear_keeps_the_stored_state() {
        let store = Arc::new(FlakyStore::default());
        let stored = AppStateManager::new(store.clone())
            .apply_session_result(&alice(), &key_fruit("0xabc"))
            .await
            .unwrap();

        // A fresh manager has no snapshot to roll back to.
        let manager = AppStateManager::new(store.clone());
        store.failing.store(true, Ordering::SeqCst);
        let err = manager.clear(&alice()).await.unwrap_err();
        assert!(matches!(err, CoordError::PersistenceFailed(_)));
        assert_eq!(manager.snapshot(&alice()).await, Some(stored.clone()));
        assert_eq!(store.load(&alice()).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn clear_resets_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let manager = AppStateManager::new(store.clone());
        manager
            .apply_session_result(&alice(), &key_fruit("0xabc"))
            .await
            .unwrap();
        manager.clear(&alice()).await.unwrap();
        assert_eq!(store.load(&alice()).await.unwrap(), Some(AppState::default()));
        assert_eq!(manager.snapshot(&alice()).await, Some(AppState::default()));
    }
}
