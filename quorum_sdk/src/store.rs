use crate::{exception::*, identity::Identity, state::AppState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Remote store holding one [`AppState`] per identity.
///
/// Shared across processes and devices; it is the source of truth.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// `None` when nothing was ever saved for `identity`.
    async fn load(&self, identity: &Identity) -> Outcome<Option<AppState>>;

    async fn save(&self, identity: &Identity, state: &AppState) -> Outcome<()>;
}

/// Process-local store, used when no remote backend is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<Identity, AppState>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, identity: &Identity) -> Outcome<Option<AppState>> {
        Ok(self.states.lock().await.get(identity).cloned())
    }

    async fn save(&self, identity: &Identity, state: &AppState) -> Outcome<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.states
            .lock()
            .await
            .insert(identity.clone(), state.clone());
        Ok(())
    }
}
