//! Peer process around `quorum_sdk`: configuration, sqlite persistence and
//! the wiring of a coordinator for one identity.

pub mod commands;
pub mod config;
pub mod persist;

use config::PeerConfig;
use persist::{SessionJournal, SqliteStateStore};
use quorum_sdk::exception::*;
use quorum_sdk::{
    AppStateManager, ChannelEvent, ComputeEngine, DuplexChannel, Identity, SessionCoordinator,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything a peer opens once at startup.
pub struct PeerContext {
    pub conf: PeerConfig,
    pub store: Arc<SqliteStateStore>,
    pub journal: Arc<SessionJournal>,
    pub states: Arc<AppStateManager>,
}

impl PeerContext {
    pub async fn open(conf: PeerConfig) -> Outcome<Self> {
        let pool = persist::connect(&conf.peer.SqlitePath).await?;
        let store = Arc::new(SqliteStateStore::new(pool.clone()));
        let journal = Arc::new(SessionJournal::new(pool));
        let states = Arc::new(AppStateManager::new(store.clone()));
        Ok(Self {
            conf,
            store,
            journal,
            states,
        })
    }

    /// A coordinator for `identity` using the configured timeouts, journaling
    /// into this peer's database.
    pub fn coordinator(
        &self,
        identity: Identity,
        channel: Arc<dyn DuplexChannel>,
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
        engine: Arc<dyn ComputeEngine>,
    ) -> SessionCoordinator {
        SessionCoordinator::new(
            &self.conf.peer.PeerId,
            identity,
            channel,
            inbound,
            engine,
            self.states.clone(),
        )
        .with_settings(self.conf.settings())
        .with_journal(self.journal.clone())
    }
}
