//! Session coordination and application-state sync for threshold key
//! management.
//!
//! A [`SessionCoordinator`] drives key-generation and signing sessions over a
//! [`DuplexChannel`], hands the math to a [`ComputeEngine`], and merges every
//! completed session into the identity's [`AppState`] through the
//! [`AppStateManager`].

pub mod exception;
pub mod util;

pub mod channel;
pub mod coordinator;
pub mod engine;
pub mod identity;
pub mod loopback;
pub mod manager;
pub mod route;
pub mod session;
pub mod state;
pub mod store;

pub use channel::{ChannelEvent, ChannelMessage, DuplexChannel};
pub use coordinator::{
    CoordinatorEvent, CoordinatorSettings, SessionCoordinator, SessionLog, SessionReport,
};
pub use engine::{
    ComputationError, ComputationOutput, ComputationResult, ComputeEngine, OperationInput,
    OperationKind, PeerMessage,
};
pub use exception::{CoordError, Outcome};
pub use identity::{sign_out, ActivityWatch, Admission, EntryGate, Identity, IdentityProof};
pub use loopback::{LoopbackChannel, LoopbackHub};
pub use manager::AppStateManager;
pub use route::{Address, SessionRoute};
pub use session::{
    Parameters, Phase, PeerId, Session, SessionDescriptor, SessionKey, SessionKind,
    SessionParams, SignRequest, SigningType,
};
pub use state::{
    AppState, KeyShare, MessageProof, SessionFruit, ShareMaterial, TransactionReceipt,
};
pub use store::{MemoryStore, StateStore};
