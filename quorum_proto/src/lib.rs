//! Wire messages shared by the coordination channel and the peer's session journal.
//!
//! `protogen` is checked-in prost output for `proto/quorum.proto`.

pub mod prelude {
    pub use prost;
    pub use prost::Message;
}

pub mod protogen {
    pub mod quorum;
}
