#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerJoined {
    #[prost(string, tag = "1")]
    pub peer_id: ::prost::alloc::string::String,
    /// 0 means unset
    #[prost(uint32, tag = "2")]
    pub party_number: u32,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerLeft {
    #[prost(string, tag = "1")]
    pub peer_id: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Abort {
    #[prost(string, tag = "1")]
    pub peer_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ComputationInput {
    #[prost(string, tag = "1")]
    pub src: ::prost::alloc::string::String,
    /// "" means broadcast to every session member
    #[prost(string, tag = "2")]
    pub dst: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub body: ::prost::alloc::vec::Vec<u8>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ComputationOutput {
    #[prost(string, tag = "1")]
    pub peer_id: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub digest: ::prost::alloc::vec::Vec<u8>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelEnvelope {
    #[prost(string, tag = "1")]
    pub group_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(oneof = "channel_envelope::Body", tags = "3, 4, 5, 6, 7")]
    pub body: ::core::option::Option<channel_envelope::Body>,
}
/// Nested message and enum types in `ChannelEnvelope`.
pub mod channel_envelope {
    #[allow(clippy::derive_partial_eq_without_eq)]
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "3")]
        PeerJoined(super::PeerJoined),
        #[prost(message, tag = "4")]
        PeerLeft(super::PeerLeft),
        #[prost(message, tag = "5")]
        Abort(super::Abort),
        #[prost(message, tag = "6")]
        ComputationInput(super::ComputationInput),
        #[prost(message, tag = "7")]
        ComputationOutput(super::ComputationOutput),
    }
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct KeyShareFruit {
    #[prost(string, tag = "1")]
    pub address: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub label: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    #[serde(skip)]
    pub share: ::prost::alloc::vec::Vec<u8>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct MessageProofFruit {
    #[prost(string, tag = "1")]
    pub message_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub address: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub signature: ::prost::alloc::vec::Vec<u8>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct TransactionReceiptFruit {
    #[prost(string, tag = "1")]
    pub tx_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub address: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub receipt: ::prost::alloc::vec::Vec<u8>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct SessionFruit {
    #[prost(oneof = "session_fruit::Value", tags = "1, 2, 3")]
    pub value: ::core::option::Option<session_fruit::Value>,
}
/// Nested message and enum types in `SessionFruit`.
pub mod session_fruit {
    #[allow(clippy::derive_partial_eq_without_eq)]
    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize, serde::Deserialize)]
    pub enum Value {
        /// keygen result
        #[prost(message, tag = "1")]
        KeyShare(super::KeyShareFruit),
        /// sign-message result
        #[prost(message, tag = "2")]
        MessageProof(super::MessageProofFruit),
        /// sign-transaction result
        #[prost(message, tag = "3")]
        TransactionReceipt(super::TransactionReceiptFruit),
    }
}
