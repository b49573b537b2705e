//! # luxd-rpc
//!
//! Streaming RPC transport between the luxd daemon and its clients: one
//! [`RpcConnection`] per socket, carrying opaque serialized messages
//! framed by the 4-byte `luxd-codec` header.
//!
//! The connection registers with a `SelectServer` for read readiness,
//! accumulates whatever the socket delivers, and dispatches every
//! complete frame to the registered [`RpcHandler`]. Outbound frames are
//! written eagerly; when the socket will not take more, the remainder is
//! queued and the connection rides write readiness until flushed.

pub mod connection;

pub use connection::{FrameSender, RpcConnection, RpcError, RpcHandler, MAX_FRAME_PAYLOAD};
