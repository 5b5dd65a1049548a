//! # Tunnel Wire Protocol
//!
//! Shared types for the reverse-tunnel control and data plane: the frame
//! shapes carried over a multiplexed stream, the newline-delimited JSON
//! codec, and the `ForwardConfig` validation rules an `AuthRequest` must
//! satisfy before a session is admitted.
//!
//! This crate is intentionally transport-agnostic — it knows nothing about
//! TCP, TLS, or stream multiplexing. `server` and `client` each layer their
//! own transport underneath it, so both sides share one definition of what
//! a frame *is* instead of hand-duplicating the enum (as the server and
//! client `protocol.rs` files used to).

mod body;
mod codec;
mod forward;
mod frame;
mod validate;

pub use body::Base64Body;
pub use codec::{decode, encode, ProtocolError};
pub use forward::{ForwardConfig, TunnelInfo};
pub use frame::Frame;
pub use validate::{validate_auth_request, ValidationError};
