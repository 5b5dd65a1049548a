//! Headless reverse-tunnel agent library. `main.rs` is a thin CLI wrapper
//! around [`supervisor::run`]; the modules here are also exercised directly
//! by integration tests.
//!
//! ## Module organization
//!
//! - [`config`]     — CLI/env configuration, including `--forward` parsing
//! - [`transport`]  — TLS dial and the client side of the multiplexer
//! - [`framing`]    — newline-delimited frame I/O over a mux stream
//! - [`handshake`]  — the registration exchange (spec.md §4.3)
//! - [`forwarder`]  — accepts edge-opened streams, forwards to local services
//! - [`supervisor`] — the reconnect state machine (spec.md §4.7)
//! - [`events`]     — the narrow event stream a CLI consumer logs

pub mod config;
pub mod events;
pub mod forwarder;
pub mod framing;
pub mod handshake;
pub mod supervisor;
pub mod transport;
