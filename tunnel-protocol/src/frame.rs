use serde::{Deserialize, Serialize};

use crate::{Base64Body, ForwardConfig, TunnelInfo};

/// The four message shapes carried on a multiplexed stream, plus the
/// keepalive pair. Serialized as newline-delimited JSON with an internally
/// tagged `"type"` field, matching the style of the teacher's own
/// `WsMessage` enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame on a session: the client's credentials and requested forwards.
    AuthRequest {
        token: String,
        forwards: Vec<ForwardConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },

    /// The server's reply to `AuthRequest`, closing the auth stream either way.
    AuthResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tunnels: Option<Vec<TunnelInfo>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// One inbound public request, written by the server and read by the client.
    RequestFrame {
        id: String,
        subdomain: String,
        method: String,
        /// Path and query exactly as received, including the leading `/`.
        path: String,
        /// Header name case preserved; may contain duplicate names.
        headers: Vec<(String, String)>,
        body: Base64Body,
    },

    /// The client's answer to a `RequestFrame`, correlated by `id`.
    ResponseFrame {
        id: String,
        status: u16,
        headers: Vec<(String, String)>,
        body: Base64Body,
    },

    /// Keepalive ping, sent by the server on a dedicated stream every 30s.
    Ping,
    /// Keepalive reply.
    Pong,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::AuthRequest { .. } => "auth_request",
            Frame::AuthResponse { .. } => "auth_response",
            Frame::RequestFrame { .. } => "request_frame",
            Frame::ResponseFrame { .. } => "response_frame",
            Frame::Ping => "ping",
            Frame::Pong => "pong",
        }
    }
}
