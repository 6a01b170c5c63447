//! QUIC transport layer for CSI messages.
//!
//! This module provides [`CsiClient`] and [`CsiServer`] that communicate
//! [`CsiMessage`] values over QUIC bi-directional streams using `quinn`.
//! A stream carries one JSON-encoded request, then one JSON-encoded response;
//! each side finishes its send half to mark the end of its message.

pub mod client;
pub mod server;

pub use client::CsiClient;
pub use server::{CsiServer, ServiceMode};

use crate::error::CsiError;
use crate::message::CsiMessage;

/// Largest encoded message either side will read.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Read one whole message from `recv`.
pub(crate) async fn read_message(recv: &mut quinn::RecvStream) -> Result<CsiMessage, CsiError> {
    let buf = recv
        .read_to_end(MAX_MESSAGE_SIZE)
        .await
        .map_err(CsiError::transport)?;
    serde_json::from_slice(&buf)
        .map_err(|e| CsiError::TransportError(format!("malformed message: {e}")))
}

/// Write `msg` to `send` and finish the stream.
pub(crate) async fn write_message(
    send: &mut quinn::SendStream,
    msg: &CsiMessage,
) -> Result<(), CsiError> {
    let payload = serde_json::to_vec(msg).map_err(CsiError::internal)?;
    send.write_all(&payload)
        .await
        .map_err(CsiError::transport)?;
    send.finish().map_err(CsiError::transport)
}
