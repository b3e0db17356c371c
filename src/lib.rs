//! Resilient streaming connection client for realtime chat rooms.
//!
//! The crate is organized by concern:
//! - `stream`: websocket client, endpoint/credential handling, callbacks,
//!   options, and the connection state machine.
//! - `retry`: reconnect policy and timeout utilities.

/// Reconnect policy and timeout helpers.
pub mod retry;
/// Realtime stream client and its supporting types.
pub mod stream;
