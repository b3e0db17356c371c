//! Realtime stream modules.
//!
//! - `client`: websocket transport, outbound queue, and reconnect handling.
//! - `endpoint`: session endpoint addressing and credential placement.
//! - `handlers`: consumer callbacks and their channel form.
//! - `options`: reconnect, handshake, and credential configuration.
//! - `state`: connection state and lifecycle transitions.

/// Websocket connection client.
pub mod client;
/// Session endpoint and bearer credential.
pub mod endpoint;
/// Consumer callback slots.
pub mod handlers;
/// Connection client configuration.
pub mod options;
/// Connection state machine.
pub mod state;
