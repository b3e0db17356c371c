//! Resilient websocket connection client.
//!
//! The client owns one logical session with a remote endpoint. `connect`
//! spawns a background worker that performs the handshake, delivers inbound
//! frames to the registered handlers, writes outbound frames, and reconnects
//! after unexpected closures until the attempt budget runs out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::retry::{with_timeout, ReconnectPolicy};
use crate::stream::endpoint::{Credential, SessionEndpoint};
use crate::stream::handlers::ConnectionHandlers;
use crate::stream::options::ConnectionOptions;
use crate::stream::state::{
    AfterClose, ConnectRequest, ConnectionState, DisconnectOutcome, Lifecycle,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors produced by connection setup and the public client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Endpoint could not be parsed as a URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// Endpoint does not use `ws` or `wss`.
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// Credential could not be converted to a valid HTTP header value.
    #[error("invalid credential header: {0}")]
    InvalidCredentialHeader(#[from] InvalidHeaderValue),

    /// Websocket transport or handshake error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Operation needs an open connection.
    #[error("connection is not open (state: {0})")]
    NotOpen(ConnectionState),

    /// Worker stopped accepting outbound messages.
    #[error("send queue is closed")]
    SendQueueClosed,

    /// Client gave up reconnecting; `disconnect` it before connecting again.
    #[error("connection failed permanently; disconnect before reconnecting")]
    Failed,

    /// `connect` was called outside a tokio runtime.
    #[error("no tokio runtime available to run the connection")]
    NoRuntime,
}

impl ClientError {
    /// HTTP status when the server refused the credential during the upgrade.
    pub fn credential_rejection_status(&self) -> Option<u16> {
        match self {
            ClientError::WebSocket(WsError::Http(response)) => {
                let status = response.status().as_u16();
                matches!(status, 401 | 403).then_some(status)
            }
            _ => None,
        }
    }
}

/// State shared between the client handle and its worker.
struct Shared {
    lifecycle: Lifecycle,
    handlers: ConnectionHandlers,
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Thread currently running `on_message`, if any.
    delivering_on: Option<ThreadId>,
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes message delivery against `disconnect`.
///
/// The worker holds it for the whole `on_message` call, and `disconnect`
/// takes it before changing state, so no payload reaches the consumer once
/// `disconnect` has returned. A handler that calls `disconnect` itself
/// already holds the gate and skips it.
#[derive(Default)]
struct DeliveryGate(Mutex<()>);

impl DeliveryGate {
    fn enter(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears `delivering_on` even if the handler panics.
struct DeliveringMark<'a>(&'a Mutex<Shared>);

impl Drop for DeliveringMark<'_> {
    fn drop(&mut self) {
        lock_shared(self.0).delivering_on = None;
    }
}

/// Client for one streaming session, with bounded automatic reconnect.
///
/// Operations never block; outcomes are reported through the
/// [`ConnectionHandlers`] registered on [`connect`](Self::connect).
///
/// ```rust,no_run
/// use chat_link::stream::client::ConnectionClient;
/// use chat_link::stream::endpoint::{Credential, SessionEndpoint, LOCAL_CHAT_ENDPOINT};
/// use chat_link::stream::handlers::ConnectionHandlers;
///
/// # async fn run() -> Result<(), chat_link::stream::client::ClientError> {
/// let endpoint = SessionEndpoint::for_room(LOCAL_CHAT_ENDPOINT, "global")?;
/// let client = ConnectionClient::new(endpoint, Credential::new("access-token"));
/// client.connect(ConnectionHandlers::new().on_message(|text| println!("{text}")))?;
/// // later, once open:
/// client.send_message("hello")?;
/// client.disconnect();
/// # Ok(())
/// # }
/// ```
pub struct ConnectionClient {
    endpoint: SessionEndpoint,
    credential: Credential,
    options: ConnectionOptions,
    shared: Arc<Mutex<Shared>>,
    gate: Arc<DeliveryGate>,
}

impl ConnectionClient {
    /// Creates an idle client with default options. Performs no I/O.
    pub fn new(endpoint: SessionEndpoint, credential: Credential) -> Self {
        Self::with_options(endpoint, credential, ConnectionOptions::default())
    }

    /// Creates an idle client with explicit options. Performs no I/O.
    pub fn with_options(
        endpoint: SessionEndpoint,
        credential: Credential,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            endpoint,
            credential,
            options,
            shared: Arc::new(Mutex::new(Shared {
                lifecycle: Lifecycle::new(),
                handlers: ConnectionHandlers::default(),
                outbound: None,
                delivering_on: None,
            })),
            gate: Arc::new(DeliveryGate::default()),
        }
    }

    /// Endpoint this client connects to.
    pub fn endpoint(&self) -> &SessionEndpoint {
        &self.endpoint
    }

    /// Options this client was built with.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        lock_shared(&self.shared).lifecycle.state()
    }

    /// Reconnect attempts spent since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        lock_shared(&self.shared).lifecycle.reconnect_attempts()
    }

    /// Starts the connection worker on the current tokio runtime.
    ///
    /// The handlers replace any previously registered set and are reused by
    /// every automatic reconnect. While a worker is already connecting, open
    /// or waiting to retry, only the handlers are replaced. A failed client
    /// returns [`ClientError::Failed`] until it is disconnected.
    pub fn connect(&self, handlers: ConnectionHandlers) -> Result<(), ClientError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut shared = lock_shared(&self.shared);
        let generation = match shared.lifecycle.request_connect() {
            ConnectRequest::Start(generation) => generation,
            ConnectRequest::AlreadyActive => {
                debug!(
                    event = "connect_handlers_replaced",
                    state = %shared.lifecycle.state()
                );
                shared.handlers = handlers;
                return Ok(());
            }
            ConnectRequest::Terminal => return Err(ClientError::Failed),
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        shared.handlers = handlers;
        shared.outbound = Some(outbound_tx);
        drop(shared);

        info!(event = "connect_requested", endpoint = %self.endpoint, generation);
        let worker = ConnectionWorker {
            generation,
            endpoint: self.endpoint.clone(),
            credential: self.credential.clone(),
            options: self.options.clone(),
            policy: self.options.reconnect_policy(),
            shared: Arc::clone(&self.shared),
            gate: Arc::clone(&self.gate),
        };
        runtime.spawn(worker.run(outbound_rx));
        Ok(())
    }

    /// Queues one text frame on the open connection.
    ///
    /// Fails with [`ClientError::NotOpen`] in any other state; the payload is
    /// dropped, never buffered for a later connection.
    pub fn send_message(&self, payload: impl Into<String>) -> Result<(), ClientError> {
        let shared = lock_shared(&self.shared);
        let state = shared.lifecycle.state();
        if state != ConnectionState::Open {
            debug!(event = "send_dropped", state = %state);
            return Err(ClientError::NotOpen(state));
        }

        match shared.outbound.as_ref() {
            Some(tx) => tx
                .send(payload.into())
                .map_err(|_| ClientError::SendQueueClosed),
            None => Err(ClientError::SendQueueClosed),
        }
    }

    /// Closes the connection without triggering a reconnect.
    ///
    /// Idempotent. A failed client is reset to closed so that a fresh
    /// `connect` can resume.
    pub fn disconnect(&self) {
        let reentrant = lock_shared(&self.shared).delivering_on == Some(thread::current().id());
        let _gate = (!reentrant).then(|| self.gate.enter());

        let mut shared = lock_shared(&self.shared);
        let pending = self.options.pending_retry_on_disconnect;
        match shared.lifecycle.disconnect(pending) {
            DisconnectOutcome::Noop => {}
            DisconnectOutcome::Reset => {
                shared.outbound = None;
                info!(event = "failed_client_reset", endpoint = %self.endpoint);
            }
            DisconnectOutcome::Shutdown => {
                shared.outbound = None;
                info!(event = "disconnect_requested", endpoint = %self.endpoint);
            }
            DisconnectOutcome::RetryStillPending => {
                info!(
                    event = "disconnect_requested_retry_pending",
                    endpoint = %self.endpoint
                );
            }
        }
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        let mut shared = lock_shared(&self.shared);
        shared.lifecycle.retire();
        shared.outbound = None;
    }
}

impl std::fmt::Debug for ConnectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("state", &self.state())
            .finish()
    }
}

enum SessionOutcome {
    /// Consumer disconnected or the worker was superseded.
    Shutdown,
    /// Connection ended without consumer request.
    Lost,
}

struct ConnectionWorker {
    generation: u64,
    endpoint: SessionEndpoint,
    credential: Credential,
    options: ConnectionOptions,
    policy: ReconnectPolicy,
    shared: Arc<Mutex<Shared>>,
    gate: Arc<DeliveryGate>,
}

impl ConnectionWorker {
    async fn run(self, mut outbound_rx: mpsc::UnboundedReceiver<String>) {
        loop {
            let connected = tokio::select! {
                result = self.open_socket() => result,
                () = wait_for_shutdown(&mut outbound_rx) => {
                    debug!(event = "connect_cancelled", generation = self.generation);
                    return;
                }
            };

            let rejected_status = match connected {
                Ok(mut socket) => {
                    let Some(handlers) = self.mark_open() else {
                        let _ = socket.close(None).await;
                        return;
                    };
                    info!(event = "connection_open", endpoint = %self.endpoint);
                    handlers.emit_reconnected();

                    match self.run_session(&mut socket, &mut outbound_rx).await {
                        SessionOutcome::Shutdown => {
                            debug!(event = "connection_closed", generation = self.generation);
                            return;
                        }
                        SessionOutcome::Lost => None,
                    }
                }
                Err(err) => {
                    warn!(event = "connect_failed", endpoint = %self.endpoint, error = %err);
                    self.report_error(err.to_string());
                    err.credential_rejection_status()
                        .filter(|_| self.options.stop_on_credential_rejection)
                }
            };

            discard_unsent(&mut outbound_rx);

            let (decision, handlers) = {
                let mut shared = lock_shared(&self.shared);
                let Some(decision) =
                    shared
                        .lifecycle
                        .closed_unexpectedly(self.generation, &self.policy, rejected_status)
                else {
                    return;
                };
                (decision, shared.handlers.clone())
            };

            match decision {
                AfterClose::Fail(reason) => {
                    warn!(event = "connection_failed", endpoint = %self.endpoint, reason = %reason);
                    handlers.emit_failed(reason);
                    return;
                }
                AfterClose::Retry { attempt, delay } => {
                    info!(
                        event = "reconnect_scheduled",
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64
                    );
                    if !wait_retry_delay(delay, &mut outbound_rx).await {
                        debug!(event = "reconnect_cancelled", generation = self.generation);
                        return;
                    }
                }
            }

            let (attempt, handlers) = {
                let mut shared = lock_shared(&self.shared);
                let Some(attempt) = shared.lifecycle.retry_due(self.generation) else {
                    return;
                };
                (attempt, shared.handlers.clone())
            };
            handlers.emit_reconnecting(attempt);
        }
    }

    async fn open_socket(&self) -> Result<WsStream, ClientError> {
        let request = self
            .endpoint
            .handshake_request(&self.credential, &self.options.credential_placement)?;
        let timeout = self.options.handshake_timeout();
        let (socket, _response) = with_timeout(timeout, connect_async(request))
            .await
            .map_err(|_| ClientError::HandshakeTimeout(timeout))??;
        Ok(socket)
    }

    async fn run_session(
        &self,
        socket: &mut WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> SessionOutcome {
        loop {
            tokio::select! {
                maybe_outbound = outbound_rx.recv() => {
                    match maybe_outbound {
                        Some(payload) => {
                            if let Err(err) = socket.send(Message::Text(payload.into())).await {
                                self.report_error(format!("send failed: {err}"));
                                return SessionOutcome::Lost;
                            }
                        }
                        None => {
                            let _ = socket.close(None).await;
                            return SessionOutcome::Shutdown;
                        }
                    }
                }
                maybe_inbound = socket.next() => {
                    match maybe_inbound {
                        Some(Ok(Message::Text(text))) => {
                            if !self.deliver_message(text.to_string()) {
                                let _ = socket.close(None).await;
                                return SessionOutcome::Shutdown;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.report_error(format!(
                                "ignored binary frame of {} bytes",
                                data.len()
                            ));
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if socket.send(Message::Pong(payload)).await.is_err() {
                                return SessionOutcome::Lost;
                            }
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            debug!(
                                event = "server_closed",
                                code = ?frame.as_ref().map(|frame| u16::from(frame.code))
                            );
                            return SessionOutcome::Lost;
                        }
                        Some(Err(err)) => {
                            self.report_error(err.to_string());
                            return SessionOutcome::Lost;
                        }
                        None => return SessionOutcome::Lost,
                    }
                }
            }
        }
    }

    fn mark_open(&self) -> Option<ConnectionHandlers> {
        let mut shared = lock_shared(&self.shared);
        shared
            .lifecycle
            .opened(self.generation)
            .then(|| shared.handlers.clone())
    }

    /// Hands one inbound payload to `on_message`. Returns `false` once this
    /// worker is no longer the open one.
    fn deliver_message(&self, text: String) -> bool {
        let _gate = self.gate.enter();
        let handlers = {
            let mut shared = lock_shared(&self.shared);
            if !shared.lifecycle.is_open(self.generation) {
                return false;
            }
            shared.delivering_on = Some(thread::current().id());
            shared.handlers.clone()
        };
        let _mark = DeliveringMark(&self.shared);
        handlers.emit_message(text);
        true
    }

    fn report_error(&self, error: String) {
        let handlers = {
            let shared = lock_shared(&self.shared);
            if !shared.lifecycle.is_current(self.generation) {
                return;
            }
            shared.handlers.clone()
        };
        handlers.emit_error(error);
    }
}

/// Resolves once the client dropped its outbound sender.
///
/// Frames arriving outside an open session are dropped.
async fn wait_for_shutdown(outbound_rx: &mut mpsc::UnboundedReceiver<String>) {
    while outbound_rx.recv().await.is_some() {
        debug!(event = "send_dropped", reason = "not_open");
    }
}

fn discard_unsent(outbound_rx: &mut mpsc::UnboundedReceiver<String>) {
    let mut dropped = 0usize;
    while outbound_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(event = "unsent_frames_dropped", dropped);
    }
}

/// Waits out the reconnect delay. Returns `false` if shutdown was requested.
async fn wait_retry_delay(
    delay: Duration,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = wait_for_shutdown(outbound_rx) => false,
    }
}
