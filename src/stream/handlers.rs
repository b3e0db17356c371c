//! Consumer callbacks fired by the connection worker.
//!
//! All callbacks for one client run on its worker task, one at a time, in the
//! order the underlying connection events happened. Slots that were never
//! registered are skipped.
//!
//! ```rust
//! use chat_link::stream::handlers::ConnectionHandlers;
//!
//! let handlers = ConnectionHandlers::new()
//!     .on_message(|text| println!("{text}"))
//!     .on_reconnecting(|attempt| eprintln!("reconnecting (attempt {attempt})"))
//!     .on_reconnected(|| eprintln!("connected"))
//!     .on_error(|error| eprintln!("error: {error}"));
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

/// Why a client stopped reconnecting for good.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureReason {
    /// Consecutive unexpected closures used up the reconnect budget.
    AttemptsExhausted {
        /// Reconnect attempts spent before giving up.
        attempts: u32,
    },
    /// The server refused the credential during the handshake.
    CredentialRejected {
        /// HTTP status of the rejected upgrade.
        status: u16,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::AttemptsExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
            FailureReason::CredentialRejected { status } => {
                write!(f, "credential rejected by server (http {status})")
            }
        }
    }
}

/// Every callback as a value, for consumers that prefer a channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectionEvent {
    /// Inbound text payload, unmodified.
    Message(String),
    /// A reconnect attempt is starting.
    Reconnecting {
        /// 1-based attempt number since the last successful open.
        attempt: u32,
    },
    /// The connection is open and usable, initially or after a reconnect.
    Reconnected,
    /// Transport or handshake error description.
    Error(String),
    /// The client stopped reconnecting for good.
    Failed(FailureReason),
}

/// Callback for inbound text payloads.
pub type OnMessageCallback = Arc<dyn Fn(String) + Send + Sync>;
/// Callback for reconnect attempts, receives the attempt number.
pub type OnReconnectingCallback = Arc<dyn Fn(u32) + Send + Sync>;
/// Callback for a successful open.
pub type OnReconnectedCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback for error descriptions.
pub type OnErrorCallback = Arc<dyn Fn(String) + Send + Sync>;
/// Callback for the terminal failure.
pub type OnFailedCallback = Arc<dyn Fn(FailureReason) + Send + Sync>;

/// Callback slots registered through `ConnectionClient::connect`.
#[derive(Clone, Default)]
pub struct ConnectionHandlers {
    on_message: Option<OnMessageCallback>,
    on_reconnecting: Option<OnReconnectingCallback>,
    on_reconnected: Option<OnReconnectedCallback>,
    on_error: Option<OnErrorCallback>,
    on_failed: Option<OnFailedCallback>,
}

impl fmt::Debug for ConnectionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_reconnecting", &self.on_reconnecting.is_some())
            .field("on_reconnected", &self.on_reconnected.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_failed", &self.on_failed.is_some())
            .finish()
    }
}

impl ConnectionHandlers {
    /// Creates handlers with no callbacks registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers that forward every callback into an unbounded channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let message_tx = tx.clone();
        let reconnecting_tx = tx.clone();
        let reconnected_tx = tx.clone();
        let error_tx = tx.clone();
        let handlers = Self::new()
            .on_message(move |text| {
                let _ = message_tx.send(ConnectionEvent::Message(text));
            })
            .on_reconnecting(move |attempt| {
                let _ = reconnecting_tx.send(ConnectionEvent::Reconnecting { attempt });
            })
            .on_reconnected(move || {
                let _ = reconnected_tx.send(ConnectionEvent::Reconnected);
            })
            .on_error(move |error| {
                let _ = error_tx.send(ConnectionEvent::Error(error));
            })
            .on_failed(move |reason| {
                let _ = tx.send(ConnectionEvent::Failed(reason));
            });
        (handlers, rx)
    }

    /// Called once per inbound text frame, in arrival order.
    pub fn on_message(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called when a reconnect attempt starts, with the 1-based attempt number.
    pub fn on_reconnecting(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_reconnecting = Some(Arc::new(f));
        self
    }

    /// Called on every successful open, including the first one.
    pub fn on_reconnected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reconnected = Some(Arc::new(f));
        self
    }

    /// Called with a description of handshake and transport errors.
    pub fn on_error(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called once when the client enters the terminal failed state.
    pub fn on_failed(mut self, f: impl Fn(FailureReason) + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_message(&self, text: String) {
        if let Some(cb) = &self.on_message {
            cb(text);
        }
    }

    pub(crate) fn emit_reconnecting(&self, attempt: u32) {
        if let Some(cb) = &self.on_reconnecting {
            cb(attempt);
        }
    }

    pub(crate) fn emit_reconnected(&self) {
        if let Some(cb) = &self.on_reconnected {
            cb();
        }
    }

    pub(crate) fn emit_error(&self, error: String) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_failed(&self, reason: FailureReason) {
        if let Some(cb) = &self.on_failed {
            cb(reason);
        }
    }
}
