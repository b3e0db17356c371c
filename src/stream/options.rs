//! Connection client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{Backoff, ReconnectPolicy};
use crate::stream::endpoint::CredentialPlacement;

/// Default values used by [`ConnectionOptions`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectionDefaults;

impl ConnectionDefaults {
    /// Delay before each reconnect attempt.
    pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);
    /// Reconnect attempts before giving up.
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
    /// Upper bound for one handshake.
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
}

/// What `disconnect` does to a retry that is already scheduled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingRetry {
    /// The scheduled retry is cancelled and the client stays closed.
    #[default]
    Cancel,
    /// The scheduled retry still fires and reconnects.
    Proceed,
}

/// Reconnect, handshake and credential settings for a connection client.
///
/// Every field has a default, so partial configuration documents deserialize.
///
/// ```rust
/// use std::time::Duration;
/// use chat_link::stream::options::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_reconnect_delay(Duration::from_secs(2))
///     .with_max_reconnect_attempts(3);
/// assert_eq!(options.reconnect_policy().max_attempts, 3);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Delay waited after an unexpected closure before reconnecting.
    /// Default: 5000ms.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Reconnect attempts allowed before the client gives up.
    /// Default: 10.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay growth across attempts. Default: fixed.
    #[serde(default)]
    pub backoff: Backoff,

    /// Upper bound for a single handshake. Default: 10000ms.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Where the credential travels in the handshake. Default: `?token=`.
    #[serde(default)]
    pub credential_placement: CredentialPlacement,

    /// Whether `disconnect` cancels an already scheduled retry.
    /// Default: cancel.
    #[serde(default)]
    pub pending_retry_on_disconnect: PendingRetry,

    /// Treat an HTTP 401/403 upgrade response as terminal instead of
    /// spending the retry budget on it. Default: true.
    #[serde(default = "default_stop_on_credential_rejection")]
    pub stop_on_credential_rejection: bool,
}

fn default_reconnect_delay_ms() -> u64 {
    ConnectionDefaults::RECONNECT_DELAY.as_millis() as u64
}

fn default_max_reconnect_attempts() -> u32 {
    ConnectionDefaults::MAX_RECONNECT_ATTEMPTS
}

fn default_handshake_timeout_ms() -> u64 {
    ConnectionDefaults::HANDSHAKE_TIMEOUT.as_millis() as u64
}

fn default_stop_on_credential_rejection() -> bool {
    true
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            backoff: Backoff::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            credential_placement: CredentialPlacement::default(),
            pending_retry_on_disconnect: PendingRetry::default(),
            stop_on_credential_rejection: default_stop_on_credential_rejection(),
        }
    }
}

impl ConnectionOptions {
    /// Sets the base reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Sets the reconnect budget. `0` fails on the first unexpected closure.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets how the delay grows across attempts.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Sets where the credential is placed in the handshake.
    pub fn with_credential_placement(mut self, placement: CredentialPlacement) -> Self {
        self.credential_placement = placement;
        self
    }

    /// Sets whether `disconnect` cancels a scheduled retry.
    pub fn with_pending_retry_on_disconnect(mut self, pending: PendingRetry) -> Self {
        self.pending_retry_on_disconnect = pending;
        self
    }

    /// Sets whether HTTP 401/403 upgrade responses are terminal.
    pub fn with_stop_on_credential_rejection(mut self, stop: bool) -> Self {
        self.stop_on_credential_rejection = stop;
        self
    }

    /// Base reconnect delay as a `Duration`.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Handshake timeout as a `Duration`.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Attempt budget and delay strategy derived from these options.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            delay: self.reconnect_delay(),
            backoff: self.backoff.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ConnectionOptions, PendingRetry};
    use crate::retry::Backoff;
    use crate::stream::endpoint::CredentialPlacement;

    #[test]
    fn defaults_match_documented_values() {
        let options = ConnectionOptions::default();
        assert_eq!(options.reconnect_delay(), Duration::from_millis(5000));
        assert_eq!(options.max_reconnect_attempts, 10);
        assert_eq!(options.backoff, Backoff::Fixed);
        assert_eq!(options.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(options.pending_retry_on_disconnect, PendingRetry::Cancel);
        assert!(options.stop_on_credential_rejection);
        assert_eq!(
            options.credential_placement,
            CredentialPlacement::Query {
                name: "token".to_string()
            }
        );
    }

    #[test]
    fn partial_document_fills_in_defaults() {
        let options: ConnectionOptions = serde_json::from_str(
            r#"{
                "reconnect_delay_ms": 250,
                "backoff": { "kind": "exponential", "max_delay_ms": 4000, "jitter_ms": 100 },
                "credential_placement": { "kind": "bearer_header" },
                "pending_retry_on_disconnect": "proceed"
            }"#,
        )
        .expect("options should deserialize");

        assert_eq!(options.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(options.max_reconnect_attempts, 10);
        assert_eq!(
            options.backoff,
            Backoff::Exponential {
                max_delay_ms: 4000,
                jitter_ms: 100
            }
        );
        assert_eq!(options.credential_placement, CredentialPlacement::BearerHeader);
        assert_eq!(options.pending_retry_on_disconnect, PendingRetry::Proceed);
        assert!(options.stop_on_credential_rejection);
    }

    #[test]
    fn builder_feeds_reconnect_policy() {
        let policy = ConnectionOptions::default()
            .with_reconnect_delay(Duration::ZERO)
            .with_max_reconnect_attempts(2)
            .reconnect_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    }
}
