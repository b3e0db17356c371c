//! Connection state and the lifecycle bookkeeping behind it.
//!
//! `Lifecycle` holds no I/O. The client handle and its worker both call into
//! it under one lock, and every worker-side call carries the generation the
//! worker was started with, so a worker superseded by `disconnect` or a newer
//! `connect` can no longer move the state.

use std::fmt;
use std::time::Duration;

use crate::retry::ReconnectPolicy;
use crate::stream::handlers::FailureReason;
use crate::stream::options::PendingRetry;

/// Observable state of a connection client.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConnectionState {
    /// Constructed, never connected.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Connected; messages flow both ways.
    Open,
    /// Closed by `disconnect`.
    Closed,
    /// Waiting out the delay before the next attempt.
    Reconnecting,
    /// Gave up; only `disconnect` leaves this state.
    Failed,
}

impl ConnectionState {
    /// Lowercase name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a consumer `connect` request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ConnectRequest {
    /// A new worker must be started with this generation.
    Start(u64),
    /// A worker is already connecting, open or waiting to retry.
    AlreadyActive,
    /// The client failed; it must be disconnected before reuse.
    Terminal,
}

/// Result of a consumer `disconnect` request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DisconnectOutcome {
    /// Nothing was running.
    Noop,
    /// The failed client was reset to closed.
    Reset,
    /// The running worker was superseded and must shut down.
    Shutdown,
    /// Closed, but the already scheduled retry keeps its worker alive.
    RetryStillPending,
}

/// What the worker does after its connection ended unexpectedly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AfterClose {
    Retry { attempt: u32, delay: Duration },
    Fail(FailureReason),
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: ConnectionState,
    reconnect_attempts: u32,
    generation: u64,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            reconnect_attempts: 0,
            generation: 0,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// `true` while the given worker may deliver inbound messages.
    pub(crate) fn is_open(&self, generation: u64) -> bool {
        self.is_current(generation) && self.state == ConnectionState::Open
    }

    pub(crate) fn request_connect(&mut self) -> ConnectRequest {
        match self.state {
            ConnectionState::Idle | ConnectionState::Closed => {
                self.generation += 1;
                self.state = ConnectionState::Connecting;
                self.reconnect_attempts = 0;
                ConnectRequest::Start(self.generation)
            }
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting => {
                ConnectRequest::AlreadyActive
            }
            ConnectionState::Failed => ConnectRequest::Terminal,
        }
    }

    /// Records a successful handshake. Returns `false` for a stale worker.
    pub(crate) fn opened(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.state = ConnectionState::Open;
        self.reconnect_attempts = 0;
        true
    }

    /// Decides between retrying and failing after an unexpected closure.
    ///
    /// `rejected_status` carries the HTTP status when the handshake was
    /// refused and such refusals are configured as terminal. Returns `None`
    /// for a stale worker.
    pub(crate) fn closed_unexpectedly(
        &mut self,
        generation: u64,
        policy: &ReconnectPolicy,
        rejected_status: Option<u16>,
    ) -> Option<AfterClose> {
        if !self.is_current(generation) {
            return None;
        }

        if let Some(status) = rejected_status {
            self.state = ConnectionState::Failed;
            return Some(AfterClose::Fail(FailureReason::CredentialRejected { status }));
        }

        if policy.allows(self.reconnect_attempts) {
            self.state = ConnectionState::Reconnecting;
            let attempt = self.reconnect_attempts + 1;
            Some(AfterClose::Retry {
                attempt,
                delay: policy.delay_for_attempt(attempt),
            })
        } else {
            self.state = ConnectionState::Failed;
            Some(AfterClose::Fail(FailureReason::AttemptsExhausted {
                attempts: self.reconnect_attempts,
            }))
        }
    }

    /// The retry timer fired: counts the attempt and moves to connecting.
    ///
    /// Returns the attempt number, or `None` if the retry no longer applies.
    pub(crate) fn retry_due(&mut self, generation: u64) -> Option<u32> {
        if !self.is_current(generation) {
            return None;
        }
        match self.state {
            ConnectionState::Reconnecting | ConnectionState::Closed => {
                self.reconnect_attempts += 1;
                self.state = ConnectionState::Connecting;
                Some(self.reconnect_attempts)
            }
            _ => None,
        }
    }

    pub(crate) fn disconnect(&mut self, pending: PendingRetry) -> DisconnectOutcome {
        match self.state {
            ConnectionState::Idle | ConnectionState::Closed => DisconnectOutcome::Noop,
            ConnectionState::Failed => {
                self.state = ConnectionState::Closed;
                DisconnectOutcome::Reset
            }
            ConnectionState::Connecting | ConnectionState::Open => {
                self.generation += 1;
                self.state = ConnectionState::Closed;
                DisconnectOutcome::Shutdown
            }
            ConnectionState::Reconnecting => {
                self.state = ConnectionState::Closed;
                match pending {
                    PendingRetry::Cancel => {
                        self.generation += 1;
                        DisconnectOutcome::Shutdown
                    }
                    PendingRetry::Proceed => DisconnectOutcome::RetryStillPending,
                }
            }
        }
    }

    /// Supersedes whatever worker is running without a state transition
    /// visible to the consumer; used when the client handle is dropped.
    pub(crate) fn retire(&mut self) {
        self.generation += 1;
    }
}
