//! Reconnection supervisor.
//!
//! Keeps a [`Service`] consuming for the life of the process:
//!
//! ```text
//!               ┌──────────────────────────── any failure ───────────────────────────┐
//!               ▼                                                                    │
//! DISCONNECTED ─▶ CONNECTING ─▶ READY ─▶ CONSUMING ──(broker/store lost)─────────────┘
//!      ▲                                     (wait backoff, then start over)
//! ```
//!
//! Every failure takes the same path: tear the session down, wait the
//! backoff, reconnect from scratch. The session is rebuilt in full each
//! time, so the exchange, queue and bindings are re-declared after a broker
//! restart. Unacknowledged requests return to the queue when the old
//! connection closes and are processed again by the new session.

use crate::metrics::ServerMetrics;
use crate::retry::RetryPolicy;
use crate::server::{ServerSession, Service};
use broker_rpc_core::broker::Broker;
use broker_rpc_core::error::RpcError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle state of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; waiting to (re)connect.
    Disconnected,
    /// Opening backing stores and the broker connection.
    Connecting,
    /// Topology declared and prefetch set.
    Ready,
    /// Consumer registered; requests are being served.
    Consuming,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::Consuming => "CONSUMING",
        })
    }
}

struct SessionEnd {
    cause: RpcError,
    reached_consuming: bool,
}

/// Runs a service and restarts its session whenever it fails.
pub struct Supervisor {
    service: Arc<dyn Service>,
    broker: Arc<dyn Broker>,
    policy: RetryPolicy,
    state: watch::Sender<ConnectionState>,
}

impl Supervisor {
    /// Supervise `service` on `broker` with the default fixed backoff.
    #[must_use]
    pub fn new(service: Arc<dyn Service>, broker: Arc<dyn Broker>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            service,
            broker,
            policy: RetryPolicy::default(),
            state,
        }
    }

    /// Use `policy` between reconnection attempts.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` completes.
    ///
    /// Never returns on its own: every failure is logged and followed by a
    /// reconnection after the backoff.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut failures = 0_usize;

        loop {
            let end = tokio::select! {
                () = &mut shutdown => break,
                end = self.run_session() => end,
            };

            self.transition(ConnectionState::Disconnected);
            ServerMetrics::record_reconnect(self.service.name());
            if end.reached_consuming {
                failures = 0;
            }
            let delay = self.policy.delay_for_attempt(failures);
            failures = failures.saturating_add(1);
            tracing::warn!(
                service = self.service.name(),
                kind = end.cause.kind(),
                error = %end.cause,
                retry_in_ms = delay.as_millis(),
                "Session ended; reconnecting"
            );

            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.transition(ConnectionState::Disconnected);
        tracing::info!(service = self.service.name(), "Supervisor stopped");
    }

    async fn run_session(&self) -> SessionEnd {
        self.transition(ConnectionState::Connecting);
        let session = match ServerSession::connect(self.service.as_ref(), self.broker.as_ref()).await {
            Ok(session) => session,
            Err(cause) => {
                return SessionEnd {
                    cause,
                    reached_consuming: false,
                };
            }
        };
        let end = self.drive(&session).await;
        session.close().await;
        end
    }

    async fn drive(&self, session: &ServerSession) -> SessionEnd {
        let failed = |cause| SessionEnd {
            cause,
            reached_consuming: false,
        };

        if let Err(cause) = session.declare().await {
            return failed(cause);
        }
        self.transition(ConnectionState::Ready);

        let consumer = match session.consume().await {
            Ok(consumer) => consumer,
            Err(cause) => return failed(cause),
        };
        self.transition(ConnectionState::Consuming);

        SessionEnd {
            cause: session.serve(consumer).await,
            reached_consuming: true,
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(
                service = self.service.name(),
                from = %previous,
                to = %next,
                "State transition"
            );
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("service", &self.service.name())
            .field("policy", &self.policy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
