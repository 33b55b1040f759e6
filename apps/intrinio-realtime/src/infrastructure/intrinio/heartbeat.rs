//! Heartbeat and Token Renewal Timers
//!
//! Emits periodic keep-alive and token-renewal events. The timer never
//! touches the socket; the connection supervisor acts on the events.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Configuration for the periodic timers.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between heartbeat messages.
    pub heartbeat_interval: Duration,
    /// Interval between forced token renewals.
    pub token_renewal_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            token_renewal_interval: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(heartbeat_interval: Duration, token_renewal_interval: Duration) -> Self {
        Self {
            heartbeat_interval,
            token_renewal_interval,
        }
    }

    /// Create configuration from [`ClientConfig`](crate::ClientConfig).
    #[must_use]
    pub const fn from_client_config(config: &crate::ClientConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            token_renewal_interval: config.token_renewal_interval,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Send a heartbeat if connected.
    Heartbeat,
    /// Renew the token by reconnecting.
    TokenRenewal,
}

/// Periodic timer driving heartbeats and token renewal.
///
/// The first tick of each timer fires one full period after [`run`](Self::run)
/// starts.
pub struct HeartbeatManager<E> {
    config: HeartbeatConfig,
    event_tx: mpsc::UnboundedSender<E>,
    cancel: CancellationToken,
}

impl<E: From<TimerEvent> + Send + 'static> HeartbeatManager<E> {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        event_tx: mpsc::UnboundedSender<E>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or the receiving side is dropped.
    pub async fn run(self) {
        let start = Instant::now();
        let mut heartbeat = tokio::time::interval_at(
            start + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut renewal = tokio::time::interval_at(
            start + self.config.token_renewal_interval,
            self.config.token_renewal_interval,
        );
        renewal.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = heartbeat.tick() => TimerEvent::Heartbeat,
                _ = renewal.tick() => TimerEvent::TokenRenewal,
            };

            if self.event_tx.send(E::from(event)).is_err() {
                tracing::debug!("Heartbeat receiver dropped, stopping");
                break;
            }
        }
    }
}
