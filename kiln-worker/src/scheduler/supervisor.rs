//! Reconnect supervisor
//!
//! Keeps a consumer session alive forever. A session that fails is retried
//! after `min(2^attempt, 30)` seconds; a session whose delivery stream ends
//! cleanly is restarted right away with the attempt counter cleared.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

/// Upper bound for the reconnect delay, in seconds
const MAX_BACKOFF_SECS: u64 = 30;

/// Consecutive failure count for the reconnect loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Counts a failed cycle and returns how long to wait before the next one
    pub fn record_failure(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        backoff_delay(self.attempt)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// `min(2^attempt, 30)` seconds
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64
        .checked_pow(attempt)
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// One connect-and-consume cycle
#[async_trait]
pub trait Session: Send + Sync {
    /// Runs until the delivery stream ends (`Ok`) or something breaks (`Err`)
    async fn run(&self) -> Result<()>;
}

/// Restarts a session whenever it returns
pub struct ReconnectSupervisor<S> {
    session: S,
}

impl<S: Session> ReconnectSupervisor<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    /// Runs one session cycle and returns the delay before the next
    pub async fn step(&self, backoff: &mut Backoff) -> Duration {
        match self.session.run().await {
            Ok(()) => {
                info!("Consumer session ended cleanly, reconnecting");
                backoff.reset();
                Duration::ZERO
            }
            Err(e) => {
                let delay = backoff.record_failure();
                error!("Consumer session failed: {:#}", e);
                warn!(
                    "Reconnecting in {:?} (attempt {})",
                    delay,
                    backoff.attempt()
                );
                delay
            }
        }
    }

    /// Supervises the session forever
    pub async fn run(&self) {
        let mut backoff = Backoff::default();

        loop {
            let delay = self.step(&mut backoff).await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
