//! Bounded exponential-backoff retry around a unary call.
//!
//! Retry is taken only for transport-transient outcomes (deadline exceeded,
//! unavailable); well-formed failure responses pass through untouched. After
//! an unavailable outcome the channel is asked to reconnect before the next
//! attempt. Backoff runs after every failed transient attempt, including the
//! last, so the worst case under a dead server is
//! `attempts * deadline + base * (2^attempts - 1)`.

use std::time::Duration;

use tether_proto::{Request, Response};
use tracing::warn;

use crate::channel::Channel;
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_base: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff_base,
        }
    }

    /// Run one unary exchange through the policy.
    pub fn call(&self, channel: &Channel, request: &Request) -> Result<Response, TransportError> {
        self.run(|| channel.call(request), || channel.reconnect())
    }

    /// Generic driver: `op` is one attempt, `reconnect` is invoked between
    /// attempts after an unavailable outcome.
    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> Result<T, TransportError>,
        mut reconnect: impl FnMut(),
    ) -> Result<T, TransportError> {
        let mut last = TransportError::Fatal("retry loop made no attempt".to_string());

        for attempt in 1..=self.attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    warn!(attempt, %err, "transient RPC failure");
                    if err.is_unavailable() {
                        reconnect();
                    }
                    std::thread::sleep(self.backoff(attempt));
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}
