// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Outbound token-bucket throttle
//!
//! Paces calls to a rate-limited third-party API. The bucket starts full with
//! `requests_per_minute` tokens and a refill task adds one token every
//! `60s / requests_per_minute`, never beyond capacity. Waiting callers can
//! give up through a cancellation token or a deadline without losing a token.

use std::{sync::Arc, time::Duration};

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::ThrottleConfig,
    error::{RuntimeResult, ThrottleError},
    periodic::PeriodicTask,
};

const REFILL_PERIOD: Duration = Duration::from_secs(60);

/// Token bucket shared by all callers of one external integration
#[derive(Debug, Clone)]
pub struct OutboundThrottle {
    tokens: Arc<Semaphore>,
    capacity: usize,
    refill_interval: Duration,
    refiller: Arc<PeriodicTask>,
}

impl OutboundThrottle {
    /// Create a full bucket and start refilling it
    ///
    /// # Errors
    ///
    /// Returns an error if `requests_per_minute` is zero or no Tokio runtime
    /// is available.
    pub fn new(config: ThrottleConfig) -> RuntimeResult<Self> {
        config.validate()?;

        let capacity = config.requests_per_minute as usize;
        let refill_interval = REFILL_PERIOD / config.requests_per_minute;
        let tokens = Arc::new(Semaphore::new(capacity));

        let refill_tokens = Arc::clone(&tokens);
        let refiller = PeriodicTask::spawn("throttle-refill", refill_interval, move || {
            refill_one(&refill_tokens, capacity);
        })?;

        debug!(
            capacity,
            refill_interval_ms = refill_interval.as_millis(),
            "outbound throttle created"
        );

        Ok(Self {
            tokens,
            capacity,
            refill_interval,
            refiller: Arc::new(refiller),
        })
    }

    /// Wait for a token, giving up when `cancellation_token` fires
    ///
    /// A cancelled or closed wait never consumes a token.
    ///
    /// # Errors
    ///
    /// Returns `ThrottleError::Cancelled` if the token fires first (including
    /// when it is already cancelled) and `ThrottleError::Closed` once the
    /// throttle is closed.
    pub async fn acquire(&self, cancellation_token: &CancellationToken) -> Result<(), ThrottleError> {
        tokio::select! {
            biased;
            () = cancellation_token.cancelled() => Err(ThrottleError::Cancelled),
            permit = self.tokens.acquire() => consume(permit.ok()),
        }
    }

    /// Wait for a token for at most `timeout`
    ///
    /// # Errors
    ///
    /// Returns `ThrottleError::TimedOut` when the deadline elapses and
    /// `ThrottleError::Closed` once the throttle is closed.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<(), ThrottleError> {
        match tokio::time::timeout(timeout, self.tokens.acquire()).await {
            Ok(permit) => consume(permit.ok()),
            Err(_) => Err(ThrottleError::TimedOut),
        }
    }

    /// Take a token only if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.tokens
            .try_acquire()
            .map(SemaphorePermit::forget)
            .is_ok()
    }

    /// Stop refilling and wake every waiter with `ThrottleError::Closed`
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        self.refiller.shutdown();
        if !self.tokens.is_closed() {
            self.tokens.close();
            info!(capacity = self.capacity, "outbound throttle closed");
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.tokens.is_closed()
    }

    /// Tokens available right now
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Bucket capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Time between single-token refills
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}

fn consume(permit: Option<SemaphorePermit<'_>>) -> Result<(), ThrottleError> {
    let permit = permit.ok_or(ThrottleError::Closed)?;
    permit.forget();
    Ok(())
}

fn refill_one(tokens: &Semaphore, capacity: usize) {
    // Only the refill task adds tokens, so check-then-add cannot overshoot
    if !tokens.is_closed() && tokens.available_permits() < capacity {
        tokens.add_permits(1);
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{Instant, sleep};
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;
    use crate::error::RuntimeError;

    fn throttle(requests_per_minute: u32) -> OutboundThrottle {
        OutboundThrottle::new(ThrottleConfig {
            requests_per_minute,
        })
        .unwrap()
    }

    async fn drain(throttle: &OutboundThrottle) {
        let token = CancellationToken::new();
        for _ in 0..throttle.capacity() {
            throttle.acquire(&token).await.unwrap();
        }
        assert_eq!(throttle.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn starts_full() {
        let throttle = throttle(60);
        assert_eq!(throttle.capacity(), 60);
        assert_eq!(throttle.available(), 60);
        assert_eq!(throttle.refill_interval(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn next_acquire_waits_for_refill() {
        let throttle = throttle(6);
        assert_eq!(throttle.refill_interval(), Duration::from_secs(10));
        drain(&throttle).await;

        let token = CancellationToken::new();
        let started = Instant::now();
        let mut waiting = task::spawn(throttle.acquire(&token));
        assert_pending!(waiting.poll());

        sleep(Duration::from_secs(5)).await;
        assert_pending!(waiting.poll());

        sleep(Duration::from_secs(6)).await;
        assert_ready_eq!(waiting.poll(), Ok(()));
        assert!(started.elapsed() >= throttle.refill_interval());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_capacity() {
        let throttle = throttle(6);
        assert!(throttle.try_acquire());
        assert_eq!(throttle.available(), 5);

        sleep(Duration::from_secs(100)).await;
        assert_eq!(throttle.available(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn precancelled_acquire_keeps_tokens() {
        let throttle = throttle(6);
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(throttle.acquire(&token).await, Err(ThrottleError::Cancelled));
        assert_eq!(throttle.available(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_does_not_consume_refill() {
        let throttle = throttle(6);
        drain(&throttle).await;

        let token = CancellationToken::new();
        let mut waiting = task::spawn(throttle.acquire(&token));
        assert_pending!(waiting.poll());

        token.cancel();
        assert_ready_eq!(waiting.poll(), Err(ThrottleError::Cancelled));
        drop(waiting);

        sleep(throttle.refill_interval() + Duration::from_secs(1)).await;
        assert_eq!(throttle.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_distinct_from_cancellation() {
        let throttle = throttle(6);
        drain(&throttle).await;

        let result = throttle.acquire_timeout(Duration::from_secs(1)).await;
        assert_eq!(result, Err(ThrottleError::TimedOut));

        let result = throttle.acquire_timeout(Duration::from_secs(20)).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn close_wakes_waiters_and_is_idempotent() {
        let throttle = throttle(6);
        drain(&throttle).await;

        let token = CancellationToken::new();
        let mut waiting = task::spawn(throttle.acquire(&token));
        assert_pending!(waiting.poll());

        throttle.close();
        throttle.close();
        assert!(throttle.is_closed());
        assert_ready_eq!(waiting.poll(), Err(ThrottleError::Closed));
        drop(waiting);

        sleep(Duration::from_secs(60)).await;
        assert!(throttle.refiller.is_finished());
        assert!(!throttle.try_acquire());
    }

    #[tokio::test]
    async fn zero_rate_is_rejected() {
        let result = OutboundThrottle::new(ThrottleConfig {
            requests_per_minute: 0,
        });
        assert!(matches!(result, Err(RuntimeError::Configuration { .. })));
    }
}
