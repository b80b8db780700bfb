// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Inbound fixed-window admission control
//!
//! Each client key gets a counter that resets at a fixed boundary. Requests
//! beyond `max_requests` inside a window are denied until the window ends.
//! Elapsed windows are swept in the background so memory is bounded by the
//! number of recently active clients.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::{config::AdmissionConfig, error::RuntimeResult, periodic::PeriodicTask};

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The request may proceed
    Allowed {
        /// Requests left in the current window
        remaining: u32,
    },
    /// The client exhausted its window
    Denied {
        /// Time until the client's window resets
        retry_after: Duration,
    },
}

impl AdmissionDecision {
    /// Whether the request was admitted
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

impl WindowEntry {
    fn open(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            reset_at: now + window,
        }
    }

    fn record(&mut self, now: Instant, window: Duration) {
        if now >= self.reset_at {
            *self = Self::open(now, window);
        } else {
            self.count = self.count.saturating_add(1);
        }
    }
}

/// Per-client fixed-window limiter
///
/// Cloning shares the underlying state. The background sweeper stops when
/// [`AdmissionLimiter::shutdown`] is called or the last clone is dropped.
#[derive(Debug, Clone)]
pub struct AdmissionLimiter {
    max_requests: u32,
    window: Duration,
    entries: Arc<DashMap<String, WindowEntry>>,
    sweeper: Arc<PeriodicTask>,
}

impl AdmissionLimiter {
    /// Create a limiter and start its sweeper
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no Tokio runtime
    /// is available.
    pub fn new(config: AdmissionConfig) -> RuntimeResult<Self> {
        config.validate()?;

        let entries = Arc::new(DashMap::new());
        let sweep_entries = Arc::clone(&entries);
        let sweeper = PeriodicTask::spawn("admission-sweeper", config.sweep_interval, move || {
            sweep_elapsed(&sweep_entries, Instant::now());
        })?;

        Ok(Self {
            max_requests: config.max_requests,
            window: config.window,
            entries,
            sweeper: Arc::new(sweeper),
        })
    }

    /// Record a request from `client_key` and decide whether it is admitted
    pub fn allow(&self, client_key: &str) -> AdmissionDecision {
        let now = Instant::now();

        // Existing clients avoid allocating a key
        let entry = if let Some(mut entry) = self.entries.get_mut(client_key) {
            entry.record(now, self.window);
            *entry
        } else {
            *self
                .entries
                .entry(client_key.to_owned())
                .and_modify(|entry| entry.record(now, self.window))
                .or_insert_with(|| WindowEntry::open(now, self.window))
        };

        if entry.count > self.max_requests {
            let retry_after = entry.reset_at.saturating_duration_since(now);
            debug!(
                client = client_key,
                count = entry.count,
                retry_after_ms = retry_after.as_millis(),
                "admission denied"
            );
            AdmissionDecision::Denied { retry_after }
        } else {
            AdmissionDecision::Allowed {
                remaining: self.max_requests - entry.count,
            }
        }
    }

    /// Remove every entry whose window has elapsed, returning how many were removed
    pub fn sweep(&self) -> usize {
        sweep_elapsed(&self.entries, Instant::now())
    }

    /// Ask the background sweeper to run now
    pub fn trigger_sweep(&self) {
        self.sweeper.trigger();
    }

    /// Number of clients currently tracked
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no clients are tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Requests allowed per window
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Stop the background sweeper
    pub fn shutdown(&self) {
        self.sweeper.shutdown();
    }
}

fn sweep_elapsed(entries: &DashMap<String, WindowEntry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.reset_at > now);
    let removed = before.saturating_sub(entries.len());

    if removed > 0 {
        debug!(
            removed,
            remaining = entries.len(),
            "swept elapsed admission windows"
        );
    }
    removed
}
