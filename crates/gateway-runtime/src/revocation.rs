// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Time-bounded credential revocation cache
//!
//! Revoked credentials are keyed by a fingerprint of the token, never the
//! token itself, and remembered only until the token would have expired
//! anyway. Lookups re-check expiry at read time, so an entry that expired
//! but has not been swept yet no longer counts as revoked.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{config::RevocationConfig, error::RuntimeResult, periodic::PeriodicTask};

/// Hex-encoded SHA-256 fingerprint of a raw credential
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a raw bearer token
    pub fn of_token(token: &str) -> Self {
        Self(hex::encode(Sha256::digest(token.as_bytes())))
    }

    /// Hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to correlate log lines
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

/// Concurrent set of revoked credentials with per-entry expiry
#[derive(Debug, Clone)]
pub struct RevocationCache {
    entries: Arc<DashMap<Fingerprint, DateTime<Utc>>>,
    sweeper: Arc<PeriodicTask>,
}

impl RevocationCache {
    /// Create an empty cache and start its expiry sweeper
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no Tokio runtime
    /// is available.
    pub fn new(config: RevocationConfig) -> RuntimeResult<Self> {
        config.validate()?;

        let entries = Arc::new(DashMap::new());
        let sweep_entries = Arc::clone(&entries);
        let sweeper = PeriodicTask::spawn("revocation-sweeper", config.sweep_interval, move || {
            sweep_expired(&sweep_entries, Utc::now());
        })?;

        Ok(Self {
            entries,
            sweeper: Arc::new(sweeper),
        })
    }

    /// Revoke `fingerprint` until `expires_at`
    ///
    /// Revoking again refreshes the expiry. Revocations that have already
    /// expired are not stored.
    pub fn revoke(&self, fingerprint: Fingerprint, expires_at: DateTime<Utc>) {
        if expires_at <= Utc::now() {
            debug!(%fingerprint, %expires_at, "ignoring revocation of already expired credential");
            return;
        }
        info!(%fingerprint, %expires_at, "credential revoked");
        self.entries.insert(fingerprint, expires_at);
    }

    /// Whether `fingerprint` is currently revoked
    pub fn is_revoked(&self, fingerprint: &Fingerprint) -> bool {
        self.is_revoked_at(fingerprint, Utc::now())
    }

    fn is_revoked_at(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> bool {
        self.entries
            .get(fingerprint)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Remove expired entries, returning how many were removed
    pub fn sweep(&self) -> usize {
        sweep_expired(&self.entries, Utc::now())
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop the background sweeper
    pub fn shutdown(&self) {
        self.sweeper.shutdown();
    }
}

fn sweep_expired(entries: &DashMap<Fingerprint, DateTime<Utc>>, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|_, expires_at| *expires_at > now);
    let removed = before.saturating_sub(entries.len());

    if removed > 0 {
        debug!(removed, remaining = entries.len(), "swept expired revocations");
    }
    removed
}
