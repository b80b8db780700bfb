// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Tenant identifiers
//!
//! Tenant ids appear in URL paths, token claims and every wire message pushed
//! to clients, so they are validated once at the boundary and carried as a
//! newtype afterwards.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum accepted length of a tenant identifier
pub const MAX_TENANT_ID_LENGTH: usize = 64;

/// Validated tenant identifier
///
/// Accepts ASCII alphanumerics, `-` and `_`, between 1 and
/// [`MAX_TENANT_ID_LENGTH`] characters. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(Arc<str>);

impl TenantId {
    /// Create a tenant id, validating its format
    ///
    /// # Errors
    ///
    /// Returns [`TenantIdError`] if the value is empty, too long, or contains
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn new(value: impl AsRef<str>) -> Result<Self, TenantIdError> {
        let value = value.as_ref();
        if value.is_empty() {
            return Err(TenantIdError::Empty);
        }
        if value.len() > MAX_TENANT_ID_LENGTH {
            return Err(TenantIdError::TooLong {
                length: value.len(),
            });
        }
        if let Some(invalid) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(TenantIdError::InvalidCharacter(invalid));
        }
        Ok(Self(Arc::from(value)))
    }

    /// Borrow the tenant id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenantIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for TenantId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::new(&value).map_err(serde::de::Error::custom)
    }
}

/// Error type for tenant id validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantIdError {
    /// The tenant id was empty
    #[error("tenant id cannot be empty")]
    Empty,
    /// The tenant id exceeded the maximum length
    #[error("tenant id is {length} characters, maximum is {MAX_TENANT_ID_LENGTH}")]
    TooLong {
        /// Length of the rejected value
        length: usize,
    },
    /// The tenant id contained a disallowed character
    #[error("tenant id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        for id in ["acme", "tenant-42", "ACME_eu_1", "a"] {
            assert_eq!(TenantId::new(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn rejects_invalid_ids() {
        assert_eq!(TenantId::new(""), Err(TenantIdError::Empty));
        assert_eq!(
            TenantId::new("acme corp"),
            Err(TenantIdError::InvalidCharacter(' '))
        );
        assert_eq!(
            TenantId::new("../etc"),
            Err(TenantIdError::InvalidCharacter('.'))
        );
        let long = "x".repeat(MAX_TENANT_ID_LENGTH + 1);
        assert!(matches!(
            TenantId::new(long),
            Err(TenantIdError::TooLong { .. })
        ));
    }

    #[test]
    fn serde_round_trip_validates() {
        let id: TenantId = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"acme\"");
        assert!(serde_json::from_str::<TenantId>("\"not valid\"").is_err());
    }
}
