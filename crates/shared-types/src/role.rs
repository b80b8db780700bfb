// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Caller roles and their access levels
//!
//! Roles arrive as free-form strings in token claims. Anything not listed
//! here maps to [`Role::Unknown`], which carries the most restrictive level.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Role of an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Full administrative access, including credential revocation for others
    Admin,
    /// May publish events to its own tenant
    Operator,
    /// Read-only access, may subscribe to its tenant's events
    Viewer,
    /// Unrecognised role, no privileges
    Unknown,
}

impl Role {
    /// Numeric access level, higher is more privileged
    ///
    /// Unknown roles are level 0.
    pub const fn access_level(self) -> u8 {
        match self {
            Self::Admin => 3,
            Self::Operator => 2,
            Self::Viewer => 1,
            Self::Unknown => 0,
        }
    }

    /// Whether this role grants at least the access of `required`
    pub const fn allows(self, required: Role) -> bool {
        self.access_level() >= required.access_level()
    }

    /// Canonical lowercase name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Viewer => "viewer",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "operator" => Self::Operator,
            "viewer" => Self::Viewer,
            _ => Self::Unknown,
        })
    }
}

impl Serialize for Role {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let Ok(role) = value.parse::<Role>();
        Ok(role)
    }
}
