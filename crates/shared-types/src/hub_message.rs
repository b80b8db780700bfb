// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Wire format for events pushed to connected clients

use serde::{Deserialize, Serialize};

use crate::TenantId;

/// A server-generated event addressed to every client of one tenant
///
/// Serialised as `{"type": ..., "tenant_id": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    /// Event type, e.g. `order.updated`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Tenant the event belongs to
    pub tenant_id: TenantId,
    /// Arbitrary event payload
    pub payload: serde_json::Value,
}

impl HubMessage {
    /// Create a new hub message
    pub fn new(
        event_type: impl Into<String>,
        tenant_id: TenantId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            tenant_id,
            payload,
        }
    }
}
