// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Shared types for the tenant gateway
//!
//! This crate provides common types that are shared across multiple crates
//! in the gateway workspace, avoiding circular dependencies.

pub mod hub_message;
pub mod role;
pub mod tenant;

pub use hub_message::HubMessage;
pub use role::Role;
pub use tenant::{TenantId, TenantIdError};
