// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base trait shared by every memory backend adapter.

use async_trait::async_trait;

use crate::error::EngramError;
use crate::types::{BackendKind, HealthStatus};

/// Identity and lifecycle of a memory backend adapter.
#[async_trait]
pub trait MemoryAdapter: Send + Sync + 'static {
    /// Returns the human-readable name of this adapter instance.
    fn name(&self) -> &str;

    /// Returns the backend family this adapter talks to.
    fn kind(&self) -> BackendKind;

    /// Performs a health check and returns the adapter's current status.
    async fn health_check(&self) -> Result<HealthStatus, EngramError>;

    /// Gracefully shuts down the adapter, releasing any held resources.
    async fn shutdown(&self) -> Result<(), EngramError>;
}
