// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The language-model call, seen from the middleware.

use async_trait::async_trait;

use crate::error::EngramError;
use crate::types::{AgentContext, ProviderMessage};

/// Prompt in, completion out.
///
/// The calling agent owns model selection and wire details; the middleware
/// only supplies the augmented context.
#[async_trait]
pub trait CompletionProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Produces the assistant reply for the given context.
    async fn complete(&self, context: AgentContext) -> Result<ProviderMessage, EngramError>;
}
