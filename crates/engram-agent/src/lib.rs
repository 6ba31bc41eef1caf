// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turn pipeline and agent variants for the Engram middleware.
//!
//! A [`MemoryAgent`] runs one conversational turn synchronously:
//! - normalize the incoming message and append it to the thread's state
//! - retrieve memories through the execution bridge
//! - augment the prompt and call the completion provider
//! - append the response and persist both turns to the backend
//!
//! The agent variant (`baseline`, `vdb`, `graph`, `hybrid`) only decides
//! which backend adapters are wired into that pipeline.

pub mod agent;
pub mod builder;
pub mod prompt;
pub mod telemetry;

pub use agent::{MemoryAgent, RetrievalReport, TurnOutcome};
pub use builder::MemoryAgentBuilder;
pub use engram_core::{ConversationStateManager, HistoryOrder};
