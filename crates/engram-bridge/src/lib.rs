// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous execution bridge.
//!
//! Backend adapters are asynchronous and network-bound while the agent's
//! turn loop is synchronous. [`ExecutionBridge`] owns a multi-threaded tokio
//! runtime and runs adapter futures to completion on behalf of the loop with
//! an explicit timeout, keeping at most one write in flight per thread.

pub mod bridge;
mod lane;

pub use bridge::ExecutionBridge;
