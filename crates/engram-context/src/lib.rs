// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrieval and augmentation middleware.
//!
//! - [`RetrievalMiddleware`] asks the configured backend for memories relevant
//!   to the latest turns, through the execution bridge, and turns every
//!   failure into a degraded empty result.
//! - [`AugmentationMiddleware`] injects retrieved memories into the prompt
//!   under a token budget.

pub mod augmentation;
pub mod retrieval;

pub use augmentation::{AugmentationMiddleware, estimate_tokens};
pub use retrieval::RetrievalMiddleware;
