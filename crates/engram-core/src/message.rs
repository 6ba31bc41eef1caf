// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message normalizer: native [`ProviderMessage`]s to canonical [`Turn`]s and back.
//!
//! A message made of exactly one text block is stored verbatim. Every other
//! shape is stored as [`BLOCKS_MARKER`] followed by the JSON array of its
//! blocks, so the conversion is lossless in both directions.

use chrono::{DateTime, Utc};

use crate::error::EngramError;
use crate::types::{ContentBlock, ProviderMessage, Role, ThreadId, Turn};

/// Prefix of a turn content that carries serialized content blocks.
pub const BLOCKS_MARKER: &str = "\u{1}engram:blocks:";

/// Maps a native role name onto the canonical enum.
///
/// Accepts the aliases `human` and `ai`. Tool messages and unknown roles are
/// rejected.
pub fn parse_role(role: &str) -> Result<Role, EngramError> {
    match role.to_ascii_lowercase().as_str() {
        "user" | "human" => Ok(Role::User),
        "assistant" | "ai" => Ok(Role::Assistant),
        "system" => Ok(Role::System),
        _ => Err(EngramError::UnsupportedMessageKind {
            role: role.to_string(),
        }),
    }
}

/// Converts a native message into an unsequenced turn stamped now.
pub fn to_turn(thread_id: &ThreadId, message: &ProviderMessage) -> Result<Turn, EngramError> {
    to_turn_at(thread_id, message, Utc::now())
}

/// Converts a native message into an unsequenced turn with an explicit timestamp.
pub fn to_turn_at(
    thread_id: &ThreadId,
    message: &ProviderMessage,
    timestamp: DateTime<Utc>,
) -> Result<Turn, EngramError> {
    let role = parse_role(&message.role)?;
    let content = encode_content(&message.content)?;
    Ok(Turn::new(thread_id.clone(), role, content, timestamp))
}

/// Converts a turn back into the native representation.
pub fn from_turn(turn: &Turn) -> Result<ProviderMessage, EngramError> {
    Ok(ProviderMessage {
        role: turn.role.to_string(),
        content: decode_content(&turn.content)?,
    })
}

/// Encodes content blocks into a turn content string.
pub fn encode_content(blocks: &[ContentBlock]) -> Result<String, EngramError> {
    if let [ContentBlock::Text { text }] = blocks {
        if !text.starts_with(BLOCKS_MARKER) {
            return Ok(text.clone());
        }
    }
    let json = serde_json::to_string(blocks)?;
    Ok(format!("{BLOCKS_MARKER}{json}"))
}

/// Decodes a turn content string produced by [`encode_content`].
pub fn decode_content(content: &str) -> Result<Vec<ContentBlock>, EngramError> {
    match content.strip_prefix(BLOCKS_MARKER) {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Ok(vec![ContentBlock::Text {
            text: content.to_string(),
        }]),
    }
}

/// Flattens a native message into plain text for embedding and search.
pub fn message_text(message: &ProviderMessage) -> String {
    blocks_text(&message.content)
}

/// Plain text of a turn, decoding structured content when present.
pub fn turn_text(turn: &Turn) -> String {
    match decode_content(&turn.content) {
        Ok(blocks) => blocks_text(&blocks),
        Err(_) => turn.content.clone(),
    }
}

fn blocks_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::ToolUse { name, input, .. } => format!("[tool call {name}] {input}"),
            ContentBlock::ToolResult { content, .. } => content.clone(),
            ContentBlock::Image { media_type, .. } => format!("[image {media_type}]"),
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
