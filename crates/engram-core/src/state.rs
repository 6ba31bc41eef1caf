// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation State Manager.
//!
//! Owns one [`ConversationState`] per thread. The state's mutators are
//! private to this crate, so the manager is the only way to change a thread's
//! history. All mutation goes through `&mut self`; there is no internal
//! locking, so concurrent turns for the same thread are impossible by
//! construction.

use std::collections::HashMap;

use tracing::debug;

use crate::error::EngramError;
use crate::traits::Clearable;
use crate::types::{ConversationState, ThreadId, Turn};

/// Order in which [`ConversationStateManager::history`] returns turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryOrder {
    #[default]
    Chronological,
    MostRecentFirst,
}

#[derive(Debug, Default)]
pub struct ConversationStateManager {
    states: HashMap<ThreadId, ConversationState>,
    allow_out_of_order: bool,
}

impl ConversationStateManager {
    /// `allow_out_of_order` accepts turns older than the last one (batch replay).
    pub fn new(allow_out_of_order: bool) -> Self {
        Self {
            states: HashMap::new(),
            allow_out_of_order,
        }
    }

    pub fn allows_out_of_order(&self) -> bool {
        self.allow_out_of_order
    }

    fn entry(&mut self, thread_id: &ThreadId) -> &mut ConversationState {
        self.states
            .entry(thread_id.clone())
            .or_insert_with(|| ConversationState::new(thread_id.clone()))
    }

    /// Appends a turn and returns the new checkpoint version.
    pub fn append(&mut self, thread_id: &ThreadId, turn: Turn) -> Result<u64, EngramError> {
        self.append_turn(thread_id, turn)?;
        Ok(self.checkpoint_version(thread_id))
    }

    /// Appends a turn and returns it as stamped (thread id and sequence number).
    pub fn append_turn(&mut self, thread_id: &ThreadId, turn: Turn) -> Result<Turn, EngramError> {
        let allow = self.allow_out_of_order;
        let stamped = self.entry(thread_id).apply_append(turn, allow)?;
        debug!(thread_id = %thread_id, seq = stamped.seq, role = %stamped.role, "turn appended");
        Ok(stamped)
    }

    /// Copies of the thread's turns, optionally limited to the most recent `limit`.
    pub fn history(
        &self,
        thread_id: &ThreadId,
        limit: Option<usize>,
        order: HistoryOrder,
    ) -> Vec<Turn> {
        let Some(state) = self.states.get(thread_id) else {
            return Vec::new();
        };
        let turns = match limit {
            Some(n) => state.window(n),
            None => state.history(),
        };
        match order {
            HistoryOrder::Chronological => turns.to_vec(),
            HistoryOrder::MostRecentFirst => turns.iter().rev().cloned().collect(),
        }
    }

    /// Marks a clear as in progress for the thread.
    pub fn begin_clear(&mut self, thread_id: &ThreadId) {
        self.entry(thread_id).begin_clear();
    }

    /// Empties the thread's history and returns the bumped version. Idempotent.
    pub fn clear(&mut self, thread_id: &ThreadId) -> u64 {
        let version = self.entry(thread_id).apply_clear();
        debug!(thread_id = %thread_id, version, "conversation state cleared");
        version
    }

    /// Snapshot of the thread's state; an empty state for unknown threads.
    pub fn state(&self, thread_id: &ThreadId) -> ConversationState {
        self.states
            .get(thread_id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(thread_id.clone()))
    }

    /// Installs a previously captured state, replacing any existing one.
    pub fn restore(&mut self, state: ConversationState) {
        debug!(
            thread_id = %state.thread_id(),
            version = state.checkpoint_version(),
            turns = state.history().len(),
            "conversation state restored"
        );
        self.states.insert(state.thread_id().clone(), state);
    }

    /// Known threads, sorted.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self.states.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn checkpoint_version(&self, thread_id: &ThreadId) -> u64 {
        self.states
            .get(thread_id)
            .map(ConversationState::checkpoint_version)
            .unwrap_or(0)
    }

    pub fn pending_clear(&self, thread_id: &ThreadId) -> bool {
        self.states
            .get(thread_id)
            .is_some_and(ConversationState::pending_clear)
    }
}

impl Clearable for ConversationStateManager {
    fn clear(&mut self, thread_id: &ThreadId) -> Result<(), EngramError> {
        ConversationStateManager::clear(self, thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use crate::types::Role;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn turn(content: &str, secs: i64) -> Turn {
        Turn::new("ignored".into(), Role::User, content, at(secs))
    }

    #[test]
    fn append_returns_strictly_increasing_versions() {
        let mut mgr = ConversationStateManager::default();
        let t1: ThreadId = "t1".into();
        let v1 = mgr.append(&t1, turn("a", 1)).unwrap();
        let v2 = mgr.append(&t1, turn("b", 2)).unwrap();
        assert!(v2 > v1);
        assert_eq!(mgr.checkpoint_version(&t1), v2);
    }

    #[test]
    fn history_orders_and_limits() {
        let mut mgr = ConversationStateManager::default();
        let t1: ThreadId = "t1".into();
        for (i, c) in ["a", "b", "c"].iter().enumerate() {
            mgr.append(&t1, turn(c, i as i64)).unwrap();
        }
        let chrono: Vec<_> = mgr
            .history(&t1, None, HistoryOrder::Chronological)
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(chrono, ["a", "b", "c"]);
        let recent: Vec<_> = mgr
            .history(&t1, Some(2), HistoryOrder::MostRecentFirst)
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(recent, ["c", "b"]);
    }

    #[test]
    fn out_of_order_rejected_unless_allowed() {
        let t1: ThreadId = "t1".into();
        let mut strict = ConversationStateManager::new(false);
        strict.append(&t1, turn("late", 10)).unwrap();
        assert!(matches!(
            strict.append(&t1, turn("early", 5)),
            Err(EngramError::OutOfOrderTurn { .. })
        ));

        let mut lenient = ConversationStateManager::new(true);
        lenient.append(&t1, turn("late", 10)).unwrap();
        lenient.append(&t1, turn("early", 5)).unwrap();
        assert_eq!(lenient.history(&t1, None, HistoryOrder::Chronological).len(), 2);
    }

    #[test]
    fn clear_is_idempotent_and_bumps_version() {
        let mut mgr = ConversationStateManager::default();
        let t1: ThreadId = "t1".into();
        mgr.append(&t1, turn("a", 1)).unwrap();
        let v1 = mgr.clear(&t1);
        let v2 = mgr.clear(&t1);
        assert!(v2 > v1);
        assert!(mgr.state(&t1).is_empty());
        Clearable::clear(&mut mgr, &t1).unwrap();
        assert!(mgr.state(&t1).is_empty());
    }

    #[test]
    fn threads_do_not_share_state() {
        let mut mgr = ConversationStateManager::default();
        mgr.append(&"a".into(), turn("for a", 1)).unwrap();
        mgr.append(&"b".into(), turn("for b", 1)).unwrap();
        let a = mgr.history(&"a".into(), None, HistoryOrder::Chronological);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "for a");
        assert_eq!(a[0].thread_id.as_str(), "a");
        assert_eq!(mgr.thread_ids(), vec![ThreadId::from("a"), ThreadId::from("b")]);
    }

    #[test]
    fn restore_installs_snapshot() {
        let mut mgr = ConversationStateManager::default();
        let snapshot = ConversationState::restore("t9".into(), vec![turn("old", 1)], 12);
        mgr.restore(snapshot);
        assert_eq!(mgr.checkpoint_version(&"t9".into()), 12);
        let v = mgr.append(&"t9".into(), turn("new", 2)).unwrap();
        assert_eq!(v, 13);
    }

    #[test]
    fn unknown_thread_is_empty() {
        let mgr = ConversationStateManager::default();
        assert_eq!(mgr.checkpoint_version(&"nope".into()), 0);
        assert!(mgr.history(&"nope".into(), None, HistoryOrder::Chronological).is_empty());
        assert!(!mgr.pending_clear(&"nope".into()));
    }
}
