// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-thread write lanes.
//!
//! Each thread has a tail future that resolves when its most recent write
//! finishes. A new write swaps itself in as the tail and waits on the old
//! one, so writes execute in submission order even if the submitting caller
//! gives up waiting.
//!
//! A write that fails after its caller stopped waiting parks its error on
//! the lane until the next write on that thread collects it.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

use dashmap::DashMap;
use engram_core::{EngramError, ThreadId};

pub(crate) type Completion = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
pub(crate) struct WriteLanes {
    tails: Arc<DashMap<ThreadId, Completion>>,
    failures: Arc<DashMap<ThreadId, EngramError>>,
}

/// Held by a running write; dropping it (normally or on panic) releases the lane.
pub(crate) struct LaneTicket {
    pub(crate) previous: Option<Completion>,
    thread_id: ThreadId,
    own: Completion,
    done: Option<oneshot::Sender<()>>,
    tails: Arc<DashMap<ThreadId, Completion>>,
}

impl LaneTicket {
    pub(crate) fn finish(self) {
        drop(self);
    }
}

impl Drop for LaneTicket {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        // Only the last write of a thread owns the tail entry.
        self.tails
            .remove_if(&self.thread_id, |_, tail| tail.ptr_eq(&self.own));
    }
}

/// Where a detached write reports a failure nobody was waiting for.
#[derive(Clone)]
pub(crate) struct FailureSink {
    thread_id: ThreadId,
    failures: Arc<DashMap<ThreadId, EngramError>>,
}

impl FailureSink {
    pub(crate) fn park(&self, error: EngramError) {
        self.failures.insert(self.thread_id.clone(), error);
    }
}

impl WriteLanes {
    /// Enqueues a write on the thread's lane and returns its ticket.
    ///
    /// Must be called synchronously at submission time; that call order is
    /// the execution order.
    pub(crate) fn enqueue(&self, thread_id: &ThreadId) -> LaneTicket {
        let (tx, rx) = oneshot::channel::<()>();
        let completion: Completion = rx.map(|_| ()).boxed().shared();
        let previous = self.tails.insert(thread_id.clone(), completion.clone());
        LaneTicket {
            previous,
            thread_id: thread_id.clone(),
            own: completion,
            done: Some(tx),
            tails: Arc::clone(&self.tails),
        }
    }

    /// Future resolving once every write submitted so far on the thread is done.
    pub(crate) fn drained(&self, thread_id: &ThreadId) -> Option<Completion> {
        self.tails.get(thread_id).map(|tail| tail.value().clone())
    }

    pub(crate) fn sink(&self, thread_id: &ThreadId) -> FailureSink {
        FailureSink {
            thread_id: thread_id.clone(),
            failures: Arc::clone(&self.failures),
        }
    }

    /// Removes and returns the failure parked by an earlier detached write.
    pub(crate) fn take_failure(&self, thread_id: &ThreadId) -> Option<EngramError> {
        self.failures.remove(thread_id).map(|(_, error)| error)
    }

    pub(crate) fn has_failure(&self, thread_id: &ThreadId) -> bool {
        self.failures.contains_key(thread_id)
    }

    pub(crate) fn tracked_threads(&self) -> usize {
        self.tails.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_lane_releases_its_tail_entry() {
        let lanes = WriteLanes::default();
        let thread = ThreadId::new("t1");

        let first = lanes.enqueue(&thread);
        let second = lanes.enqueue(&thread);
        assert_eq!(lanes.tracked_threads(), 1);

        // The first ticket is no longer the tail, so the entry stays.
        first.finish();
        assert_eq!(lanes.tracked_threads(), 1);

        second.finish();
        assert_eq!(lanes.tracked_threads(), 0);
        assert!(lanes.drained(&thread).is_none());
    }

    #[tokio::test]
    async fn parked_failure_is_taken_once() {
        let lanes = WriteLanes::default();
        let thread = ThreadId::new("t1");

        lanes
            .sink(&thread)
            .park(EngramError::Internal("lost write".into()));
        assert!(lanes.has_failure(&thread));
        assert!(matches!(
            lanes.take_failure(&thread),
            Some(EngramError::Internal(_))
        ));
        assert!(lanes.take_failure(&thread).is_none());
    }
}
