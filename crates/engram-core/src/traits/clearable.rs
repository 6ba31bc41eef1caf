// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reset contract used between benchmark test cases.

use crate::error::EngramError;
use crate::types::ThreadId;

/// Something that holds per-thread memory and can forget it on demand.
///
/// `clear` must be idempotent: clearing an already empty thread succeeds.
pub trait Clearable {
    fn clear(&mut self, thread_id: &ThreadId) -> Result<(), EngramError>;
}

/// Clears `thread_id` on every target in order, stopping at the first failure.
pub fn reset_all(
    targets: &mut [&mut dyn Clearable],
    thread_id: &ThreadId,
) -> Result<(), EngramError> {
    for target in targets.iter_mut() {
        target.clear(thread_id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        clears: usize,
        fail: bool,
    }

    impl Clearable for Counter {
        fn clear(&mut self, thread_id: &ThreadId) -> Result<(), EngramError> {
            if self.fail {
                return Err(EngramError::ClearNotConfirmed {
                    backend: "counter".into(),
                    thread_id: thread_id.to_string(),
                    reason: "refused".into(),
                });
            }
            self.clears += 1;
            Ok(())
        }
    }

    #[test]
    fn reset_all_clears_every_target() {
        let mut a = Counter::default();
        let mut b = Counter::default();
        reset_all(&mut [&mut a, &mut b], &"t1".into()).unwrap();
        assert_eq!(a.clears, 1);
        assert_eq!(b.clears, 1);
    }

    #[test]
    fn reset_all_stops_at_first_failure() {
        let mut a = Counter {
            fail: true,
            ..Default::default()
        };
        let mut b = Counter::default();
        let err = reset_all(&mut [&mut a, &mut b], &"t1".into()).unwrap_err();
        assert!(matches!(err, EngramError::ClearNotConfirmed { .. }));
        assert_eq!(b.clears, 0);
    }
}
