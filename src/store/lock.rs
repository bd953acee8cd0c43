use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Set of group uids with an edit in flight.
///
/// A second edit of the same group is rejected instead of queued. Edits of
/// different groups never affect each other.
#[derive(Debug, Clone, Default)]
pub struct GroupLocks {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Held while a group edit is in flight. Releases the uid on drop.
#[derive(Debug)]
pub struct GroupLease {
    uid: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `uid`, or `None` if an edit of that group is already running.
    pub fn try_acquire(&self, uid: &str) -> Option<GroupLease> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(uid.to_string()) {
            return None;
        }
        Some(GroupLease { uid: uid.to_string(), in_flight: Arc::clone(&self.in_flight) })
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self, uid: &str) -> bool {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).contains(uid)
    }
}

impl GroupLease {
    #[cfg(test)]
    pub(crate) fn uid(&self) -> &str {
        &self.uid
    }
}

impl Drop for GroupLease {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_uid_rejected_until_released() {
        let locks = GroupLocks::new();
        let lease = locks.try_acquire("g1").unwrap();
        assert_eq!(lease.uid(), "g1");
        assert!(locks.try_acquire("g1").is_none());
        assert!(locks.is_locked("g1"));

        drop(lease);
        assert!(!locks.is_locked("g1"));
        assert!(locks.try_acquire("g1").is_some());
    }

    #[test]
    fn test_different_uids_independent() {
        let locks = GroupLocks::new();
        let first = locks.try_acquire("g1").unwrap();
        let second = locks.try_acquire("g2").unwrap();

        drop(second);
        // Releasing g2 must not release g1
        assert!(locks.is_locked("g1"));
        assert!(locks.try_acquire("g1").is_none());
        drop(first);
        assert!(!locks.is_locked("g1"));
    }
}
