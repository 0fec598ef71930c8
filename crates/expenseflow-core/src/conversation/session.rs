//! Per-user session store
//!
//! A session is the user's receipt queue plus the dialogue stage of its head
//! item, kept together so one cannot exist without the other. A user with no
//! pending work has no session at all.
//!
//! Each user gets a slot guarded by its own async mutex. Holding the slot
//! guard serializes that user's messages while other users proceed in
//! parallel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::models::{CandidateExpense, Classification, UserId};

/// Dialogue stage for the head-of-queue item
///
/// The classification gathered so far travels inside the stage, so a stage
/// can never hold attributes that contradict it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    AwaitingCategory,
    /// Business chosen, asking who paid
    AwaitingReimbursement,
    /// Business and reimbursable, asking for the project label
    AwaitingProject,
    AwaitingNotes(Classification),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingCategory => "awaiting_category",
            Self::AwaitingReimbursement => "awaiting_reimbursement",
            Self::AwaitingProject => "awaiting_project",
            Self::AwaitingNotes(_) => "awaiting_notes",
        }
    }
}

/// One user's pending work
#[derive(Debug, Clone)]
pub struct Session {
    queue: VecDeque<CandidateExpense>,
    pub stage: Stage,
}

impl Session {
    /// Start a session with its first receipt at the head
    pub fn new(first: CandidateExpense) -> Self {
        Self {
            queue: VecDeque::from([first]),
            stage: Stage::AwaitingCategory,
        }
    }

    /// The item being classified
    pub fn head(&self) -> Option<&CandidateExpense> {
        self.queue.front()
    }

    /// Append a receipt behind the current one; returns the new queue length
    pub fn enqueue(&mut self, candidate: CandidateExpense) -> usize {
        self.queue.push_back(candidate);
        self.queue.len()
    }

    /// Remove the head item and reset the stage for the next one
    pub fn pop_head(&mut self) -> Option<CandidateExpense> {
        let head = self.queue.pop_front();
        self.stage = Stage::AwaitingCategory;
        head
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

type Slot = Arc<Mutex<Option<Session>>>;

/// Exclusive access to one user's session slot
pub type SessionGuard = OwnedMutexGuard<Option<Session>>;

/// In-memory keyed session store
#[derive(Debug, Default)]
pub struct SessionStore {
    slots: RwLock<HashMap<UserId, Slot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a user's slot, creating it if needed
    ///
    /// The guard holds `None` when the user has no pending work.
    pub async fn lock(&self, user_id: UserId) -> SessionGuard {
        let existing = self.slots.read().await.get(&user_id).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => self
                .slots
                .write()
                .await
                .entry(user_id)
                .or_default()
                .clone(),
        };
        slot.lock_owned().await
    }

    /// Drop a user's slot once it is empty and nobody else is waiting on it
    ///
    /// Call after releasing the guard. A slot another task still references
    /// is left alone; that task will prune it later.
    pub async fn release(&self, user_id: UserId) {
        let mut slots = self.slots.write().await;
        let removable = slots.get(&user_id).is_some_and(|slot| {
            Arc::strong_count(slot) == 1
                && slot.try_lock().map(|guard| guard.is_none()).unwrap_or(false)
        });
        if removable {
            slots.remove(&user_id);
        }
    }

    /// Number of receipts queued for a user
    pub async fn pending_count(&self, user_id: UserId) -> usize {
        let slot = self.slots.read().await.get(&user_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.as_ref().map_or(0, Session::len),
            None => 0,
        }
    }

    /// Whether the user has a live session
    pub async fn has_session(&self, user_id: UserId) -> bool {
        self.pending_count(user_id).await > 0
    }

    /// Number of users with a slot (live or being handled)
    pub async fn user_count(&self) -> usize {
        self.slots.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Passthrough;

    fn candidate(merchant: &str) -> CandidateExpense {
        CandidateExpense {
            merchant: merchant.to_string(),
            amount: 10.0,
            currency: "INR".to_string(),
            date: None,
            items: vec![],
            tax_amount: None,
            payment_method: None,
            category: None,
            alert: None,
            passthrough: Passthrough::default(),
        }
    }

    #[test]
    fn test_session_queue_order() {
        let mut session = Session::new(candidate("R1"));
        assert_eq!(session.enqueue(candidate("R2")), 2);
        assert_eq!(session.enqueue(candidate("R3")), 3);

        session.stage = Stage::AwaitingNotes(Classification::Personal);
        assert_eq!(session.pop_head().unwrap().merchant, "R1");
        assert_eq!(session.stage, Stage::AwaitingCategory);
        assert_eq!(session.head().unwrap().merchant, "R2");
        assert_eq!(session.len(), 2);
    }

    #[tokio::test]
    async fn test_release_removes_empty_slot() {
        let store = SessionStore::new();
        {
            let mut guard = store.lock(1).await;
            *guard = Some(Session::new(candidate("R1")));
        }
        store.release(1).await;
        assert_eq!(store.pending_count(1).await, 1);
        assert_eq!(store.user_count().await, 1);

        {
            let mut guard = store.lock(1).await;
            *guard = None;
        }
        store.release(1).await;
        assert_eq!(store.user_count().await, 0);
        assert!(!store.has_session(1).await);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let store = Arc::new(SessionStore::new());
        let guard_a = store.lock(1).await;

        // A second user is not blocked by the first user's guard
        let other = tokio::time::timeout(std::time::Duration::from_secs(1), store.lock(2)).await;
        assert!(other.is_ok());

        // The same user is blocked until the guard drops
        let same = tokio::time::timeout(std::time::Duration::from_millis(50), store.lock(1)).await;
        assert!(same.is_err());
        drop(guard_a);
    }
}
