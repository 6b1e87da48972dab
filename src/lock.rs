//! Per-store exclusive/shared transaction admission.
//!
//! The specification describes `openTransaction` as returning a future that
//! resolves once the transaction is admitted. The teacher crate has no async
//! runtime in its core dependency stack and the spec's scheduling model is
//! "single-threaded cooperative" -- so admission here is modeled as a
//! blocking call guarded by a [`Condvar`], which is the idiomatic
//! synchronous-Rust equivalent of "resolve this future when admitted" and
//! needs no extra dependency. See DESIGN.md for the full rationale.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// The set of stores a transaction wants to lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSet {
    Named(Vec<String>),
    All,
}

impl StoreSet {
    fn resolve(&self, all_stores: &[String]) -> Vec<String> {
        match self {
            StoreSet::Named(names) => names.clone(),
            StoreSet::All => all_stores.to_vec(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreLockState {
    exclusive: bool,
    readonly_count: u32,
}

struct PendingTxn {
    id: u64,
    stores: Vec<String>,
    exclusive: bool,
}

struct ActiveTxn {
    stores: Vec<String>,
    exclusive: bool,
}

struct LockState {
    known_stores: Vec<String>,
    stores: std::collections::HashMap<String, StoreLockState>,
    pending: VecDeque<PendingTxn>,
    active: std::collections::HashMap<u64, ActiveTxn>,
    next_id: u64,
    closing: bool,
    active_exclusive_count: u32,
}

/// An opaque handle identifying an admitted transaction's locks. Must be
/// passed to exactly one of [`LockHelper::transaction_complete`] or
/// [`LockHelper::transaction_failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(u64);

/// Per-store exclusive/shared lock manager arbitrating transaction
/// admission.
pub struct LockHelper {
    state: Mutex<LockState>,
    admitted_cv: Condvar,
    closed_cv: Condvar,
    /// When false, the backend cannot run concurrent discrete transactions:
    /// while any exclusive lock is held, no other transaction of any kind
    /// may be admitted (spec §4.2).
    supports_concurrent_transactions: bool,
}

impl LockHelper {
    #[must_use]
    pub fn new(known_stores: Vec<String>, supports_concurrent_transactions: bool) -> Self {
        let stores = known_stores
            .iter()
            .map(|name| (name.clone(), StoreLockState::default()))
            .collect();
        Self {
            state: Mutex::new(LockState {
                known_stores,
                stores,
                pending: VecDeque::new(),
                active: std::collections::HashMap::new(),
                next_id: 0,
                closing: false,
                active_exclusive_count: 0,
            }),
            admitted_cv: Condvar::new(),
            closed_cv: Condvar::new(),
            supports_concurrent_transactions,
        }
    }

    /// Block until a transaction touching `store_set` is admitted, or fail
    /// immediately with `UnknownStore` / `Closing`.
    ///
    /// # Errors
    ///
    /// `UnknownStore` if any named store isn't part of the schema this
    /// helper was constructed with; `Closing` if the provider is shutting
    /// down.
    pub fn open_transaction(&self, store_set: &StoreSet, exclusive: bool) -> EngineResult<LockToken> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let StoreSet::Named(names) = store_set {
            for name in names {
                if !state.known_stores.iter().any(|s| s == name) {
                    return Err(EngineError::UnknownStore { name: name.clone() });
                }
            }
        }

        if state.closing {
            return Err(EngineError::Closing);
        }

        let stores = store_set.resolve(&state.known_stores);
        let id = state.next_id;
        state.next_id += 1;
        state.pending.push_back(PendingTxn {
            id,
            stores,
            exclusive,
        });
        debug!(txn = id, exclusive, "transaction queued");

        dispatch(&mut state, self.supports_concurrent_transactions);

        loop {
            if state.closing && !state.pending.iter().any(|p| p.id == id) && !state.active.contains_key(&id) {
                // Closed out from under us without ever being admitted.
                return Err(EngineError::Closing);
            }
            if state.active.contains_key(&id) {
                debug!(txn = id, "transaction admitted");
                return Ok(LockToken(id));
            }
            state = self
                .admitted_cv
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Release the locks held by `token` after a successful commit.
    pub fn transaction_complete(&self, token: LockToken) {
        self.release(token, None);
    }

    /// Release the locks held by `token` after an abort/failure.
    pub fn transaction_failed(&self, token: LockToken, reason: &str) {
        warn!(txn = token.0, reason, "transaction failed");
        self.release(token, Some(reason));
    }

    fn release(&self, token: LockToken, _reason: Option<&str>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(active) = state.active.remove(&token.0) else {
            panic!("transaction {} completed/failed twice", token.0);
        };

        if active.exclusive {
            state.active_exclusive_count -= 1;
        }
        for store in &active.stores {
            if let Some(lock) = state.stores.get_mut(store) {
                if active.exclusive {
                    lock.exclusive = false;
                } else {
                    lock.readonly_count = lock.readonly_count.saturating_sub(1);
                }
            }
        }

        dispatch(&mut state, self.supports_concurrent_transactions);
        self.admitted_cv.notify_all();

        if state.closing && state.active.is_empty() && state.pending.is_empty() {
            self.closed_cv.notify_all();
        }
    }

    /// Mark the helper as closing: no further transactions will be admitted,
    /// and this call blocks until every admitted transaction has completed
    /// or failed and the pending queue has drained.
    pub fn close_when_possible(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closing = true;
        // Reject every transaction still waiting; their threads will
        // observe `closing` the next time they wake and return `Closing`.
        state.pending.clear();
        self.admitted_cv.notify_all();

        while !(state.active.is_empty() && state.pending.is_empty()) {
            state = self.closed_cv.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closing
    }
}

/// Admit every pending transaction that can be, in FIFO order, without
/// starving later transactions for unrelated stores: once a pending
/// transaction fails to be admitted, every store it touches is marked
/// "blocked" so no later transaction for those same stores can jump ahead of
/// it this round. Transactions touching disjoint stores are unaffected.
fn dispatch(state: &mut LockState, supports_concurrent_transactions: bool) {
    if state.closing {
        return;
    }
    if !supports_concurrent_transactions && state.active_exclusive_count > 0 {
        return;
    }

    let mut blocked_stores: HashSet<String> = HashSet::new();
    let mut i = 0;
    while i < state.pending.len() {
        let touches_blocked = state.pending[i]
            .stores
            .iter()
            .any(|s| blocked_stores.contains(s));

        let is_exclusive = state.pending[i].exclusive;
        let admittable = !touches_blocked
            && state.pending[i].stores.iter().all(|s| {
                let lock = state.stores.get(s).expect("known store");
                if lock.exclusive {
                    return false;
                }
                !is_exclusive || lock.readonly_count == 0
            });

        if admittable {
            let txn = state.pending.remove(i).expect("index in bounds");
            if txn.exclusive {
                state.active_exclusive_count += 1;
            }
            for store in &txn.stores {
                let lock = state.stores.get_mut(store).expect("known store");
                if txn.exclusive {
                    lock.exclusive = true;
                } else {
                    lock.readonly_count += 1;
                }
            }
            state.active.insert(
                txn.id,
                ActiveTxn {
                    stores: txn.stores,
                    exclusive: txn.exclusive,
                },
            );
            if !supports_concurrent_transactions && state.active_exclusive_count > 0 {
                return;
            }
            // Don't advance `i`: the vacated slot now holds the next item.
        } else {
            for store in &state.pending[i].stores {
                blocked_stores.insert(store.clone());
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn helper() -> Arc<LockHelper> {
        Arc::new(LockHelper::new(
            vec!["a".to_string(), "b".to_string()],
            true,
        ))
    }

    #[test]
    fn unknown_store_is_rejected() {
        let lock = helper();
        let err = lock
            .open_transaction(&StoreSet::Named(vec!["nope".to_string()]), false)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownStore { .. }));
    }

    #[test]
    fn readonly_transactions_share_a_store() {
        let lock = helper();
        let t1 = lock
            .open_transaction(&StoreSet::Named(vec!["a".to_string()]), false)
            .unwrap();
        let t2 = lock
            .open_transaction(&StoreSet::Named(vec!["a".to_string()]), false)
            .unwrap();
        lock.transaction_complete(t1);
        lock.transaction_complete(t2);
    }

    #[test]
    fn exclusive_waits_for_readers_to_drain() {
        let lock = helper();
        let reader = lock
            .open_transaction(&StoreSet::Named(vec!["a".to_string()]), false)
            .unwrap();

        let lock2 = Arc::clone(&lock);
        let writer_admitted = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let writer_admitted2 = Arc::clone(&writer_admitted);
        let writer = thread::spawn(move || {
            let token = lock2
                .open_transaction(&StoreSet::Named(vec!["a".to_string()]), true)
                .unwrap();
            writer_admitted2.store(true, std::sync::atomic::Ordering::SeqCst);
            lock2.transaction_complete(token);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!writer_admitted.load(std::sync::atomic::Ordering::SeqCst));

        lock.transaction_complete(reader);
        writer.join().unwrap();
        assert!(writer_admitted.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn disjoint_stores_do_not_block_each_other() {
        let lock = helper();
        let a = lock
            .open_transaction(&StoreSet::Named(vec!["a".to_string()]), true)
            .unwrap();
        // "b" is free even though "a" is exclusively held.
        let b = lock
            .open_transaction(&StoreSet::Named(vec!["b".to_string()]), true)
            .unwrap();
        lock.transaction_complete(a);
        lock.transaction_complete(b);
    }

    #[test]
    #[should_panic(expected = "completed/failed twice")]
    fn double_complete_panics() {
        let lock = helper();
        let t = lock
            .open_transaction(&StoreSet::Named(vec!["a".to_string()]), false)
            .unwrap();
        lock.transaction_complete(t);
        lock.transaction_complete(t);
    }

    #[test]
    fn close_when_possible_drains_active_transactions() {
        let lock = helper();
        let t = lock
            .open_transaction(&StoreSet::Named(vec!["a".to_string()]), false)
            .unwrap();

        let lock2 = Arc::clone(&lock);
        let closer = thread::spawn(move || lock2.close_when_possible());

        thread::sleep(Duration::from_millis(20));
        lock.transaction_complete(t);
        closer.join().unwrap();
        assert!(lock.is_closing());
    }

    #[test]
    fn new_transactions_rejected_while_closing() {
        let lock = helper();
        lock.close_when_possible();
        let err = lock
            .open_transaction(&StoreSet::Named(vec!["a".to_string()]), false)
            .unwrap_err();
        assert!(matches!(err, EngineError::Closing));
    }
}
