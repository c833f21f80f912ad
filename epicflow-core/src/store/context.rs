//! Reduction Context
//!
//! Tracks which stores are currently running a reducer on this thread, so a
//! handler that dispatches back into its own store is rejected instead of
//! deadlocking on the state lock.
//!
//! # Implementation
//!
//! A thread-local stack of store IDs. Entering a reduction pushes the store;
//! the returned guard pops it when dropped, including on panic.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::action::ActionType;
use crate::error::{Result, StoreError};

/// Unique identifier for a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

thread_local! {
    static REDUCING: RefCell<Vec<StoreId>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the reduction entry when dropped.
pub(crate) struct ReductionContext {
    store: StoreId,
}

impl ReductionContext {
    /// Mark `store` as reducing `kind` on this thread.
    ///
    /// Fails if the same store is already reducing here.
    pub(crate) fn enter(store: StoreId, kind: &ActionType) -> Result<Self> {
        REDUCING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&store) {
                return Err(StoreError::ReentrantDispatch(kind.clone()));
            }
            stack.push(store);
            Ok(Self { store })
        })
    }

    pub(crate) fn is_reducing(store: StoreId) -> bool {
        REDUCING.with(|stack| stack.borrow().contains(&store))
    }
}

impl Drop for ReductionContext {
    fn drop(&mut self) {
        REDUCING.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(store) = popped {
                debug_assert_eq!(
                    store, self.store,
                    "ReductionContext mismatch: expected {:?}, got {:?}",
                    self.store, store
                );
            }
        });
    }
}
