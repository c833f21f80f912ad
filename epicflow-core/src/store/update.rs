//! Structural-update strategies.
//!
//! Handlers always receive a draft of the current state. The strategy
//! decides what "no explicit return" means.

use std::sync::Arc;

use crate::error::Result;

/// Computes the next state from a draft mutator.
///
/// `Ok(None)` means the state did not change.
pub trait StructuralUpdate<S>: Send + Sync {
    fn reduce(
        &self,
        state: &S,
        mutator: &mut dyn FnMut(&mut S) -> Result<Option<S>>,
    ) -> Result<Option<S>>;
}

/// Draft-mutation mode: mutations made to the draft are kept when the
/// handler returns nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DraftUpdate;

impl<S> StructuralUpdate<S> for DraftUpdate
where
    S: Clone + PartialEq,
{
    fn reduce(
        &self,
        state: &S,
        mutator: &mut dyn FnMut(&mut S) -> Result<Option<S>>,
    ) -> Result<Option<S>> {
        let mut draft = state.clone();
        match mutator(&mut draft)? {
            Some(next) => Ok(Some(next)),
            None if draft != *state => Ok(Some(draft)),
            None => Ok(None),
        }
    }
}

/// Replacement mode: only an explicit return changes state. Draft
/// mutations without a return are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceUpdate;

impl<S> StructuralUpdate<S> for ReplaceUpdate
where
    S: Clone,
{
    fn reduce(
        &self,
        state: &S,
        mutator: &mut dyn FnMut(&mut S) -> Result<Option<S>>,
    ) -> Result<Option<S>> {
        let mut draft = state.clone();
        mutator(&mut draft)
    }
}

/// Pick the strategy for a `structural_update` setting.
pub fn strategy_for<S>(structural_update: bool) -> Arc<dyn StructuralUpdate<S>>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    if structural_update {
        Arc::new(DraftUpdate)
    } else {
        Arc::new(ReplaceUpdate)
    }
}
