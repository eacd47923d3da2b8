//! Per-slot memoization of block materializations.
//!
//! Every slot (one per block index, plus the preview) moves through
//! `NotRequested -> Pending -> Ready`. A failed materialization drops the slot
//! back to `NotRequested` so the next request reads again; it never leaves a
//! failure cached. All callers that arrive while a slot is pending await the
//! same shared future, so a slot is read at most once per success.

use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::warn;

use crate::block::Block;
use crate::error::Result;

/// Cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Preview,
    Block(usize),
}

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    NotRequested,
    Pending,
    Ready,
}

pub(crate) type Materialization = Shared<BoxFuture<'static, Result<Block>>>;

enum SlotState {
    Pending(Materialization),
    Ready(Block),
}

pub(crate) enum Lookup {
    Ready(Block),
    Pending(Materialization),
    Absent,
}

#[derive(Default)]
pub(crate) struct SlotCache {
    slots: Mutex<HashMap<Slot, SlotState>>,
}

impl SlotCache {
    /// Return the slot's cached or in-flight value. For an empty slot, `start`
    /// decides whether there is anything to read; its future is registered as
    /// pending before the lock is released.
    pub fn lookup_or_start<F>(&self, slot: Slot, start: F) -> Result<Lookup>
    where
        F: FnOnce() -> Result<Option<BoxFuture<'static, Result<Block>>>>,
    {
        let mut slots = self.slots.lock();
        match slots.get(&slot) {
            Some(SlotState::Ready(block))  => return Ok(Lookup::Ready(block.clone())),
            Some(SlotState::Pending(fut))  => return Ok(Lookup::Pending(fut.clone())),
            None => {}
        }
        Ok(match start()? {
            Some(fut) => {
                let shared = fut.shared();
                slots.insert(slot, SlotState::Pending(shared.clone()));
                Lookup::Pending(shared)
            }
            None => Lookup::Absent,
        })
    }

    /// Await a pending materialization and settle the slot with its outcome.
    ///
    /// Only the materialization still registered for the slot may settle it;
    /// a value stored by [`Self::fill`] in the meantime wins.
    pub async fn resolve(&self, slot: Slot, pending: Materialization) -> Result<Block> {
        let outcome = pending.clone().await;

        let mut slots = self.slots.lock();
        let current = matches!(
            slots.get(&slot),
            Some(SlotState::Pending(fut)) if Shared::ptr_eq(fut, &pending)
        );
        if current {
            match &outcome {
                Ok(block) => {
                    slots.insert(slot, SlotState::Ready(block.clone()));
                }
                Err(err) => {
                    warn!(?slot, error = %err, "materialization failed; slot cleared for retry");
                    slots.remove(&slot);
                }
            }
        }
        outcome
    }

    /// Store an in-memory value, replacing whatever the slot held.
    pub fn fill(&mut self, slot: Slot, block: Block) {
        self.slots.get_mut().insert(slot, SlotState::Ready(block));
    }

    pub fn status(&self, slot: Slot) -> SlotStatus {
        match self.slots.lock().get(&slot) {
            None                         => SlotStatus::NotRequested,
            Some(SlotState::Pending(_))  => SlotStatus::Pending,
            Some(SlotState::Ready(_))    => SlotStatus::Ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HpkgError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted(calls: &Arc<AtomicUsize>, outcome: Result<Block>) -> BoxFuture<'static, Result<Block>> {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            outcome
        }
        .boxed()
    }

    async fn get(cache: &SlotCache, slot: Slot, fut: Option<BoxFuture<'static, Result<Block>>>) -> Result<Option<Block>> {
        match cache.lookup_or_start(slot, || Ok(fut))? {
            Lookup::Ready(block)     => Ok(Some(block)),
            Lookup::Pending(pending) => cache.resolve(slot, pending).await.map(Some),
            Lookup::Absent           => Ok(None),
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_materialization() {
        let cache = SlotCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let block = Block::new("text/plain", &b"hi"[..]);

        let (a, b) = tokio::join!(
            get(&cache, Slot::Block(2), Some(counted(&calls, Ok(block.clone())))),
            get(&cache, Slot::Block(2), Some(counted(&calls, Ok(block.clone())))),
        );

        assert_eq!(a.unwrap(), Some(block.clone()));
        assert_eq!(b.unwrap(), Some(block));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.status(Slot::Block(2)), SlotStatus::Ready);
    }

    #[tokio::test]
    async fn failure_clears_the_slot() {
        let cache = SlotCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let failure = Err(HpkgError::header("boom"));

        assert!(get(&cache, Slot::Preview, Some(counted(&calls, failure))).await.is_err());
        assert_eq!(cache.status(Slot::Preview), SlotStatus::NotRequested);

        let block = Block::new("image/png", &b"png"[..]);
        let got = get(&cache, Slot::Preview, Some(counted(&calls, Ok(block.clone())))).await;
        assert_eq!(got.unwrap(), Some(block));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn absent_slot_stays_unrequested() {
        let cache = SlotCache::default();
        assert_eq!(get(&cache, Slot::Block(99), None).await.unwrap(), None);
        assert_eq!(cache.status(Slot::Block(99)), SlotStatus::NotRequested);
    }

    #[tokio::test]
    async fn fill_overrides_pending_materialization() {
        let mut cache = SlotCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let read = Block::new("a", &b"old"[..]);

        let pending = match cache.lookup_or_start(Slot::Preview, || Ok(Some(counted(&calls, Ok(read.clone()))))).unwrap() {
            Lookup::Pending(p) => p,
            _ => panic!("expected a pending slot"),
        };
        let replacement = Block::new("b", &b"new"[..]);
        cache.fill(Slot::Preview, replacement.clone());

        assert_eq!(cache.resolve(Slot::Preview, pending).await.unwrap(), read);
        assert_eq!(get(&cache, Slot::Preview, None).await.unwrap(), Some(replacement));
    }
}
