//! Name to handle registry shared by every transaction of an environment.
//!
//! A handle opened by a write transaction stays pending until that
//! transaction commits: other transactions cannot use it and `close_map`
//! rejects it. Aborting the opener forgets the handle again.

use crate::error::{CoreError, CoreResult};
use crate::store::MapName;
use crate::types::{MapHandle, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;

/// The write transaction frame that opened a pending handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameOwner {
    pub(crate) txn: TransactionId,
    pub(crate) depth: usize,
}

impl FrameOwner {
    /// Whether a frame opened by `self` can see handles opened by `other`.
    fn sees(self, other: Self) -> bool {
        self.txn == other.txn && other.depth <= self.depth
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Pending(FrameOwner),
    Committed,
}

#[derive(Debug)]
struct Slot {
    name: MapName,
    generation: u32,
    state: SlotState,
}

#[derive(Debug)]
struct Inner {
    slots: Vec<Slot>,
    by_name: HashMap<String, u32>,
    free: Vec<u32>,
}

impl Inner {
    fn slot(&self, handle: MapHandle) -> Option<&Slot> {
        self.slots
            .get(handle.slot() as usize)
            .filter(|slot| slot.generation == handle.generation() && slot.state != SlotState::Free)
    }

    fn handle(&self, index: u32) -> MapHandle {
        MapHandle::new(index, self.slots[index as usize].generation)
    }

    fn free_slot(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        if let Some(name) = slot.name.take() {
            self.by_name.remove(&name);
        }
        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }
}

/// Registry of open map handles.
#[derive(Debug)]
pub(crate) struct MapRegistry {
    inner: Mutex<Inner>,
}

impl MapRegistry {
    pub(crate) fn new() -> Self {
        let default = Slot {
            name: None,
            generation: MapHandle::DEFAULT.generation(),
            state: SlotState::Committed,
        };
        Self {
            inner: Mutex::new(Inner {
                slots: vec![default],
                by_name: HashMap::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Returns the handle for `name`, registering it on first use.
    ///
    /// `requester` is the opening write frame, or `None` for a read
    /// transaction, which only ever opens maps that are already durable.
    pub(crate) fn acquire(&self, name: &str, requester: Option<FrameOwner>) -> MapHandle {
        let mut inner = self.inner.lock();
        if let Some(&index) = inner.by_name.get(name) {
            let slot = &mut inner.slots[index as usize];
            slot.state = match (slot.state, requester) {
                (SlotState::Pending(owner), Some(requester)) if requester.sees(owner) => {
                    SlotState::Pending(owner)
                }
                (SlotState::Pending(_), Some(requester)) => SlotState::Pending(requester),
                (SlotState::Pending(_), None) => SlotState::Committed,
                (state, _) => state,
            };
            return inner.handle(index);
        }

        let state = requester.map_or(SlotState::Committed, SlotState::Pending);
        let index = match inner.free.pop() {
            Some(index) => {
                let slot = &mut inner.slots[index as usize];
                slot.name = Some(name.to_string());
                slot.state = state;
                index
            }
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot {
                    name: Some(name.to_string()),
                    generation: 0,
                    state,
                });
                index
            }
        };
        inner.by_name.insert(name.to_string(), index);
        inner.handle(index)
    }

    /// Resolves a handle to its map name for a transaction.
    pub(crate) fn resolve(&self, handle: MapHandle, requester: Option<FrameOwner>) -> CoreResult<MapName> {
        let inner = self.inner.lock();
        let slot = inner
            .slot(handle)
            .ok_or_else(|| CoreError::bad_handle(handle, "handle is stale or unknown"))?;
        match (slot.state, requester) {
            (SlotState::Pending(owner), Some(requester)) if requester.sees(owner) => Ok(slot.name.clone()),
            (SlotState::Pending(_), _) => Err(CoreError::bad_handle(
                handle,
                "handle belongs to an uncommitted transaction",
            )),
            _ => Ok(slot.name.clone()),
        }
    }

    /// Invalidates a committed handle.
    pub(crate) fn close(&self, handle: MapHandle) -> CoreResult<()> {
        if handle == MapHandle::DEFAULT {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        let state = inner
            .slot(handle)
            .map(|slot| slot.state)
            .ok_or_else(|| CoreError::bad_handle(handle, "handle is stale or unknown"))?;
        if let SlotState::Pending(owner) = state {
            return Err(CoreError::bad_handle(
                handle,
                format!("handle was opened by {} and is not committed yet", owner.txn),
            ));
        }
        inner.free_slot(handle.slot());
        Ok(())
    }

    /// Hands pending handles of `from` to `to`, or commits them when `to`
    /// is `None`.
    pub(crate) fn promote(&self, from: FrameOwner, to: Option<FrameOwner>) {
        let mut inner = self.inner.lock();
        let next = to.map_or(SlotState::Committed, SlotState::Pending);
        for slot in &mut inner.slots {
            if slot.state == SlotState::Pending(from) {
                slot.state = next;
            }
        }
    }

    /// Forgets every handle still pending for `owner`.
    pub(crate) fn discard(&self, owner: FrameOwner) {
        let mut inner = self.inner.lock();
        let pending: Vec<u32> = inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Pending(owner))
            .map(|(index, _)| index as u32)
            .collect();
        for index in pending {
            inner.free_slot(index);
        }
    }

    /// Invalidates a handle whose map was dropped.
    pub(crate) fn release(&self, handle: MapHandle) {
        if handle == MapHandle::DEFAULT {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.slot(handle).is_some() {
            inner.free_slot(handle.slot());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn owner(txn: u64, depth: usize) -> FrameOwner {
        FrameOwner {
            txn: TransactionId::new(txn),
            depth,
        }
    }

    #[test]
    fn same_name_same_handle() {
        let registry = MapRegistry::new();
        let a = registry.acquire("users", None);
        let b = registry.acquire("users", None);
        assert_eq!(a, b);
        assert_ne!(a, registry.acquire("orders", None));
    }

    #[test]
    fn pending_handle_cannot_be_closed() {
        let registry = MapRegistry::new();
        let handle = registry.acquire("users", Some(owner(2, 0)));
        let err = registry.close(handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadHandle);

        registry.promote(owner(2, 0), None);
        registry.close(handle).unwrap();
        assert_eq!(registry.close(handle).unwrap_err().kind(), ErrorKind::BadHandle);
    }

    #[test]
    fn pending_handle_is_private_to_its_family() {
        let registry = MapRegistry::new();
        let handle = registry.acquire("users", Some(owner(2, 1)));
        assert!(registry.resolve(handle, Some(owner(2, 1))).is_ok());
        assert!(registry.resolve(handle, Some(owner(2, 2))).is_ok());
        assert!(registry.resolve(handle, Some(owner(2, 0))).is_err());
        assert!(registry.resolve(handle, None).is_err());
    }

    #[test]
    fn child_commit_moves_handle_to_parent() {
        let registry = MapRegistry::new();
        let handle = registry.acquire("users", Some(owner(2, 1)));
        registry.promote(owner(2, 1), Some(owner(2, 0)));
        assert!(registry.resolve(handle, Some(owner(2, 0))).is_ok());
    }

    #[test]
    fn abort_forgets_pending_handle() {
        let registry = MapRegistry::new();
        let handle = registry.acquire("users", Some(owner(2, 0)));
        registry.discard(owner(2, 0));
        assert_eq!(
            registry.resolve(handle, Some(owner(2, 0))).unwrap_err().kind(),
            ErrorKind::BadHandle
        );

        let again = registry.acquire("users", None);
        assert_eq!(again.slot(), handle.slot());
        assert_ne!(again.generation(), handle.generation());
    }

    #[test]
    fn reader_commits_a_durable_pending_handle() {
        let registry = MapRegistry::new();
        let handle = registry.acquire("users", Some(owner(2, 0)));
        assert_eq!(registry.acquire("users", None), handle);
        registry.discard(owner(2, 0));
        assert!(registry.resolve(handle, None).is_ok());
    }

    #[test]
    fn default_handle_is_permanent() {
        let registry = MapRegistry::new();
        registry.close(MapHandle::DEFAULT).unwrap();
        registry.release(MapHandle::DEFAULT);
        assert_eq!(registry.resolve(MapHandle::DEFAULT, None).unwrap(), None);
    }

    #[test]
    fn released_handle_goes_stale() {
        let registry = MapRegistry::new();
        let handle = registry.acquire("users", None);
        registry.release(handle);
        assert!(registry.resolve(handle, None).is_err());
    }
}
