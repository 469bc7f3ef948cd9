//! Cursors: positioned iteration over one map within a transaction.
//!
//! A cursor remembers the entry it sits on rather than an index, so it stays
//! meaningful while its own transaction modifies the map. After the entry
//! under it is deleted, `Next` and `Prev` move to its former neighbours.

use crate::error::{CoreError, CoreResult};
use crate::store::MapTree;
use crate::transaction::Transaction;
use crate::types::{KeyValue, MapHandle};
use std::cmp::Ordering;
use std::fmt;

/// Positioning operation for [`Cursor::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp<'a> {
    /// First entry of the map.
    First,
    /// First value of the current key.
    FirstDup,
    /// Exact key and value.
    GetBoth(&'a [u8], &'a [u8]),
    /// Exact key and the first value not less than the given one.
    GetBothRange(&'a [u8], &'a [u8]),
    /// Entry under the cursor.
    GetCurrent,
    /// Last entry of the map.
    Last,
    /// Last value of the current key.
    LastDup,
    /// Following entry.
    Next,
    /// Following value of the current key.
    NextDup,
    /// First entry of the following key.
    NextNoDup,
    /// Preceding entry.
    Prev,
    /// Preceding value of the current key.
    PrevDup,
    /// Last entry of the preceding key.
    PrevNoDup,
    /// Exact key.
    Set(&'a [u8]),
    /// First key not less than the given one.
    SetRange(&'a [u8]),
    /// First key greater than the given one.
    SetUpperbound(&'a [u8]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Unpositioned,
    At {
        key: Vec<u8>,
        value: Vec<u8>,
        deleted: bool,
    },
    Eof,
}

/// Where a remembered entry sits in the current tree.
struct Located {
    exact: Option<usize>,
    successor: usize,
}

/// A cursor over one map of a transaction.
///
/// A cursor can be created unbound and later bound to a transaction, and
/// rebound to another one after that transaction finishes.
///
/// # Example
///
/// ```rust
/// use vellum_core::{CursorOp, EnvConfig, Environment, MapHandle};
///
/// let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
/// let txn = env.begin_write().unwrap();
/// txn.put(MapHandle::DEFAULT, b"b", b"2", true).unwrap();
/// txn.put(MapHandle::DEFAULT, b"a", b"1", true).unwrap();
///
/// let mut cursor = txn.cursor(MapHandle::DEFAULT).unwrap();
/// let first = cursor.seek(CursorOp::First).unwrap();
/// assert_eq!(first, Some((b"a".to_vec(), b"1".to_vec())));
/// ```
pub struct Cursor<'txn> {
    txn: Option<&'txn Transaction>,
    map: MapHandle,
    position: Position,
    epoch: u64,
}

impl<'txn> Cursor<'txn> {
    /// Creates a cursor that is not bound to any transaction.
    #[must_use]
    pub const fn unbound() -> Self {
        Self {
            txn: None,
            map: MapHandle::DEFAULT,
            position: Position::Unpositioned,
            epoch: 0,
        }
    }

    pub(crate) const fn new(txn: &'txn Transaction, map: MapHandle, epoch: u64) -> Self {
        Self {
            txn: Some(txn),
            map,
            position: Position::Unpositioned,
            epoch,
        }
    }

    /// Binds the cursor to a map of `txn`, dropping any previous position.
    pub fn bind(&mut self, txn: &'txn Transaction, map: MapHandle) -> CoreResult<()> {
        self.epoch = txn.cursor_epoch(map)?;
        self.txn = Some(txn);
        self.map = map;
        self.position = Position::Unpositioned;
        Ok(())
    }

    /// Detaches the cursor from its transaction.
    pub fn unbind(&mut self) {
        self.txn = None;
        self.position = Position::Unpositioned;
    }

    /// Returns the map the cursor is bound to.
    #[must_use]
    pub fn map(&self) -> Option<MapHandle> {
        self.txn.map(|_| self.map)
    }

    /// Returns true once the cursor has moved past either end of the map.
    #[must_use]
    pub fn eof(&self) -> bool {
        self.position == Position::Eof
    }

    fn bound(&self) -> CoreResult<&'txn Transaction> {
        self.txn
            .ok_or_else(|| CoreError::usage("cursor is not bound to a transaction"))
    }

    /// Runs `f` on the cursor's tree, first invalidating a position taken
    /// from a previous snapshot of a renewed transaction.
    fn visit<R>(&mut self, f: impl FnOnce(&mut Self, &MapTree) -> R) -> CoreResult<R> {
        let txn = self.bound()?;
        txn.with_tree(self.map, |tree, epoch| {
            if epoch != self.epoch {
                self.epoch = epoch;
                self.position = Position::Unpositioned;
            }
            f(self, tree)
        })
    }

    /// Moves the cursor and returns the entry it lands on.
    ///
    /// `Ok(None)` means the requested entry does not exist. A failed `Set`
    /// or `GetBoth` leaves the cursor unpositioned; a failed `NextDup` or
    /// `PrevDup` leaves it where it was. Moving relative to an unpositioned
    /// cursor treats `Next` as `First` and `Prev` as `Last`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a relative move from past the end, or for
    /// `GetCurrent` and the duplicate moves without a current entry.
    pub fn seek(&mut self, op: CursorOp<'_>) -> CoreResult<Option<KeyValue>> {
        self.visit(|cursor, tree| cursor.step(tree, op))?
    }

    fn step(&mut self, tree: &MapTree, op: CursorOp<'_>) -> CoreResult<Option<KeyValue>> {
        let layout = tree.layout();
        match op {
            CursorOp::First => Ok(self.land(tree, Some(0))),
            CursorOp::Last => Ok(self.land(tree, tree.len().checked_sub(1))),
            CursorOp::Set(key) => {
                layout.key_order.validate(key, "key")?;
                let range = tree.key_range(key);
                Ok(self.land_or_unposition(tree, (!range.is_empty()).then_some(range.start)))
            }
            CursorOp::SetRange(key) => {
                layout.key_order.validate(key, "key")?;
                Ok(self.land(tree, Some(tree.lower_bound(key))))
            }
            CursorOp::SetUpperbound(key) => {
                layout.key_order.validate(key, "key")?;
                Ok(self.land(tree, Some(tree.upper_bound(key))))
            }
            CursorOp::GetBoth(key, value) => {
                layout.key_order.validate(key, "key")?;
                let found = if layout.dup_sort {
                    tree.find_entry(key, value)
                } else {
                    let start = tree.lower_bound(key);
                    tree.entry(start)
                        .filter(|(k, v)| tree.same_key(k, key) && *v == value)
                        .map(|_| start)
                };
                Ok(self.land_or_unposition(tree, found))
            }
            CursorOp::GetBothRange(key, value) => {
                layout.key_order.validate(key, "key")?;
                let range = tree.key_range(key);
                let index = tree.lower_bound_entry(key, value);
                let found = tree.entry(index).filter(|(_, v)| {
                    range.contains(&index)
                        && layout.value_order.compare(v, value) != Ordering::Less
                });
                let index = found.map(|_| index);
                Ok(self.land_or_unposition(tree, index))
            }
            CursorOp::GetCurrent => {
                let index = self.current(tree)?;
                Ok(self.land(tree, Some(index)))
            }
            CursorOp::Next => match self.locate(tree)? {
                None => Ok(self.land(tree, Some(0))),
                Some(at) => Ok(self.land(tree, Some(at.exact.map_or(at.successor, |i| i + 1)))),
            },
            CursorOp::Prev => match self.locate(tree)? {
                None => Ok(self.land(tree, tree.len().checked_sub(1))),
                Some(at) => Ok(self.land(tree, at.successor.checked_sub(1))),
            },
            CursorOp::NextNoDup => match self.locate(tree)? {
                None => Ok(self.land(tree, Some(0))),
                Some(_) => {
                    let index = tree.upper_bound(self.key()?);
                    Ok(self.land(tree, Some(index)))
                }
            },
            CursorOp::PrevNoDup => match self.locate(tree)? {
                None => Ok(self.land(tree, tree.len().checked_sub(1))),
                Some(_) => {
                    let index = tree.lower_bound(self.key()?).checked_sub(1);
                    Ok(self.land(tree, index))
                }
            },
            CursorOp::NextDup => {
                let at = self.locate(tree)?.ok_or(CoreError::NotFound)?;
                let index = at.exact.map_or(at.successor, |i| i + 1);
                Ok(self.land_within_key(tree, Some(index)))
            }
            CursorOp::PrevDup => {
                let at = self.locate(tree)?.ok_or(CoreError::NotFound)?;
                Ok(self.land_within_key(tree, at.successor.checked_sub(1)))
            }
            CursorOp::FirstDup | CursorOp::LastDup => {
                self.locate(tree)?.ok_or(CoreError::NotFound)?;
                let range = tree.key_range(self.key()?);
                if range.is_empty() {
                    return Err(CoreError::NotFound);
                }
                let index = if op == CursorOp::FirstDup {
                    range.start
                } else {
                    range.end - 1
                };
                Ok(self.land(tree, Some(index)))
            }
        }
    }

    fn key(&self) -> CoreResult<&[u8]> {
        match &self.position {
            Position::At { key, .. } => Ok(key),
            _ => Err(CoreError::NotFound),
        }
    }

    /// Places the cursor at `index`, or past the end when there is no such
    /// entry.
    fn land(&mut self, tree: &MapTree, index: Option<usize>) -> Option<KeyValue> {
        match index.and_then(|i| tree.entry(i)) {
            Some((key, value)) => {
                self.position = Position::At {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    deleted: false,
                };
                Some((key.to_vec(), value.to_vec()))
            }
            None => {
                self.position = Position::Eof;
                None
            }
        }
    }

    fn land_or_unposition(&mut self, tree: &MapTree, index: Option<usize>) -> Option<KeyValue> {
        if index.is_none() {
            self.position = Position::Unpositioned;
            return None;
        }
        self.land(tree, index)
    }

    /// Moves to `index` only if it holds another value of the current key.
    fn land_within_key(&mut self, tree: &MapTree, index: Option<usize>) -> Option<KeyValue> {
        let Position::At { key, .. } = &self.position else {
            return None;
        };
        let same = index
            .and_then(|i| tree.entry(i))
            .is_some_and(|(k, _)| tree.same_key(k, key));
        if same {
            self.land(tree, index)
        } else {
            None
        }
    }

    /// Finds the remembered entry in `tree`.
    ///
    /// `Ok(None)` for an unpositioned cursor; `NotFound` past the end.
    fn locate(&self, tree: &MapTree) -> CoreResult<Option<Located>> {
        let (key, value, deleted) = match &self.position {
            Position::Unpositioned => return Ok(None),
            Position::Eof => return Err(CoreError::NotFound),
            Position::At {
                key,
                value,
                deleted,
            } => (key, value, *deleted),
        };
        let successor = tree.lower_bound_entry(key, value);
        let exact = if deleted {
            None
        } else if tree.layout().dup_sort {
            tree.find_entry(key, value)
        } else {
            tree.entry(successor)
                .filter(|(k, _)| tree.same_key(k, key))
                .map(|_| successor)
        };
        Ok(Some(Located { exact, successor }))
    }

    fn current(&self, tree: &MapTree) -> CoreResult<usize> {
        self.locate(tree)?
            .and_then(|at| at.exact)
            .ok_or(CoreError::NotFound)
    }

    /// Returns the entry under the cursor.
    fn current_entry(&mut self) -> CoreResult<KeyValue> {
        self.visit(|cursor, tree| {
            let index = cursor.current(tree)?;
            tree.entry(index)
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .ok_or(CoreError::NotFound)
        })?
    }

    /// Returns true if the cursor sits on the first entry of the map.
    pub fn on_first(&mut self) -> CoreResult<bool> {
        self.visit(|cursor, tree| Ok(cursor.current(tree).ok() == Some(0)))?
    }

    /// Returns true if the cursor sits on the last entry of the map.
    pub fn on_last(&mut self) -> CoreResult<bool> {
        self.visit(|cursor, tree| {
            let last = tree.len().checked_sub(1);
            Ok(last.is_some() && cursor.current(tree).ok() == last)
        })?
    }

    /// Returns how many values the current key holds.
    pub fn count(&mut self) -> CoreResult<usize> {
        self.visit(|cursor, tree| {
            cursor.current(tree)?;
            Ok(tree.key_range(cursor.key()?).len())
        })?
    }

    /// Stores an entry through the transaction and moves onto it.
    pub fn put(&mut self, key: &[u8], value: &[u8], overwrite: bool) -> CoreResult<()> {
        let txn = self.bound()?;
        txn.put(self.map, key, value, overwrite)?;
        self.position = Position::At {
            key: key.to_vec(),
            value: value.to_vec(),
            deleted: false,
        };
        Ok(())
    }

    /// Replaces the value of the entry under the cursor.
    ///
    /// In a duplicate map the old value is removed and the new one inserted
    /// in its sorted place, where the cursor follows it.
    pub fn put_current(&mut self, value: &[u8]) -> CoreResult<()> {
        let (key, old) = self.current_entry()?;
        let txn = self.bound()?;
        let dup_sort = txn.map_flags(self.map)?.dup_sort;
        txn.put(self.map, &key, value, true)?;
        if dup_sort && old != value {
            txn.delete(self.map, &key, Some(&old))?;
        }
        self.position = Position::At {
            key,
            value: value.to_vec(),
            deleted: false,
        };
        Ok(())
    }

    /// Deletes the entry under the cursor, or with `whole_key` every value
    /// of its key.
    ///
    /// The cursor keeps its place, so `Next` continues with the following
    /// entry.
    pub fn delete(&mut self, whole_key: bool) -> CoreResult<()> {
        let (key, value) = self.current_entry()?;
        let txn = self.bound()?;
        let only = (!whole_key).then_some(value.as_slice());
        txn.delete(self.map, &key, only)?;
        let value = if whole_key {
            Vec::new()
        } else {
            value
        };
        self.position = Position::At {
            key,
            value,
            deleted: true,
        };
        Ok(())
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("map", &self.map)
            .field("bound", &self.txn.is_some())
            .field("position", &self.position)
            .finish()
    }
}
