// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Append-only event storage shared by the behavior and exchange ledgers.

use crate::LedgerError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug)]
struct LogInner<T> {
    /// Next identifier to hand out. Ids are allocated under the write lock,
    /// so id order is append order.
    next_id: u64,
    entries: BTreeMap<u64, T>,
}

/// Ordered, append-only log keyed by engine-assigned ids.
///
/// Entries are never edited in place. They only disappear when their owning
/// account is deleted.
#[derive(Debug)]
pub(crate) struct EventLog<T> {
    inner: RwLock<LogInner<T>>,
}

impl<T: Clone> EventLog<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(LogInner {
                next_id: 1,
                entries: BTreeMap::new(),
            }),
        }
    }

    /// Allocates an id, builds the entry with it and appends it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StorageFailure`] when the id space is exhausted.
    pub(crate) fn append(&self, build: impl FnOnce(u64) -> T) -> Result<T, LedgerError> {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        let next = id
            .checked_add(1)
            .ok_or_else(|| LedgerError::StorageFailure("event id space exhausted".into()))?;

        let entry = build(id);
        inner.entries.insert(id, entry.clone());
        inner.next_id = next;
        Ok(entry)
    }

    pub(crate) fn get(&self, id: u64) -> Option<T> {
        self.inner.read().entries.get(&id).cloned()
    }

    /// Entries matching `pred`, in append order.
    pub(crate) fn filter(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        self.inner
            .read()
            .entries
            .values()
            .filter(|entry| pred(entry))
            .cloned()
            .collect()
    }

    pub(crate) fn any(&self, mut pred: impl FnMut(&T) -> bool) -> bool {
        self.inner.read().entries.values().any(|entry| pred(entry))
    }

    /// Drops every entry matching `pred` and returns how many were removed.
    pub(crate) fn purge(&self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !pred(entry));
        before - inner.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&self, next_id: u64) {
        self.inner.write().next_id = next_id;
    }
}

impl<T: Clone> Default for EventLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_append_order() {
        let log = EventLog::new();
        let a = log.append(|id| (id, "a")).unwrap();
        let b = log.append(|id| (id, "b")).unwrap();
        assert_eq!(a.0, 1);
        assert_eq!(b.0, 2);
        assert_eq!(log.filter(|_| true), vec![(1, "a"), (2, "b")]);
    }

    #[test]
    fn exhausted_id_space_fails_without_appending() {
        let log = EventLog::new();
        log.set_next_id(u64::MAX);
        let result = log.append(|id| id);
        assert!(matches!(result, Err(LedgerError::StorageFailure(_))));
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn purge_drops_matching_entries() {
        let log = EventLog::new();
        for _ in 0..5 {
            log.append(|id| id).unwrap();
        }
        assert_eq!(log.purge(|id| id % 2 == 0), 2);
        assert_eq!(log.get(2), None);
        assert_eq!(log.get(1), Some(1));
        assert_eq!(log.filter(|_| true), vec![1, 3, 5]);
        assert!(log.any(|id| *id == 5));
    }
}
