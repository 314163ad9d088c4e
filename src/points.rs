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

//! Account points store.
//!
//! Every balance change goes through [`PointsData::apply`], which owns the
//! zero floor on available points.
//!
//! # Example
//!
//! ```
//! use points_ledger::{PointsStore, UserId};
//! use std::time::Duration;
//!
//! let store = PointsStore::new(Duration::from_secs(1));
//! store.get_or_create(UserId(7)).unwrap();
//! let balance = store.apply_delta(UserId(7), -5, -5, true).unwrap();
//! assert_eq!(balance.total_points, -5);
//! assert_eq!(balance.available_points, 0);
//! ```

use crate::base::UserId;
use crate::error::{InvalidStateReason, LedgerError, NotFoundKind, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time copy of a user's two counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointsBalance {
    pub user_id: UserId,
    pub total_points: i64,
    pub available_points: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct PointsData {
    user_id: UserId,
    total: i64,
    available: i64,
    updated_at: DateTime<Utc>,
}

impl PointsData {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            total: 0,
            available: 0,
            updated_at: Utc::now(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.available >= 0,
            "Invariant violated: available points went negative: {}",
            self.available
        );
    }

    pub(crate) fn available(&self) -> i64 {
        self.available
    }

    /// Adds the deltas to both counters.
    ///
    /// With `clamp_available_at_zero` a negative available result is floored at
    /// zero and the shortfall is forgotten. Without it, a negative result is
    /// refused with `insufficient_points` and nothing changes.
    pub(crate) fn apply(
        &mut self,
        total_delta: i64,
        available_delta: i64,
        clamp_available_at_zero: bool,
    ) -> Result<()> {
        let total = self
            .total
            .checked_add(total_delta)
            .ok_or_else(|| LedgerError::validation("total points overflow"))?;
        let mut available = self
            .available
            .checked_add(available_delta)
            .ok_or_else(|| LedgerError::validation("available points overflow"))?;

        if available < 0 {
            if !clamp_available_at_zero {
                return Err(LedgerError::InvalidState(
                    InvalidStateReason::InsufficientPoints,
                ));
            }
            available = 0;
        }

        self.total = total;
        self.available = available;
        self.updated_at = Utc::now();
        self.assert_invariants();
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> PointsBalance {
        PointsBalance {
            user_id: self.user_id,
            total_points: self.total,
            available_points: self.available,
            updated_at: self.updated_at,
        }
    }
}

pub(crate) type PointsRow = Arc<Mutex<PointsData>>;

/// Balance rows indexed by user, each behind its own lock.
#[derive(Debug)]
pub struct PointsStore {
    rows: DashMap<UserId, PointsRow>,
    lock_timeout: Duration,
}

impl PointsStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            rows: DashMap::new(),
            lock_timeout,
        }
    }

    /// Returns the user's balance, creating a zeroed one on first use.
    pub fn get_or_create(&self, user_id: UserId) -> Result<PointsBalance> {
        let row = self.row_or_create(user_id);
        let data = self.lock(&row)?;
        Ok(data.snapshot())
    }

    pub fn get(&self, user_id: UserId) -> Result<Option<PointsBalance>> {
        let Some(row) = self.row(user_id) else {
            return Ok(None);
        };
        let data = self.lock(&row)?;
        Ok(Some(data.snapshot()))
    }

    /// Applies a delta to an existing balance row.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - The user has no balance row.
    /// - [`LedgerError::InvalidState`] - Unclamped change would go below zero.
    /// - [`LedgerError::StorageFailure`] - Row lock not acquired in time.
    pub fn apply_delta(
        &self,
        user_id: UserId,
        total_delta: i64,
        available_delta: i64,
        clamp_available_at_zero: bool,
    ) -> Result<PointsBalance> {
        let row = self
            .row(user_id)
            .ok_or(LedgerError::NotFound(NotFoundKind::PointsRecord))?;
        let mut data = self.lock(&row)?;
        data.apply(total_delta, available_delta, clamp_available_at_zero)?;
        Ok(data.snapshot())
    }

    /// Snapshots of every balance, ordered by user id.
    pub fn snapshots(&self) -> Result<Vec<PointsBalance>> {
        let rows: Vec<PointsRow> = self.rows.iter().map(|row| Arc::clone(row.value())).collect();
        let mut balances = rows
            .iter()
            .map(|row| self.lock(row).map(|data| data.snapshot()))
            .collect::<Result<Vec<_>>>()?;
        balances.sort_by_key(|balance| balance.user_id);
        Ok(balances)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    // The map shard lock is released before the row lock is taken.
    pub(crate) fn row(&self, user_id: UserId) -> Option<PointsRow> {
        self.rows.get(&user_id).map(|row| Arc::clone(row.value()))
    }

    pub(crate) fn row_or_create(&self, user_id: UserId) -> PointsRow {
        let entry = self
            .rows
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(PointsData::new(user_id))));
        Arc::clone(entry.value())
    }

    pub(crate) fn lock<'a>(&self, row: &'a PointsRow) -> Result<MutexGuard<'a, PointsData>> {
        row.try_lock_for(self.lock_timeout).ok_or_else(|| {
            LedgerError::StorageFailure("timed out waiting for points row lock".into())
        })
    }

    pub(crate) fn remove(&self, user_id: UserId) -> bool {
        self.rows.remove(&user_id).is_some()
    }
}
