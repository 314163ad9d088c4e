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

//! Reward catalog.
//!
//! Items are owned by one parent. Stock is edited by the owner and decremented
//! by exchanges, both under the item's row lock.

use crate::base::{RewardId, UserId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardItem {
    pub id: RewardId,
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    /// Price in points, always positive.
    pub price: i64,
    pub stock: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewReward {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    pub price: i64,
    pub stock: u32,
}

impl NewReward {
    pub fn new(name: impl Into<String>, price: i64, stock: u32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            image: None,
            price,
            stock,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Partial update of a reward.
///
/// `None` leaves a field as it is; `Some` sets it, including to an empty
/// description or a cleared image (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<Option<String>>,
    pub price: Option<i64>,
    pub stock: Option<u32>,
    pub active: Option<bool>,
}

impl RewardPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// What `deactivate_or_delete` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionOutcome {
    /// No exchange referenced the item; it is gone.
    Deleted,
    /// Exchanges reference the item; it was hidden from new redemptions.
    Deactivated,
}

pub(crate) fn validate_name(name: &str, max_len: usize) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::validation("reward name must not be empty"));
    }
    if name.chars().count() > max_len {
        return Err(LedgerError::validation(format!(
            "reward name longer than {max_len} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_price(price: i64) -> Result<()> {
    if price <= 0 {
        return Err(LedgerError::validation("reward price must be positive"));
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct RewardRow {
    pub(crate) item: RewardItem,
    /// Set on hard delete so holders of a stale row handle see it as missing.
    pub(crate) removed: bool,
}

impl RewardRow {
    /// Validates the whole patch before touching anything.
    pub(crate) fn apply_patch(&mut self, patch: RewardPatch, max_name_len: usize) -> Result<()> {
        if let Some(name) = &patch.name {
            validate_name(name, max_name_len)?;
        }
        if let Some(price) = patch.price {
            validate_price(price)?;
        }

        let item = &mut self.item;
        if let Some(name) = patch.name {
            item.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            item.description = description;
        }
        if let Some(image) = patch.image {
            item.image = image;
        }
        if let Some(price) = patch.price {
            item.price = price;
        }
        if let Some(stock) = patch.stock {
            item.stock = stock;
        }
        if let Some(active) = patch.active {
            item.active = active;
        }
        item.updated_at = Utc::now();
        Ok(())
    }
}

pub(crate) type RewardHandle = Arc<Mutex<RewardRow>>;

#[derive(Debug)]
pub struct RewardCatalog {
    rows: DashMap<RewardId, RewardHandle>,
    next_id: AtomicU64,
    lock_timeout: Duration,
}

impl RewardCatalog {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicU64::new(1),
            lock_timeout,
        }
    }

    /// Inserts an already validated reward.
    pub(crate) fn insert(&self, owner_id: UserId, reward: NewReward) -> RewardItem {
        let id = RewardId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = Utc::now();
        let item = RewardItem {
            id,
            owner_id,
            name: reward.name.trim().to_string(),
            description: reward.description,
            image: reward.image,
            price: reward.price,
            stock: reward.stock,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.rows.insert(
            id,
            Arc::new(Mutex::new(RewardRow {
                item: item.clone(),
                removed: false,
            })),
        );
        item
    }

    pub fn get(&self, id: RewardId) -> Result<Option<RewardItem>> {
        let Some(row) = self.row(id) else {
            return Ok(None);
        };
        let data = self.lock(&row)?;
        Ok((!data.removed).then(|| data.item.clone()))
    }

    /// Rewards owned by `owner_id`, ordered by id.
    pub fn list_by_owner(&self, owner_id: UserId, active_only: bool) -> Result<Vec<RewardItem>> {
        let rows: Vec<RewardHandle> = self.rows.iter().map(|row| Arc::clone(row.value())).collect();
        let mut items = Vec::new();
        for row in &rows {
            let data = self.lock(row)?;
            let item = &data.item;
            if data.removed || item.owner_id != owner_id || (active_only && !item.active) {
                continue;
            }
            items.push(item.clone());
        }
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn row(&self, id: RewardId) -> Option<RewardHandle> {
        self.rows.get(&id).map(|row| Arc::clone(row.value()))
    }

    pub(crate) fn lock<'a>(&self, row: &'a RewardHandle) -> Result<MutexGuard<'a, RewardRow>> {
        row.try_lock_for(self.lock_timeout).ok_or_else(|| {
            LedgerError::StorageFailure("timed out waiting for reward row lock".into())
        })
    }

    /// Unlinks a reward. The caller holds its row lock and marks it removed.
    pub(crate) fn unlink(&self, id: RewardId) {
        self.rows.remove(&id);
    }
}
