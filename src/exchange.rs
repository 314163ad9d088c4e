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

//! Exchange records and their ledger.

use crate::base::{ExchangeId, RewardId, UserId};
use crate::error::Result;
use crate::event_log::EventLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exchange lifecycle state.
///
/// Redemptions complete in one step, so `Completed` is the only state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    Completed,
}

/// A redemption. `points_used` is the price frozen at exchange time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeRecord {
    pub id: ExchangeId,
    /// Beneficiary whose balance was debited.
    pub user_id: UserId,
    pub reward_id: RewardId,
    pub points_used: i64,
    pub exchanged_at: DateTime<Utc>,
    pub status: ExchangeStatus,
}

/// Read-only filter over exchange history. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeQuery {
    pub user_ids: Option<Vec<UserId>>,
    pub reward_id: Option<RewardId>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ExchangeQuery {
    pub fn for_users(user_ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            user_ids: Some(user_ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn for_reward(reward_id: RewardId) -> Self {
        Self {
            reward_id: Some(reward_id),
            ..Self::default()
        }
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &ExchangeRecord) -> bool {
        let user_ok = self
            .user_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&record.user_id));
        user_ok && self.reward_id.is_none_or(|id| record.reward_id == id)
    }
}

#[derive(Debug, Default)]
pub struct ExchangeLedger {
    records: EventLog<ExchangeRecord>,
}

impl ExchangeLedger {
    pub fn new() -> Self {
        Self {
            records: EventLog::new(),
        }
    }

    pub(crate) fn append(
        &self,
        user_id: UserId,
        reward_id: RewardId,
        points_used: i64,
    ) -> Result<ExchangeRecord> {
        self.records.append(|id| ExchangeRecord {
            id: ExchangeId(id),
            user_id,
            reward_id,
            points_used,
            exchanged_at: Utc::now(),
            status: ExchangeStatus::Completed,
        })
    }

    pub fn get(&self, id: ExchangeId) -> Option<ExchangeRecord> {
        self.records.get(id.0)
    }

    pub fn references_reward(&self, reward_id: RewardId) -> bool {
        self.records.any(|record| record.reward_id == reward_id)
    }

    pub fn query(&self, query: &ExchangeQuery) -> Vec<ExchangeRecord> {
        let mut records = self.records.filter(|record| query.matches(record));
        records.reverse();
        records
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn purge_user(&self, user_id: UserId) -> usize {
        self.records.purge(|record| record.user_id == user_id)
    }

    #[cfg(test)]
    pub(crate) fn exhaust_ids(&self) {
        self.records.set_next_id(u64::MAX);
    }
}
