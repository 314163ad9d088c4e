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

//! Read-only reporting over behavior history and balances.
//!
//! Callers pass the child ids they are allowed to see; see
//! [`Engine::visible_children`](crate::Engine::visible_children).

use crate::account::AccountDirectory;
use crate::base::UserId;
use crate::behavior::{BehaviorEvent, BehaviorLedger, BehaviorQuery, Classification};
use crate::error::{LedgerError, Result};
use crate::points::PointsStore;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const MAX_TREND_DAYS: u32 = 366;

/// Lower bounds, in total points, of levels 2 through 5.
const LEVEL_THRESHOLDS: [i64; 4] = [50, 150, 300, 500];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub good_count: u64,
    pub bad_count: u64,
    pub points_delta: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BehaviorSummary {
    pub total_behaviors: u64,
    pub good_behaviors: u64,
    /// Share of good behaviors in whole percent, truncated.
    pub positive_rate: u32,
    pub points_delta: i64,
}

impl BehaviorSummary {
    fn from_events<'a>(events: impl IntoIterator<Item = &'a BehaviorEvent>) -> Self {
        let mut summary = Self::default();
        for event in events {
            summary.total_behaviors += 1;
            if event.classification == Classification::Good {
                summary.good_behaviors += 1;
            }
            summary.points_delta = summary.points_delta.saturating_add(event.score_delta);
        }
        if summary.total_behaviors > 0 {
            summary.positive_rate =
                (summary.good_behaviors * 100 / summary.total_behaviors) as u32;
        }
        summary
    }
}

/// Behavior totals across a set of children plus how many of them exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Overview {
    #[serde(flatten)]
    pub behaviors: BehaviorSummary,
    pub active_children: u64,
}

/// One row of the per-child ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildReport {
    pub child_id: UserId,
    pub nickname: String,
    pub total_points: i64,
    pub level: u8,
    #[serde(flatten)]
    pub behaviors: BehaviorSummary,
}

/// Maps total points to a level from 1 to 5.
pub fn child_level(total_points: i64) -> u8 {
    1 + LEVEL_THRESHOLDS
        .iter()
        .filter(|threshold| total_points >= **threshold)
        .count() as u8
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

pub struct StatisticsProjector<'a> {
    accounts: &'a AccountDirectory,
    points: &'a PointsStore,
    behaviors: &'a BehaviorLedger,
}

impl<'a> StatisticsProjector<'a> {
    pub(crate) fn new(
        accounts: &'a AccountDirectory,
        points: &'a PointsStore,
        behaviors: &'a BehaviorLedger,
    ) -> Self {
        Self {
            accounts,
            points,
            behaviors,
        }
    }

    /// Per-day counts for the `days` calendar days ending with `today`,
    /// oldest first. Days without behaviors are included as zeros.
    pub fn daily_trend(
        &self,
        child_ids: &[UserId],
        today: NaiveDate,
        days: u32,
    ) -> Result<Vec<DailyStat>> {
        if days == 0 || days > MAX_TREND_DAYS {
            return Err(LedgerError::validation(format!(
                "trend length must be between 1 and {MAX_TREND_DAYS} days"
            )));
        }
        let first = today
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .ok_or_else(|| LedgerError::validation("trend starts before the calendar"))?;
        let end = today
            .checked_add_days(Days::new(1))
            .ok_or_else(|| LedgerError::validation("trend ends after the calendar"))?;

        let mut buckets: BTreeMap<NaiveDate, DailyStat> = first
            .iter_days()
            .take(days as usize)
            .map(|date| {
                let empty = DailyStat {
                    date,
                    good_count: 0,
                    bad_count: 0,
                    points_delta: 0,
                };
                (date, empty)
            })
            .collect();

        let query = BehaviorQuery::for_children(child_ids.iter().copied())
            .between(start_of(first), start_of(end));
        for event in self.behaviors.query(&query) {
            let Some(bucket) = buckets.get_mut(&event.recorded_at.date_naive()) else {
                continue;
            };
            match event.classification {
                Classification::Good => bucket.good_count += 1,
                Classification::Bad => bucket.bad_count += 1,
            }
            bucket.points_delta = bucket.points_delta.saturating_add(event.score_delta);
        }

        Ok(buckets.into_values().collect())
    }

    /// Totals over every recorded behavior of the given children.
    pub fn summary(&self, child_ids: &[UserId]) -> BehaviorSummary {
        let events = self
            .behaviors
            .query(&BehaviorQuery::for_children(child_ids.iter().copied()));
        BehaviorSummary::from_events(&events)
    }

    /// [`summary`](Self::summary) plus the number of listed children that
    /// still have an account.
    pub fn overview(&self, child_ids: &[UserId]) -> Overview {
        let active_children = child_ids
            .iter()
            .filter(|&&child_id| self.accounts.get(child_id).is_some())
            .count() as u64;
        Overview {
            behaviors: self.summary(child_ids),
            active_children,
        }
    }

    /// Per-child ranking rows, counting behaviors recorded at or after `since`.
    /// Unknown children are skipped.
    pub fn child_reports(
        &self,
        child_ids: &[UserId],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChildReport>> {
        let mut reports = Vec::with_capacity(child_ids.len());
        for &child_id in child_ids {
            let Some(account) = self.accounts.get(child_id) else {
                continue;
            };
            let mut query = BehaviorQuery::for_children([child_id]);
            query.from = since;
            let events = self.behaviors.query(&query);
            let total_points = self
                .points
                .get(child_id)?
                .map_or(0, |balance| balance.total_points);

            reports.push(ChildReport {
                child_id,
                nickname: account.nickname,
                total_points,
                level: child_level(total_points),
                behaviors: BehaviorSummary::from_events(&events),
            });
        }
        Ok(reports)
    }
}
