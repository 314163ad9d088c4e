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

//! Behavior ledger: the append-only history that balances are projected from.

use crate::base::{BehaviorId, UserId};
use crate::error::Result;
use crate::event_log::EventLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Good or bad, derived from the sign of the score change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Good,
    Bad,
}

impl Classification {
    /// Positive deltas are good; zero and negative deltas are bad.
    pub fn from_delta(score_delta: i64) -> Self {
        if score_delta > 0 {
            Self::Good
        } else {
            Self::Bad
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => f.write_str("good"),
            Self::Bad => f.write_str("bad"),
        }
    }
}

/// A recorded behavior. Never edited after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BehaviorEvent {
    pub id: BehaviorId,
    pub child_id: UserId,
    pub recorder_id: UserId,
    pub classification: Classification,
    pub description: String,
    pub score_delta: i64,
    pub evidence: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Request to record a behavior for a child.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewBehavior {
    pub child_id: UserId,
    pub description: String,
    pub score_delta: i64,
    /// Reference to an already uploaded image, if any.
    #[serde(default)]
    pub evidence: Option<String>,
}

impl NewBehavior {
    pub fn new(child_id: UserId, description: impl Into<String>, score_delta: i64) -> Self {
        Self {
            child_id,
            description: description.into(),
            score_delta,
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

/// Read-only filter over behavior history.
///
/// `from` is inclusive and `until` exclusive. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BehaviorQuery {
    pub child_ids: Option<Vec<UserId>>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub classification: Option<Classification>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl BehaviorQuery {
    pub fn for_children(child_ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            child_ids: Some(child_ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }

    pub fn classified(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event: &BehaviorEvent) -> bool {
        if let Some(ids) = &self.child_ids {
            if !ids.contains(&event.child_id) {
                return false;
            }
        }
        if self.from.is_some_and(|from| event.recorded_at < from) {
            return false;
        }
        if self.until.is_some_and(|until| event.recorded_at >= until) {
            return false;
        }
        self.classification
            .is_none_or(|classification| event.classification == classification)
    }
}

#[derive(Debug, Default)]
pub struct BehaviorLedger {
    events: EventLog<BehaviorEvent>,
}

impl BehaviorLedger {
    pub fn new() -> Self {
        Self {
            events: EventLog::new(),
        }
    }

    pub(crate) fn append(
        &self,
        recorder_id: UserId,
        request: NewBehavior,
    ) -> Result<BehaviorEvent> {
        let description = request.description.trim().to_string();
        self.events.append(|id| BehaviorEvent {
            id: BehaviorId(id),
            child_id: request.child_id,
            recorder_id,
            classification: Classification::from_delta(request.score_delta),
            description,
            score_delta: request.score_delta,
            evidence: request.evidence,
            recorded_at: Utc::now(),
        })
    }

    pub fn get(&self, id: BehaviorId) -> Option<BehaviorEvent> {
        self.events.get(id.0)
    }

    /// Matching events, newest first, paginated.
    pub fn query(&self, query: &BehaviorQuery) -> Vec<BehaviorEvent> {
        let mut events = self.events.filter(|event| query.matches(event));
        events.reverse();
        events
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Number of matching events, ignoring pagination.
    pub fn count(&self, query: &BehaviorQuery) -> usize {
        self.events.filter(|event| query.matches(event)).len()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn purge_child(&self, child_id: UserId) -> usize {
        self.events.purge(|event| event.child_id == child_id)
    }
}
