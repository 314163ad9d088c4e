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

//! # Points Ledger
//!
//! This library keeps children's behavior points and lets them be spent on
//! rewards. Parents record behaviors, which move a child's balance, and
//! maintain a catalog of rewards that can be exchanged for points.
//!
//! ## Core Components
//!
//! - [`Engine`]: Entry point that checks roles and ownership and coordinates the stores
//! - [`BehaviorLedger`]: Append-only history of recorded behaviors
//! - [`RewardCatalog`]: Rewards owned by a parent, with price and stock
//! - [`ExchangeLedger`]: Completed redemptions with their frozen price
//! - [`PointsStore`]: Per-user `total` and `available` counters
//! - [`LedgerError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use points_ledger::{
//!     Actor, Engine, InvalidStateReason, LedgerError, NewBehavior, NewReward, UserId,
//! };
//!
//! let engine = Engine::new();
//! let mom = Actor::parent(UserId(1));
//! let ann = UserId(10);
//! engine.register_parent(mom.user_id, "Mom").unwrap();
//! engine.create_child(mom, ann, "Ann").unwrap();
//!
//! engine.record_behavior(mom, NewBehavior::new(ann, "Tidied room", 10)).unwrap();
//! engine.record_behavior(mom, NewBehavior::new(ann, "Tantrum", -15)).unwrap();
//!
//! // Available points never drop below zero; total keeps the full history.
//! let balance = engine.balance(mom, ann).unwrap();
//! assert_eq!((balance.total_points, balance.available_points), (-5, 0));
//!
//! let sticker = engine.create_reward(mom, NewReward::new("Sticker", 5, 3)).unwrap();
//! assert_eq!(
//!     engine.exchange(Actor::child(ann), sticker.id, None),
//!     Err(LedgerError::InvalidState(InvalidStateReason::InsufficientPoints))
//! );
//! ```
//!
//! ## Thread Safety
//!
//! Every balance and every reward sits behind its own lock, so operations on
//! different children or rewards run in parallel. Lock waits are bounded by
//! [`LedgerConfig::lock_timeout_ms`].

pub mod account;
mod base;
pub mod behavior;
pub mod catalog;
pub mod config;
mod engine;
pub mod error;
mod event_log;
pub mod exchange;
pub mod points;
pub mod stats;

pub use account::{Account, AccountDirectory, ProfilePatch};
pub use base::{Actor, BehaviorId, ExchangeId, RewardId, Role, UserId};
pub use behavior::{BehaviorEvent, BehaviorLedger, BehaviorQuery, Classification, NewBehavior};
pub use catalog::{DeletionOutcome, NewReward, RewardCatalog, RewardItem, RewardPatch};
pub use config::LedgerConfig;
pub use engine::{ChildSummary, Engine};
pub use error::{InvalidStateReason, LedgerError, NotFoundKind};
pub use exchange::{ExchangeLedger, ExchangeQuery, ExchangeRecord, ExchangeStatus};
pub use points::{PointsBalance, PointsStore};
pub use stats::{
    BehaviorSummary, ChildReport, DailyStat, Overview, StatisticsProjector, child_level,
};
