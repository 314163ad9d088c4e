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

use crate::account::{Account, AccountDirectory, ProfilePatch};
use crate::base::{Actor, RewardId, Role, UserId};
use crate::behavior::{BehaviorEvent, BehaviorLedger, BehaviorQuery, NewBehavior};
use crate::catalog::{
    DeletionOutcome, NewReward, RewardCatalog, RewardItem, RewardPatch, validate_name,
    validate_price,
};
use crate::config::LedgerConfig;
use crate::error::{InvalidStateReason, LedgerError, NotFoundKind, Result};
use crate::exchange::{ExchangeLedger, ExchangeQuery, ExchangeRecord};
use crate::points::{PointsBalance, PointsStore};
use crate::stats::StatisticsProjector;
use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// A child together with its current counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildSummary {
    #[serde(flatten)]
    pub account: Account,
    pub total_points: i64,
    pub available_points: i64,
}

/// Points ledger and reward exchange engine.
///
/// Balance rows and reward rows each have their own lock. An exchange holds
/// the reward row lock and then the balance row lock for its whole
/// check-then-write sequence; nothing else takes both, so lock order is fixed.
pub struct Engine {
    config: LedgerConfig,
    accounts: AccountDirectory,
    points: PointsStore,
    behaviors: BehaviorLedger,
    catalog: RewardCatalog,
    exchanges: ExchangeLedger,
    /// Shared by operations that touch a child's rows, exclusive for deleting
    /// a child, so a cascade never races a half-finished write.
    lifecycle: RwLock<()>,
}

impl Engine {
    /// Creates an empty engine with default configuration.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        let lock_timeout = config.lock_timeout();
        Engine {
            accounts: AccountDirectory::new(),
            points: PointsStore::new(lock_timeout),
            behaviors: BehaviorLedger::new(),
            catalog: RewardCatalog::new(lock_timeout),
            exchanges: ExchangeLedger::new(),
            lifecycle: RwLock::new(()),
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn shared(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.lifecycle
            .try_read_for(self.config.lock_timeout())
            .ok_or_else(|| LedgerError::StorageFailure("timed out waiting for engine".into()))
    }

    fn require_parent_role(actor: Actor) -> Result<()> {
        match actor.role {
            Role::Parent => Ok(()),
            Role::Child => Err(LedgerError::permission("only parents may do this")),
        }
    }

    // === Accounts ===

    /// Registers a parent account under an id issued by the identity layer.
    #[instrument(skip(self))]
    pub fn register_parent(&self, user_id: UserId, nickname: &str) -> Result<Account> {
        let account = self.accounts.register_parent(user_id, nickname)?;
        info!(user_id = %user_id, "parent registered");
        Ok(account)
    }

    /// Creates a child linked to `parent`, with a zeroed balance.
    #[instrument(skip(self), fields(parent = %parent.user_id))]
    pub fn create_child(
        &self,
        parent: Actor,
        child_id: UserId,
        nickname: &str,
    ) -> Result<Account> {
        Self::require_parent_role(parent)?;
        let _shared = self.shared()?;
        let child = self.accounts.create_child(parent.user_id, child_id, nickname)?;
        self.points.get_or_create(child_id)?;
        info!(child_id = %child_id, "child created");
        Ok(child)
    }

    pub fn update_child(
        &self,
        parent: Actor,
        child_id: UserId,
        patch: ProfilePatch,
    ) -> Result<Account> {
        Self::require_parent_role(parent)?;
        self.accounts.update_child(parent.user_id, child_id, patch)
    }

    /// Updates the actor's own profile. Parents and children may both do this.
    #[instrument(skip(self, patch), fields(user_id = %actor.user_id))]
    pub fn update_profile(&self, actor: Actor, patch: ProfilePatch) -> Result<Account> {
        let account = self.accounts.update_profile(actor.user_id, patch)?;
        debug!("profile updated");
        Ok(account)
    }

    /// Deletes a child and everything recorded for it: balance, behavior
    /// events and exchange records.
    #[instrument(skip(self), fields(parent = %parent.user_id))]
    pub fn delete_child(&self, parent: Actor, child_id: UserId) -> Result<()> {
        Self::require_parent_role(parent)?;
        let _exclusive = self
            .lifecycle
            .try_write_for(self.config.lock_timeout())
            .ok_or_else(|| LedgerError::StorageFailure("timed out waiting for engine".into()))?;

        self.accounts.require_child_of(parent.user_id, child_id)?;
        self.accounts.remove(child_id);
        self.points.remove(child_id);
        let behaviors = self.behaviors.purge_child(child_id);
        let exchanges = self.exchanges.purge_user(child_id);

        info!(child_id = %child_id, behaviors, exchanges, "child deleted");
        Ok(())
    }

    pub fn account(&self, user_id: UserId) -> Option<Account> {
        self.accounts.get(user_id)
    }

    /// The parent's children with their balances, ordered by id.
    pub fn children_of(&self, parent: Actor) -> Result<Vec<ChildSummary>> {
        Self::require_parent_role(parent)?;
        self.accounts
            .children_of(parent.user_id)
            .into_iter()
            .map(|account| {
                let balance = self.points.get(account.id)?;
                Ok(ChildSummary {
                    total_points: balance.as_ref().map_or(0, |b| b.total_points),
                    available_points: balance.as_ref().map_or(0, |b| b.available_points),
                    account,
                })
            })
            .collect()
    }

    /// Children whose data `viewer` may read.
    ///
    /// A parent sees one named child or all of them; a child sees only itself.
    pub fn visible_children(&self, viewer: Actor, child: Option<UserId>) -> Result<Vec<UserId>> {
        match viewer.role {
            Role::Parent => match child {
                Some(child_id) => {
                    self.accounts.require_child_of(viewer.user_id, child_id)?;
                    Ok(vec![child_id])
                }
                None => Ok(self
                    .accounts
                    .children_of(viewer.user_id)
                    .into_iter()
                    .map(|account| account.id)
                    .collect()),
            },
            Role::Child => match child {
                Some(child_id) if child_id != viewer.user_id => Err(LedgerError::permission(
                    "children may only view their own records",
                )),
                Some(_) | None => Ok(vec![viewer.user_id]),
            },
        }
    }

    // === Points ===

    /// Returns the user's balance, creating a zeroed one if it is missing.
    pub fn get_or_create_points(&self, user_id: UserId) -> Result<PointsBalance> {
        let _shared = self.shared()?;
        if self.accounts.get(user_id).is_none() {
            return Err(LedgerError::NotFound(NotFoundKind::Account));
        }
        self.points.get_or_create(user_id)
    }

    /// Balance of `user_id` as seen by `viewer`.
    pub fn balance(&self, viewer: Actor, user_id: UserId) -> Result<PointsBalance> {
        if viewer.user_id != user_id {
            match viewer.role {
                Role::Parent => {
                    self.accounts.require_child_of(viewer.user_id, user_id)?;
                }
                Role::Child => {
                    return Err(LedgerError::permission(
                        "children may only view their own points",
                    ));
                }
            }
        }
        self.points
            .get(user_id)?
            .ok_or(LedgerError::NotFound(NotFoundKind::PointsRecord))
    }

    /// Every balance, ordered by user id.
    pub fn balances(&self) -> Result<Vec<PointsBalance>> {
        self.points.snapshots()
    }

    // === Behavior Ledger ===

    fn validate_behavior(&self, request: &NewBehavior) -> Result<()> {
        let description = request.description.trim();
        if description.is_empty() {
            return Err(LedgerError::validation("behavior description must not be empty"));
        }
        if description.chars().count() > self.config.max_description_len {
            return Err(LedgerError::validation(format!(
                "behavior description longer than {} characters",
                self.config.max_description_len
            )));
        }
        let max = self.config.max_abs_score_delta;
        if request
            .score_delta
            .checked_abs()
            .is_none_or(|delta| delta > max)
        {
            return Err(LedgerError::validation(format!(
                "score change must be within ±{}",
                self.config.max_abs_score_delta
            )));
        }
        Ok(())
    }

    /// Records a behavior for one of the recorder's children and applies its
    /// score change to the child's balance.
    ///
    /// The new balance is computed before anything is written, and the event
    /// is appended while the balance row is locked, so an event is never
    /// visible without its effect on the balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PermissionDenied`] - Recorder is not the child's parent.
    /// - [`LedgerError::ValidationFailed`] - Bad description, delta out of range, or overflow.
    /// - [`LedgerError::StorageFailure`] - Balance row lock not acquired in time.
    #[instrument(
        skip(self, request),
        fields(recorder = %recorder.user_id, child = %request.child_id, delta = request.score_delta)
    )]
    pub fn record_behavior(&self, recorder: Actor, request: NewBehavior) -> Result<BehaviorEvent> {
        Self::require_parent_role(recorder)?;
        let _shared = self.shared()?;
        self.accounts
            .require_child_of(recorder.user_id, request.child_id)?;
        self.validate_behavior(&request)?;

        // First behavior for this child bootstraps a zeroed balance.
        let row = self.points.row_or_create(request.child_id);
        let mut balance = self.points.lock(&row)?;

        let mut staged = balance.clone();
        staged.apply(request.score_delta, request.score_delta, true)?;

        let event = self.behaviors.append(recorder.user_id, request)?;
        *balance = staged;

        info!(
            behavior_id = %event.id,
            classification = %event.classification,
            available = balance.available(),
            "behavior recorded"
        );
        Ok(event)
    }

    pub fn behaviors(&self, query: &BehaviorQuery) -> Vec<BehaviorEvent> {
        self.behaviors.query(query)
    }

    pub fn behavior_count(&self, query: &BehaviorQuery) -> usize {
        self.behaviors.count(query)
    }

    // === Reward Catalog ===

    /// Adds a reward to the owner's catalog. New rewards are active.
    #[instrument(skip(self, reward), fields(owner = %owner.user_id, name = %reward.name))]
    pub fn create_reward(&self, owner: Actor, reward: NewReward) -> Result<RewardItem> {
        Self::require_parent_role(owner)?;
        self.accounts.require_parent(owner.user_id)?;
        validate_name(&reward.name, self.config.max_reward_name_len)?;
        validate_price(reward.price)?;

        let item = self.catalog.insert(owner.user_id, reward);
        info!(reward_id = %item.id, price = item.price, stock = item.stock, "reward created");
        Ok(item)
    }

    /// Applies the supplied fields of `patch` to a reward the owner holds.
    #[instrument(skip(self, patch), fields(owner = %owner.user_id))]
    pub fn update_reward(
        &self,
        owner: Actor,
        reward_id: RewardId,
        patch: RewardPatch,
    ) -> Result<RewardItem> {
        Self::require_parent_role(owner)?;
        let row = self
            .catalog
            .row(reward_id)
            .ok_or(LedgerError::NotFound(NotFoundKind::Reward))?;
        let mut reward = self.catalog.lock(&row)?;
        if reward.removed {
            return Err(LedgerError::NotFound(NotFoundKind::Reward));
        }
        if reward.item.owner_id != owner.user_id {
            return Err(LedgerError::permission("reward belongs to another parent"));
        }

        reward.apply_patch(patch, self.config.max_reward_name_len)?;
        info!(reward_id = %reward_id, "reward updated");
        Ok(reward.item.clone())
    }

    /// Deletes a reward nobody has redeemed yet, or deactivates it otherwise
    /// so that historical exchange records stay valid.
    #[instrument(skip(self), fields(owner = %owner.user_id))]
    pub fn deactivate_or_delete(
        &self,
        owner: Actor,
        reward_id: RewardId,
    ) -> Result<DeletionOutcome> {
        Self::require_parent_role(owner)?;
        let row = self
            .catalog
            .row(reward_id)
            .ok_or(LedgerError::NotFound(NotFoundKind::Reward))?;
        let mut reward = self.catalog.lock(&row)?;
        if reward.removed {
            return Err(LedgerError::NotFound(NotFoundKind::Reward));
        }
        if reward.item.owner_id != owner.user_id {
            return Err(LedgerError::permission("reward belongs to another parent"));
        }

        // Exchanges append while holding this row lock, so the answer is stable.
        let outcome = if self.exchanges.references_reward(reward_id) {
            reward.item.active = false;
            reward.item.updated_at = Utc::now();
            DeletionOutcome::Deactivated
        } else {
            reward.removed = true;
            self.catalog.unlink(reward_id);
            DeletionOutcome::Deleted
        };

        info!(reward_id = %reward_id, outcome = ?outcome, "reward retired");
        Ok(outcome)
    }

    pub fn reward(&self, reward_id: RewardId) -> Result<Option<RewardItem>> {
        self.catalog.get(reward_id)
    }

    /// Rewards a viewer can browse: a parent's own, or a child's parent's.
    pub fn rewards_visible_to(&self, viewer: Actor, active_only: bool) -> Result<Vec<RewardItem>> {
        let owner = match viewer.role {
            Role::Parent => Some(viewer.user_id),
            Role::Child => self
                .accounts
                .get(viewer.user_id)
                .and_then(|account| account.parent_id),
        };
        match owner {
            Some(owner) => self.catalog.list_by_owner(owner, active_only),
            None => Ok(Vec::new()),
        }
    }

    // === Exchange Engine ===

    fn resolve_beneficiary(&self, actor: Actor, target_child: Option<UserId>) -> Result<UserId> {
        match actor.role {
            Role::Parent => {
                let child_id = target_child.ok_or_else(|| {
                    LedgerError::validation("a child id is required when a parent redeems")
                })?;
                self.accounts.require_child_of(actor.user_id, child_id)?;
                Ok(child_id)
            }
            // A child always redeems for itself.
            Role::Child => Ok(actor.user_id),
        }
    }

    /// Redeems a reward for points.
    ///
    /// The reward row and then the beneficiary's balance row are locked for the
    /// whole check-then-write sequence. On success the balance is debited by
    /// the current price, stock drops by one and a completed record is
    /// appended. On any failure none of the three effects remain.
    ///
    /// # Errors
    ///
    /// Checked in this order:
    ///
    /// - [`LedgerError::ValidationFailed`] - A parent did not name a child.
    /// - [`LedgerError::PermissionDenied`] - The named child is not the parent's.
    /// - [`LedgerError::NotFound`] - `reward_not_found`.
    /// - [`LedgerError::InvalidState`] - `inactive`, then `out_of_stock`.
    /// - [`LedgerError::NotFound`] - `no_points_record`.
    /// - [`LedgerError::InvalidState`] - `insufficient_points`.
    /// - [`LedgerError::StorageFailure`] - Lock timeout or failed append; rolled back.
    #[instrument(
        skip(self),
        fields(actor = %actor.user_id, role = %actor.role, reward = %reward_id)
    )]
    pub fn exchange(
        &self,
        actor: Actor,
        reward_id: RewardId,
        target_child: Option<UserId>,
    ) -> Result<ExchangeRecord> {
        let _shared = self.shared()?;
        let beneficiary = self.resolve_beneficiary(actor, target_child)?;

        let reward_row = self
            .catalog
            .row(reward_id)
            .ok_or(LedgerError::NotFound(NotFoundKind::Reward))?;
        let mut reward = self.catalog.lock(&reward_row)?;
        if reward.removed {
            return Err(LedgerError::NotFound(NotFoundKind::Reward));
        }
        if !reward.item.active {
            return Err(LedgerError::InvalidState(InvalidStateReason::Inactive));
        }
        if reward.item.stock == 0 {
            warn!(beneficiary = %beneficiary, "reward out of stock");
            return Err(LedgerError::InvalidState(InvalidStateReason::OutOfStock));
        }

        let points_row = self
            .points
            .row(beneficiary)
            .ok_or(LedgerError::NotFound(NotFoundKind::PointsRecord))?;
        let mut balance = self.points.lock(&points_row)?;

        let price = reward.item.price;
        if balance.available() < price {
            warn!(
                beneficiary = %beneficiary,
                available = balance.available(),
                price,
                "insufficient points"
            );
            return Err(LedgerError::InvalidState(
                InvalidStateReason::InsufficientPoints,
            ));
        }

        // Keep the pre-exchange state for rollback.
        let saved_balance = balance.clone();
        let saved_stock = reward.item.stock;
        let saved_updated_at = reward.item.updated_at;

        balance.apply(0, -price, false)?;
        reward.item.stock -= 1;
        reward.item.updated_at = Utc::now();

        match self.exchanges.append(beneficiary, reward_id, price) {
            Ok(record) => {
                info!(
                    exchange_id = %record.id,
                    beneficiary = %beneficiary,
                    points_used = price,
                    stock_left = reward.item.stock,
                    "reward exchanged"
                );
                Ok(record)
            }
            Err(err) => {
                *balance = saved_balance;
                reward.item.stock = saved_stock;
                reward.item.updated_at = saved_updated_at;
                warn!(beneficiary = %beneficiary, error = %err, "exchange rolled back");
                Err(err)
            }
        }
    }

    pub fn exchanges(&self, query: &ExchangeQuery) -> Vec<ExchangeRecord> {
        self.exchanges.query(query)
    }

    // === Statistics ===

    /// Read-only reporting view over behaviors and balances.
    pub fn statistics(&self) -> StatisticsProjector<'_> {
        StatisticsProjector::new(&self.accounts, &self.points, &self.behaviors)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
