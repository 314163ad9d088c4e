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

//! Engine public API integration tests.

use chrono::{Duration, Utc};
use points_ledger::{
    Actor, BehaviorQuery, Classification, DeletionOutcome, Engine, ExchangeQuery, ExchangeStatus,
    InvalidStateReason, LedgerConfig, LedgerError, NewBehavior, NewReward, NotFoundKind,
    ProfilePatch, RewardId, RewardPatch, UserId,
};

const MOM: UserId = UserId(1);
const DAD: UserId = UserId(2);
const ANN: UserId = UserId(10);
const BEN: UserId = UserId(20);

fn mom() -> Actor {
    Actor::parent(MOM)
}

fn dad() -> Actor {
    Actor::parent(DAD)
}

/// Mom has Ann, Dad has Ben.
fn two_families() -> Engine {
    let engine = Engine::new();
    engine.register_parent(MOM, "Mom").unwrap();
    engine.register_parent(DAD, "Dad").unwrap();
    engine.create_child(mom(), ANN, "Ann").unwrap();
    engine.create_child(dad(), BEN, "Ben").unwrap();
    engine
}

fn award(engine: &Engine, child: UserId, delta: i64) {
    engine
        .record_behavior(mom(), NewBehavior::new(child, "behavior", delta))
        .unwrap();
}

fn balance(engine: &Engine, child: UserId) -> (i64, i64) {
    let balance = engine.balance(Actor::child(child), child).unwrap();
    (balance.total_points, balance.available_points)
}

// === Behavior Ledger ===

#[test]
fn new_child_starts_at_zero() {
    let engine = two_families();
    assert_eq!(balance(&engine, ANN), (0, 0));
}

#[test]
fn clamp_then_refuse_exchange() {
    let engine = two_families();

    award(&engine, ANN, 10);
    assert_eq!(balance(&engine, ANN), (10, 10));

    award(&engine, ANN, -15);
    assert_eq!(balance(&engine, ANN), (-5, 0));

    let reward = engine
        .create_reward(mom(), NewReward::new("Sticker", 5, 10))
        .unwrap();
    let result = engine.exchange(Actor::child(ANN), reward.id, None);

    assert_eq!(
        result,
        Err(LedgerError::InvalidState(InvalidStateReason::InsufficientPoints))
    );
    assert_eq!(engine.reward(reward.id).unwrap().unwrap().stock, 10);
    assert!(engine.exchanges(&ExchangeQuery::default()).is_empty());
}

#[test]
fn recorded_behavior_is_classified_and_attributed() {
    let engine = two_families();
    let good = engine
        .record_behavior(
            mom(),
            NewBehavior::new(ANN, "Helped cook", 8).with_evidence("uploads/cook.jpg"),
        )
        .unwrap();
    let neutral = engine
        .record_behavior(mom(), NewBehavior::new(ANN, "Nothing much", 0))
        .unwrap();

    assert_eq!(good.classification, Classification::Good);
    assert_eq!(good.recorder_id, MOM);
    assert_eq!(good.evidence.as_deref(), Some("uploads/cook.jpg"));
    assert_eq!(neutral.classification, Classification::Bad);
    assert_eq!(balance(&engine, ANN), (8, 8));
}

#[test]
fn behavior_validation() {
    let engine = two_families();

    let empty = engine.record_behavior(mom(), NewBehavior::new(ANN, "   ", 5));
    assert!(matches!(empty, Err(LedgerError::ValidationFailed(_))));

    let long = engine.record_behavior(mom(), NewBehavior::new(ANN, "x".repeat(501), 5));
    assert!(matches!(long, Err(LedgerError::ValidationFailed(_))));

    let huge = engine.record_behavior(mom(), NewBehavior::new(ANN, "Saved the day", 1001));
    assert!(matches!(huge, Err(LedgerError::ValidationFailed(_))));

    let edge = engine.record_behavior(mom(), NewBehavior::new(ANN, "Big day", -1000));
    assert!(edge.is_ok());
    assert_eq!(engine.behavior_count(&BehaviorQuery::default()), 1);
}

#[test]
fn configured_limits_apply() {
    let engine = Engine::with_config(LedgerConfig {
        max_abs_score_delta: 10,
        max_description_len: 5,
        ..LedgerConfig::default()
    });
    engine.register_parent(MOM, "Mom").unwrap();
    engine.create_child(mom(), ANN, "Ann").unwrap();

    assert!(engine.record_behavior(mom(), NewBehavior::new(ANN, "ok", 10)).is_ok());
    assert!(engine.record_behavior(mom(), NewBehavior::new(ANN, "ok", 11)).is_err());
    assert!(engine.record_behavior(mom(), NewBehavior::new(ANN, "too long", 1)).is_err());
}

#[test]
fn behaviors_filter_by_child_and_classification() {
    let engine = two_families();
    award(&engine, ANN, 3);
    award(&engine, ANN, -2);
    engine
        .record_behavior(dad(), NewBehavior::new(BEN, "Reading", 4))
        .unwrap();

    let ann_good =
        engine.behaviors(&BehaviorQuery::for_children([ANN]).classified(Classification::Good));
    assert_eq!(ann_good.len(), 1);
    assert_eq!(ann_good[0].score_delta, 3);

    let newest = engine.behaviors(&BehaviorQuery::default().page(0, 1));
    assert_eq!(newest[0].child_id, BEN);

    let later = Utc::now() + Duration::hours(1);
    let future = BehaviorQuery::default().between(later, later + Duration::hours(1));
    assert_eq!(engine.behavior_count(&future), 0);
}

// === Exchange Engine ===

#[test]
fn exchange_last_item_then_out_of_stock() {
    let engine = two_families();
    award(&engine, ANN, 20);
    let reward = engine
        .create_reward(mom(), NewReward::new("Ice cream", 20, 1))
        .unwrap();

    let record = engine.exchange(Actor::child(ANN), reward.id, None).unwrap();

    assert_eq!(record.user_id, ANN);
    assert_eq!(record.reward_id, reward.id);
    assert_eq!(record.points_used, 20);
    assert_eq!(record.status, ExchangeStatus::Completed);
    assert_eq!(balance(&engine, ANN), (20, 0));
    assert_eq!(engine.reward(reward.id).unwrap().unwrap().stock, 0);
    assert_eq!(engine.exchanges(&ExchangeQuery::for_users([ANN])), vec![record]);

    let retry = engine.exchange(Actor::child(ANN), reward.id, None);
    assert_eq!(
        retry,
        Err(LedgerError::InvalidState(InvalidStateReason::OutOfStock))
    );
    let err = retry.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE");
    assert_eq!(err.reason(), Some("out_of_stock"));
    assert!(!err.is_retryable());
}

#[test]
fn exchange_debits_available_only() {
    let engine = two_families();
    award(&engine, ANN, 50);
    let reward = engine
        .create_reward(mom(), NewReward::new("Movie", 30, 2))
        .unwrap();

    engine.exchange(Actor::child(ANN), reward.id, None).unwrap();

    assert_eq!(balance(&engine, ANN), (50, 20));
}

#[test]
fn parent_redeems_for_own_child() {
    let engine = two_families();
    award(&engine, ANN, 30);
    let reward = engine
        .create_reward(mom(), NewReward::new("Book", 25, 1))
        .unwrap();

    let missing_target = engine.exchange(mom(), reward.id, None);
    assert!(matches!(missing_target, Err(LedgerError::ValidationFailed(_))));

    let foreign = engine.exchange(dad(), reward.id, Some(ANN));
    assert!(matches!(foreign, Err(LedgerError::PermissionDenied(_))));

    let record = engine.exchange(mom(), reward.id, Some(ANN)).unwrap();
    assert_eq!(record.user_id, ANN);
    assert_eq!(balance(&engine, ANN), (30, 5));
}

#[test]
fn child_target_is_ignored() {
    let engine = two_families();
    award(&engine, ANN, 10);
    let reward = engine
        .create_reward(mom(), NewReward::new("Sticker", 10, 1))
        .unwrap();

    let record = engine
        .exchange(Actor::child(ANN), reward.id, Some(BEN))
        .unwrap();

    assert_eq!(record.user_id, ANN);
    assert_eq!(balance(&engine, BEN), (0, 0));
}

#[test]
fn unknown_reward_is_not_found() {
    let engine = two_families();
    assert_eq!(
        engine.exchange(Actor::child(ANN), RewardId(999), None),
        Err(LedgerError::NotFound(NotFoundKind::Reward))
    );
}

#[test]
fn inactive_is_checked_before_stock() {
    let engine = two_families();
    award(&engine, ANN, 100);
    let reward = engine
        .create_reward(mom(), NewReward::new("Toy", 10, 0))
        .unwrap();
    engine
        .update_reward(
            mom(),
            reward.id,
            RewardPatch {
                active: Some(false),
                ..RewardPatch::default()
            },
        )
        .unwrap();

    assert_eq!(
        engine.exchange(Actor::child(ANN), reward.id, None),
        Err(LedgerError::InvalidState(InvalidStateReason::Inactive))
    );
}

// === Reward Catalog ===

#[test]
fn reward_validation() {
    let engine = two_families();
    let free = engine.create_reward(mom(), NewReward::new("Free", 0, 1));
    assert!(matches!(free, Err(LedgerError::ValidationFailed(_))));

    let unnamed = engine.create_reward(mom(), NewReward::new("", 5, 1));
    assert!(matches!(unnamed, Err(LedgerError::ValidationFailed(_))));

    let by_child = engine.create_reward(Actor::child(ANN), NewReward::new("Candy", 5, 1));
    assert!(matches!(by_child, Err(LedgerError::PermissionDenied(_))));
}

#[test]
fn only_owner_updates_reward() {
    let engine = two_families();
    let reward = engine
        .create_reward(mom(), NewReward::new("Toy", 10, 1))
        .unwrap();

    let patch = RewardPatch {
        price: Some(15),
        ..RewardPatch::default()
    };
    let denied = engine.update_reward(dad(), reward.id, patch.clone());
    assert!(matches!(denied, Err(LedgerError::PermissionDenied(_))));

    let updated = engine.update_reward(mom(), reward.id, patch).unwrap();
    assert_eq!(updated.price, 15);
    assert_eq!(updated.name, "Toy");
}

#[test]
fn unreferenced_reward_is_deleted() {
    let engine = two_families();
    let reward = engine
        .create_reward(mom(), NewReward::new("Toy", 10, 1))
        .unwrap();

    let denied = engine.deactivate_or_delete(dad(), reward.id);
    assert!(matches!(denied, Err(LedgerError::PermissionDenied(_))));

    assert_eq!(
        engine.deactivate_or_delete(mom(), reward.id),
        Ok(DeletionOutcome::Deleted)
    );
    assert_eq!(engine.reward(reward.id).unwrap(), None);
    assert_eq!(
        engine.deactivate_or_delete(mom(), reward.id),
        Err(LedgerError::NotFound(NotFoundKind::Reward))
    );
    assert_eq!(
        engine.exchange(Actor::child(ANN), reward.id, None),
        Err(LedgerError::NotFound(NotFoundKind::Reward))
    );
}

#[test]
fn referenced_reward_is_deactivated_and_history_keeps_price() {
    let engine = two_families();
    award(&engine, ANN, 100);
    let reward = engine
        .create_reward(mom(), NewReward::new("Movie", 20, 5))
        .unwrap();
    engine.exchange(Actor::child(ANN), reward.id, None).unwrap();

    engine
        .update_reward(
            mom(),
            reward.id,
            RewardPatch {
                price: Some(40),
                ..RewardPatch::default()
            },
        )
        .unwrap();
    assert_eq!(
        engine.deactivate_or_delete(mom(), reward.id),
        Ok(DeletionOutcome::Deactivated)
    );

    let kept = engine.reward(reward.id).unwrap().unwrap();
    assert!(!kept.active);
    assert_eq!(
        engine.exchange(Actor::child(ANN), reward.id, None),
        Err(LedgerError::InvalidState(InvalidStateReason::Inactive))
    );
    let history = engine.exchanges(&ExchangeQuery::for_reward(reward.id));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].points_used, 20);
}

#[test]
fn rewards_visible_to_family() {
    let engine = two_families();
    let toy = engine
        .create_reward(mom(), NewReward::new("Toy", 10, 1))
        .unwrap();
    let hidden = engine
        .create_reward(mom(), NewReward::new("Hidden", 10, 1))
        .unwrap();
    engine
        .create_reward(dad(), NewReward::new("Game", 10, 1))
        .unwrap();
    engine
        .update_reward(
            mom(),
            hidden.id,
            RewardPatch {
                active: Some(false),
                ..RewardPatch::default()
            },
        )
        .unwrap();

    assert_eq!(engine.rewards_visible_to(mom(), false).unwrap().len(), 2);
    assert_eq!(
        engine.rewards_visible_to(Actor::child(ANN), true).unwrap(),
        vec![toy]
    );
}

// === Accounts and Permissions ===

#[test]
fn parents_only_manage_own_children() {
    let engine = two_families();

    let foreign = engine.record_behavior(dad(), NewBehavior::new(ANN, "Sneaky", 5));
    assert!(matches!(foreign, Err(LedgerError::PermissionDenied(_))));

    let by_child = engine.record_behavior(Actor::child(ANN), NewBehavior::new(ANN, "Self", 5));
    assert!(matches!(by_child, Err(LedgerError::PermissionDenied(_))));

    let missing = engine.record_behavior(mom(), NewBehavior::new(UserId(99), "Ghost", 5));
    assert!(matches!(missing, Err(LedgerError::PermissionDenied(_))));

    assert!(engine.behaviors(&BehaviorQuery::default()).is_empty());
}

#[test]
fn balance_visibility() {
    let engine = two_families();

    assert!(engine.balance(mom(), ANN).is_ok());
    assert!(matches!(
        engine.balance(dad(), ANN),
        Err(LedgerError::PermissionDenied(_))
    ));
    assert!(matches!(
        engine.balance(Actor::child(BEN), ANN),
        Err(LedgerError::PermissionDenied(_))
    ));
    assert_eq!(
        engine.balance(mom(), MOM),
        Err(LedgerError::NotFound(NotFoundKind::PointsRecord))
    );
}

#[test]
fn visible_children_by_role() {
    let engine = two_families();
    engine.create_child(mom(), UserId(11), "Cy").unwrap();

    assert_eq!(
        engine.visible_children(mom(), None).unwrap(),
        vec![ANN, UserId(11)]
    );
    assert_eq!(engine.visible_children(mom(), Some(ANN)).unwrap(), vec![ANN]);
    assert!(engine.visible_children(mom(), Some(BEN)).is_err());
    assert_eq!(
        engine.visible_children(Actor::child(ANN), None).unwrap(),
        vec![ANN]
    );
    assert!(engine.visible_children(Actor::child(ANN), Some(BEN)).is_err());
}

#[test]
fn children_of_includes_balances() {
    let engine = two_families();
    award(&engine, ANN, 12);

    let children = engine.children_of(mom()).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].account.nickname, "Ann");
    assert_eq!(children[0].total_points, 12);
    assert_eq!(children[0].available_points, 12);

    let json = serde_json::to_value(&children[0]).unwrap();
    assert_eq!(json["nickname"], "Ann");
    assert_eq!(json["available_points"], 12);
}

#[test]
fn update_child_requires_ownership() {
    let engine = two_families();
    let patch = ProfilePatch {
        nickname: Some("Annie".into()),
    };

    assert!(matches!(
        engine.update_child(dad(), ANN, patch.clone()),
        Err(LedgerError::PermissionDenied(_))
    ));
    assert_eq!(engine.update_child(mom(), ANN, patch).unwrap().nickname, "Annie");
}

#[test]
fn anyone_may_update_their_own_profile() {
    let engine = two_families();
    let patch = |nickname: &str| ProfilePatch {
        nickname: Some(nickname.into()),
    };

    assert_eq!(engine.update_profile(mom(), patch("Mum")).unwrap().nickname, "Mum");
    assert_eq!(
        engine
            .update_profile(Actor::child(ANN), patch("Annie"))
            .unwrap()
            .nickname,
        "Annie"
    );
    assert_eq!(engine.account(MOM).unwrap().nickname, "Mum");
    assert!(matches!(
        engine.update_profile(mom(), patch("")),
        Err(LedgerError::ValidationFailed(_))
    ));
}

#[test]
fn delete_child_cascades() {
    let engine = two_families();
    award(&engine, ANN, 40);
    let reward = engine
        .create_reward(mom(), NewReward::new("Toy", 10, 3))
        .unwrap();
    engine.exchange(Actor::child(ANN), reward.id, None).unwrap();

    assert!(matches!(
        engine.delete_child(dad(), ANN),
        Err(LedgerError::PermissionDenied(_))
    ));
    engine.delete_child(mom(), ANN).unwrap();

    assert!(engine.account(ANN).is_none());
    assert!(engine.balances().unwrap().iter().all(|b| b.user_id != ANN));
    assert!(engine.behaviors(&BehaviorQuery::for_children([ANN])).is_empty());
    assert!(engine.exchanges(&ExchangeQuery::for_users([ANN])).is_empty());
    assert!(matches!(
        engine.record_behavior(mom(), NewBehavior::new(ANN, "Late", 1)),
        Err(LedgerError::PermissionDenied(_))
    ));

    // no exchange references the reward any more
    assert_eq!(
        engine.deactivate_or_delete(mom(), reward.id),
        Ok(DeletionOutcome::Deleted)
    );
}

#[test]
fn get_or_create_points_requires_account() {
    let engine = two_families();
    assert_eq!(
        engine.get_or_create_points(UserId(99)),
        Err(LedgerError::NotFound(NotFoundKind::Account))
    );
    let parent_points = engine.get_or_create_points(MOM).unwrap();
    assert_eq!(parent_points.available_points, 0);
}

// === Statistics ===

#[test]
fn statistics_over_visible_children() {
    let engine = two_families();
    award(&engine, ANN, 60);
    award(&engine, ANN, -5);
    engine
        .record_behavior(dad(), NewBehavior::new(BEN, "Reading", 7))
        .unwrap();

    let children = engine.visible_children(mom(), None).unwrap();
    let stats = engine.statistics();

    let summary = stats.summary(&children);
    assert_eq!(summary.total_behaviors, 2);
    assert_eq!(summary.positive_rate, 50);
    assert_eq!(summary.points_delta, 55);

    let trend = stats
        .daily_trend(&children, Utc::now().date_naive(), 3)
        .unwrap();
    assert_eq!(trend.len(), 3);
    assert_eq!(trend.iter().map(|day| day.good_count).sum::<u64>(), 1);

    let overview = stats.overview(&children);
    assert_eq!(overview.active_children, 1);
    assert_eq!(overview.behaviors, summary);
    let json = serde_json::to_value(overview).unwrap();
    assert_eq!(json["active_children"], 1);
    assert_eq!(json["total_behaviors"], 2);

    let reports = stats.child_reports(&children, None).unwrap();
    assert_eq!(reports[0].total_points, 55);
    assert_eq!(reports[0].level, 2);
}
