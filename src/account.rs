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

//! Account directory: parents, children and the link between them.
//!
//! A parent has no parent reference. A child always references a parent-role
//! account, so the relation can never form a cycle.

use crate::base::{Role, UserId};
use crate::error::{LedgerError, NotFoundKind, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

const MAX_NICKNAME_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: UserId,
    pub role: Role,
    pub parent_id: Option<UserId>,
    pub nickname: String,
    pub created_at: DateTime<Utc>,
}

/// Partial update of a profile. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub nickname: Option<String>,
}

fn validate_nickname(nickname: &str) -> Result<()> {
    let nickname = nickname.trim();
    if nickname.is_empty() {
        return Err(LedgerError::validation("nickname must not be empty"));
    }
    if nickname.chars().count() > MAX_NICKNAME_LEN {
        return Err(LedgerError::validation(format!(
            "nickname longer than {MAX_NICKNAME_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct AccountDirectory {
    accounts: DashMap<UserId, Account>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    pub fn get(&self, user_id: UserId) -> Option<Account> {
        self.accounts.get(&user_id).map(|account| account.clone())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub(crate) fn register_parent(&self, user_id: UserId, nickname: &str) -> Result<Account> {
        validate_nickname(nickname)?;
        self.insert(Account {
            id: user_id,
            role: Role::Parent,
            parent_id: None,
            nickname: nickname.trim().to_string(),
            created_at: Utc::now(),
        })
    }

    pub(crate) fn create_child(
        &self,
        parent_id: UserId,
        child_id: UserId,
        nickname: &str,
    ) -> Result<Account> {
        self.require_parent(parent_id)?;
        validate_nickname(nickname)?;
        self.insert(Account {
            id: child_id,
            role: Role::Child,
            parent_id: Some(parent_id),
            nickname: nickname.trim().to_string(),
            created_at: Utc::now(),
        })
    }

    fn insert(&self, account: Account) -> Result<Account> {
        match self.accounts.entry(account.id) {
            Entry::Occupied(_) => Err(LedgerError::validation(format!(
                "user id {} is already registered",
                account.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(account.clone());
                Ok(account)
            }
        }
    }

    /// Fails unless `user_id` is a registered parent-role account.
    pub(crate) fn require_parent(&self, user_id: UserId) -> Result<Account> {
        match self.get(user_id) {
            Some(account) if account.role == Role::Parent => Ok(account),
            Some(_) => Err(LedgerError::permission("only parent accounts may do this")),
            None => Err(LedgerError::permission("unknown parent account")),
        }
    }

    /// Returns the child when it exists and is linked to `parent_id`.
    ///
    /// A missing child and someone else's child are indistinguishable to the
    /// caller; both are `PermissionDenied`.
    pub(crate) fn require_child_of(&self, parent_id: UserId, child_id: UserId) -> Result<Account> {
        match self.get(child_id) {
            Some(child) if child.role == Role::Child && child.parent_id == Some(parent_id) => {
                Ok(child)
            }
            Some(_) | None => Err(LedgerError::permission(
                "child not found or not linked to this parent",
            )),
        }
    }

    pub(crate) fn children_of(&self, parent_id: UserId) -> Vec<Account> {
        let mut children: Vec<Account> = self
            .accounts
            .iter()
            .filter(|account| account.parent_id == Some(parent_id))
            .map(|account| account.clone())
            .collect();
        children.sort_by_key(|child| child.id);
        children
    }

    pub(crate) fn update_child(
        &self,
        parent_id: UserId,
        child_id: UserId,
        patch: ProfilePatch,
    ) -> Result<Account> {
        self.require_child_of(parent_id, child_id)?;
        self.apply_patch(child_id, patch)
    }

    /// Updates the caller's own profile, whatever its role.
    pub(crate) fn update_profile(&self, user_id: UserId, patch: ProfilePatch) -> Result<Account> {
        self.apply_patch(user_id, patch)
    }

    fn apply_patch(&self, user_id: UserId, patch: ProfilePatch) -> Result<Account> {
        if let Some(nickname) = &patch.nickname {
            validate_nickname(nickname)?;
        }

        let mut account = self
            .accounts
            .get_mut(&user_id)
            .ok_or(LedgerError::NotFound(NotFoundKind::Account))?;
        if let Some(nickname) = patch.nickname {
            account.nickname = nickname.trim().to_string();
        }
        Ok(account.clone())
    }

    pub(crate) fn remove(&self, user_id: UserId) -> Option<Account> {
        self.accounts.remove(&user_id).map(|(_, account)| account)
    }
}
