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

//! Error types for ledger and exchange operations.

use std::fmt;
use thiserror::Error;

/// What was missing when a lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Account,
    Reward,
    /// The beneficiary has no points balance row.
    PointsRecord,
}

impl NotFoundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account_not_found",
            Self::Reward => "reward_not_found",
            Self::PointsRecord => "no_points_record",
        }
    }
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an otherwise well-formed redemption cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStateReason {
    Inactive,
    OutOfStock,
    InsufficientPoints,
}

impl InvalidStateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::OutOfStock => "out_of_stock",
            Self::InsufficientPoints => "insufficient_points",
        }
    }
}

impl fmt::Display for InvalidStateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Actor, role or ownership does not permit the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Account, reward or balance row is missing
    #[error("not found: {0}")]
    NotFound(NotFoundKind),

    /// Reward inactive, out of stock, or balance too low
    #[error("invalid state: {0}")]
    InvalidState(InvalidStateReason),

    /// Malformed or out-of-range input
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The store could not commit; nothing was applied
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

/// Ledger result alias.
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub(crate) fn permission(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    /// Stable machine-readable code for the error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::StorageFailure(_) => "STORAGE_FAILURE",
        }
    }

    /// Sub-reason for `NotFound` and `InvalidState`.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::NotFound(kind) => Some(kind.as_str()),
            Self::InvalidState(reason) => Some(reason.as_str()),
            Self::PermissionDenied(_) | Self::ValidationFailed(_) | Self::StorageFailure(_) => {
                None
            }
        }
    }

    /// Only storage failures are worth retrying; every other kind is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::PermissionDenied("not your child".into()).to_string(),
            "permission denied: not your child"
        );
        assert_eq!(
            LedgerError::NotFound(NotFoundKind::PointsRecord).to_string(),
            "not found: no_points_record"
        );
        assert_eq!(
            LedgerError::InvalidState(InvalidStateReason::OutOfStock).to_string(),
            "invalid state: out_of_stock"
        );
        assert_eq!(
            LedgerError::ValidationFailed("price must be positive".into()).to_string(),
            "validation failed: price must be positive"
        );
        assert_eq!(
            LedgerError::StorageFailure("lock timeout".into()).to_string(),
            "storage failure: lock timeout"
        );
    }

    #[test]
    fn codes_and_reasons() {
        let err = LedgerError::InvalidState(InvalidStateReason::InsufficientPoints);
        assert_eq!(err.error_code(), "INVALID_STATE");
        assert_eq!(err.reason(), Some("insufficient_points"));

        let err = LedgerError::NotFound(NotFoundKind::Reward);
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert_eq!(err.reason(), Some("reward_not_found"));

        assert_eq!(LedgerError::permission("x").reason(), None);
    }

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(LedgerError::StorageFailure("busy".into()).is_retryable());
        assert!(!LedgerError::InvalidState(InvalidStateReason::Inactive).is_retryable());
        assert!(!LedgerError::validation("bad").is_retryable());
    }
}
