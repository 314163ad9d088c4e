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

//! Engine configuration.
//!
//! Values come from an optional file (format picked by extension) overlaid by
//! `POINTS_LEDGER_*` environment variables, e.g. `POINTS_LEDGER_LOCK_TIMEOUT_MS=500`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "POINTS_LEDGER";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on waiting for a balance or reward row lock.
    pub lock_timeout_ms: u64,
    pub max_description_len: usize,
    /// Largest magnitude accepted for a single behavior score change.
    pub max_abs_score_delta: i64,
    pub max_reward_name_len: usize,
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            max_description_len: 500,
            max_abs_score_delta: 1_000,
            max_reward_name_len: 100,
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Loads defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Message("lock_timeout_ms must be positive".into()));
        }
        if self.max_abs_score_delta <= 0 {
            return Err(ConfigError::Message("max_abs_score_delta must be positive".into()));
        }
        if self.max_description_len == 0 {
            return Err(ConfigError::Message("max_description_len must be positive".into()));
        }
        if self.max_reward_name_len == 0 {
            return Err(ConfigError::Message("max_reward_name_len must be positive".into()));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
