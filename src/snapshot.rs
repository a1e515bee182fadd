// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;

use thiserror::Error;

/// Device status flags, e.g. "OL", "OB DISCHRG", "OB LB".
pub const STATUS_KEY: &str = "ups.status";

/// Remaining battery charge in percent.
pub const CHARGE_KEY: &str = "battery.charge";

/// Charge assumed when the device does not report one.
pub const DEFAULT_CHARGE_PERCENT: i64 = 100;

const ON_BATTERY_PREFIX: &str = "ob";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid {key} value: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Point-in-time copy of a device's variables, replaced on every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    vars: BTreeMap<String, String>,
}

impl From<BTreeMap<String, String>> for StatusSnapshot {
    fn from(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StatusSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl StatusSnapshot {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.get(STATUS_KEY)
    }

    /// Whether the status flags start with "OB" (case-insensitive).
    #[must_use]
    pub fn is_on_battery(&self) -> bool {
        self.status()
            .map(str::trim_start)
            .and_then(|status| status.get(..ON_BATTERY_PREFIX.len()))
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(ON_BATTERY_PREFIX))
    }

    /// Battery charge in whole percent, [`DEFAULT_CHARGE_PERCENT`] when absent.
    ///
    /// Fractional readings are truncated toward zero.
    pub fn charge_percent(&self) -> Result<i64, SnapshotError> {
        let Some(raw) = self.get(CHARGE_KEY) else {
            return Ok(DEFAULT_CHARGE_PERCENT);
        };

        let value = raw.trim();
        if let Ok(percent) = value.parse::<i64>() {
            return Ok(percent);
        }

        match value.parse::<f64>() {
            Ok(percent) if percent.is_finite() => Ok(truncate_percent(percent)),
            _ => Err(SnapshotError::InvalidValue {
                key: CHARGE_KEY,
                value: raw.to_string(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[allow(clippy::cast_possible_truncation, reason = "charge readings are 0-100")]
fn truncate_percent(percent: f64) -> i64 {
    percent.trunc() as i64
}
