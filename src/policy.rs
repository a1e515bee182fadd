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

//! Shutdown threshold policy.
//!
//! Pure decision logic: given the battery state, how long the current
//! episode has lasted and the charge reported by the device, decide whether
//! the host must be shut down. The policy holds no clock and never waits;
//! elapsed time is supplied by the caller on every poll.

use std::fmt;

use chrono::TimeDelta;

use crate::battery::BatteryState;
use crate::config::{Config, MonitorMode};

/// Why a shutdown was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    BatteryCritical,
    TimeOnBatteryExceeded,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BatteryCritical => "battery level critical",
            Self::TimeOnBatteryExceeded => "time on battery exceeded threshold",
        })
    }
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoAction,
    Shutdown(ShutdownReason),
}

/// Everything the policy looks at for one poll
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput {
    pub state: BatteryState,
    /// Time on battery in the current episode
    pub elapsed: TimeDelta,
    /// A shutdown was already issued for the current episode
    pub shutdown_issued: bool,
    /// Reported charge, `None` when the reading was unusable
    pub charge_percent: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    mode: MonitorMode,
    threshold: u64,
}

impl ThresholdPolicy {
    #[must_use]
    pub fn new(mode: MonitorMode, threshold: u64) -> Self {
        Self { mode, threshold }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.monitor_type.clone(), config.shutdown_threshold)
    }

    #[must_use]
    pub fn mode(&self) -> &MonitorMode {
        &self.mode
    }

    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Whether this policy can ever request a shutdown.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        !matches!(self.mode, MonitorMode::Unknown(_))
    }

    #[must_use]
    pub fn evaluate(&self, input: &PolicyInput) -> Decision {
        if input.state == BatteryState::Online || input.shutdown_issued {
            return Decision::NoAction;
        }

        let threshold = i64::try_from(self.threshold).unwrap_or(i64::MAX);
        match self.mode {
            MonitorMode::BatteryPercentage => match input.charge_percent {
                Some(charge) if charge <= threshold => {
                    Decision::Shutdown(ShutdownReason::BatteryCritical)
                }
                _ => Decision::NoAction,
            },
            MonitorMode::TimeOnBattery => {
                if input.elapsed.num_seconds() >= threshold {
                    Decision::Shutdown(ShutdownReason::TimeOnBatteryExceeded)
                } else {
                    Decision::NoAction
                }
            }
            MonitorMode::Unknown(_) => Decision::NoAction,
        }
    }
}
