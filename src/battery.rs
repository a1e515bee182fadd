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

//! Line power / battery power state tracking.
//!
//! The tracker remembers when the current on-battery episode started so the
//! time spent on battery can be derived on every poll, and whether a shutdown
//! was already issued for that episode. Returning to line power ends the
//! episode and clears both.

use chrono::{DateTime, TimeDelta, Utc};

/// Power source of the protected host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryState {
    Online,
    OnBattery,
}

/// Result of feeding one poll into the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State unchanged.
    Unchanged,
    /// Switched from line power to battery.
    WentOnBattery { at: DateTime<Utc> },
    /// Switched back to line power after the given time on battery.
    ReturnedOnline { on_battery_for: TimeDelta },
}

/// Tracks the current on-battery episode.
///
/// The tracker is in [`BatteryState::OnBattery`] exactly when an episode
/// start time is recorded.
#[derive(Debug, Default)]
pub struct BatteryStateTracker {
    battery_start_time: Option<DateTime<Utc>>,
    shutdown_issued: bool,
}

impl BatteryStateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> BatteryState {
        if self.battery_start_time.is_some() {
            BatteryState::OnBattery
        } else {
            BatteryState::Online
        }
    }

    /// When the current on-battery episode began, `None` while online.
    #[must_use]
    pub fn battery_start_time(&self) -> Option<DateTime<Utc>> {
        self.battery_start_time
    }

    /// Time spent on battery in the current episode, zero while online.
    ///
    /// A wall clock stepping backwards yields zero rather than a negative span.
    #[must_use]
    pub fn elapsed(&self, now: DateTime<Utc>) -> TimeDelta {
        self.battery_start_time
            .map_or(TimeDelta::zero(), |start| (now - start).max(TimeDelta::zero()))
    }

    /// Whether a shutdown has been issued during the current episode.
    #[must_use]
    pub fn shutdown_issued(&self) -> bool {
        self.shutdown_issued
    }

    /// Record that the shutdown for the current episode has been issued.
    pub fn mark_shutdown_issued(&mut self) {
        if self.battery_start_time.is_some() {
            self.shutdown_issued = true;
        }
    }

    /// Feed the latest on-battery reading taken at `now`.
    pub fn update(&mut self, on_battery: bool, now: DateTime<Utc>) -> Transition {
        match (self.battery_start_time, on_battery) {
            (None, true) => {
                self.battery_start_time = Some(now);
                self.shutdown_issued = false;
                Transition::WentOnBattery { at: now }
            }
            (Some(_), false) => {
                let on_battery_for = self.elapsed(now);
                self.battery_start_time = None;
                self.shutdown_issued = false;
                Transition::ReturnedOnline { on_battery_for }
            }
            (Some(_), true) | (None, false) => Transition::Unchanged,
        }
    }
}
