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

//! UPS guard
//!
//! Polls a NUT server for the state of one UPS and shuts the host down when
//! the UPS has been on battery too long or its charge drops too low.
//!
//! ## Architecture
//!
//! - **snapshot / battery**: the device's variables and the on-battery
//!   episode derived from them
//! - **policy**: pure threshold decision for the configured mode
//! - **client**: trait seam over `nut-client` sessions
//! - **monitor**: the poll loop tying the above together
//! - **events / shutdown**: side effects, behind traits
//! - **service**: stop signals and wiring from [`config::Config`]

pub mod battery;
pub mod client;
pub mod config;
pub mod events;
pub mod monitor;
pub mod policy;
pub mod service;
pub mod shutdown;
pub mod snapshot;
