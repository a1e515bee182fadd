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

//! Monitor event reporting.
//!
//! Every state transition, connection change and error the monitor sees is
//! turned into an [`Event`] and handed to an [`EventSink`]. Sinks are
//! composed at startup: the log sink is always present, the JSON-lines sink
//! only when `event_log` is configured.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{log, warn, Level};
use serde::Serialize;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn level(self) -> Level {
        match self {
            Self::Info => Level::Info,
            Self::Warning => Level::Warn,
            Self::Error => Level::Error,
        }
    }
}

/// Stable numeric event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCode {
    /// Service start/stop, connection established, config loaded.
    Lifecycle,
    /// Could not connect or log in to upsd.
    ConnectFailed,
    /// UPS switched to battery power.
    OnBattery,
    /// Time-on-battery tracking and return to line power.
    BatteryTimer,
    /// Query or data error during a poll.
    MonitorError,
    /// Shutdown threshold crossed, command issued.
    ShutdownInitiated,
    /// Configuration could not be loaded.
    ConfigFailed,
    /// Shutdown command could not be started.
    ShutdownFailed,
}

impl EventCode {
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::Lifecycle => 1000,
            Self::ConnectFailed => 1001,
            Self::OnBattery => 1002,
            Self::BatteryTimer => 1003,
            Self::MonitorError => 1004,
            Self::ShutdownInitiated => 1005,
            Self::ConfigFailed => 1006,
            Self::ShutdownFailed => 1007,
        }
    }
}

/// A single reported event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub code: u32,
    pub message: String,
}

impl Event {
    #[must_use]
    pub fn new(severity: Severity, code: EventCode, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            code: code.code(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn info(code: EventCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }

    #[must_use]
    pub fn warning(code: EventCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    #[must_use]
    pub fn error(code: EventCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }
}

/// Destination for monitor events.
pub trait EventSink: Send {
    fn report(&mut self, event: &Event);
}

/// Writes events through the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn report(&mut self, event: &Event) {
        log!(
            target: "upsguard::events",
            event.severity.level(),
            "[{}] {}",
            event.code,
            event.message
        );
    }
}

/// Appends one JSON object per event to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    file: File,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    fn write_event(&mut self, event: &Event) -> io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()
    }
}

impl EventSink for JsonLinesSink {
    fn report(&mut self, event: &Event) {
        if let Err(e) = self.write_event(event) {
            warn!("Failed to write event {} to event log: {}", event.code, e);
        }
    }
}

/// Forwards every event to each contained sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn report(&mut self, event: &Event) {
        for sink in &mut self.sinks {
            sink.report(event);
        }
    }
}

/// Sink that keeps events in memory, shared with the test body.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<Event>>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, code: EventCode) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.code == code.code())
            .count()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn report(&mut self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}
