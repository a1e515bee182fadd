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

//! Process-level wiring: stop signals and building the monitor from config.

use log::{info, warn};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, NutStatusClient, StatusClient, StatusSession};
use crate::config::Config;
use crate::events::{FanoutSink, JsonLinesSink, LogSink};
use crate::monitor::MonitorLoop;
use crate::policy::ThresholdPolicy;
use crate::shutdown::{CommandShutdown, DryRunShutdown, ShutdownTrigger};
use crate::snapshot::StatusSnapshot;

/// Owns the token cancelled when the process is asked to stop.
#[derive(Debug, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token on SIGTERM or Ctrl+C.
    pub fn spawn_listener(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            warn!("Failed to register SIGTERM handler: {}", e);
                            if signal::ctrl_c().await.is_ok() {
                                info!("Received Ctrl+C, stopping");
                                token.cancel();
                            }
                            return;
                        }
                    };
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, stopping"),
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, stopping"),
                }
            }
            #[cfg(not(unix))]
            {
                if let Err(e) = signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C, stopping");
            }
            token.cancel();
        });
    }
}

/// Log sink plus the JSON-lines event log when one is configured.
///
/// An event log that cannot be opened is reported and skipped.
#[must_use]
pub fn event_sink(config: &Config) -> FanoutSink {
    let sink = FanoutSink::new().with(LogSink);
    match &config.event_log {
        Some(path) => match JsonLinesSink::open(path) {
            Ok(json) => {
                info!("Writing events to {}", path.display());
                sink.with(json)
            }
            Err(e) => {
                warn!("Cannot open event log {}: {}", path.display(), e);
                sink
            }
        },
        None => sink,
    }
}

fn shutdown_trigger(config: &Config, dry_run: bool) -> Box<dyn ShutdownTrigger> {
    if dry_run {
        Box::new(DryRunShutdown::new(config.shutdown_command.clone()))
    } else {
        Box::new(CommandShutdown::new(config.shutdown_command.clone()))
    }
}

/// Build the monitor loop described by `config`.
#[must_use]
pub fn build_monitor(config: &Config, dry_run: bool) -> MonitorLoop<NutStatusClient> {
    MonitorLoop::new(
        NutStatusClient::new(config.connection()),
        config.nut_server.ups_name.clone(),
        ThresholdPolicy::from_config(config),
        shutdown_trigger(config, dry_run),
        Box::new(event_sink(config)),
        config.poll_interval(),
    )
}

/// Run the monitor until SIGTERM or Ctrl+C.
pub async fn run(config: &Config, dry_run: bool) {
    if dry_run {
        warn!("Dry run: the shutdown command will be logged, not executed");
    }

    let stop = StopSignal::new();
    stop.spawn_listener();

    build_monitor(config, dry_run).run(stop.token()).await;
}

/// Connect once and read the configured device.
pub async fn query_status(config: &Config) -> Result<StatusSnapshot, ClientError> {
    let mut client = NutStatusClient::new(config.connection());
    let mut session = client.connect().await?;
    let snapshot = session.query(&config.nut_server.ups_name).await;
    if let Err(e) = session.close().await {
        warn!("Logout failed: {}", e);
    }
    snapshot
}

/// Connect once and read one variable of the configured device.
pub async fn query_variable(config: &Config, name: &str) -> Result<String, ClientError> {
    let mut client = NutStatusClient::new(config.connection());
    let mut session = client.connect().await?;
    let value = session.variable(&config.nut_server.ups_name, name).await;
    if let Err(e) = session.close().await {
        warn!("Logout failed: {}", e);
    }
    value
}
