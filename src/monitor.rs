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

//! The monitor control loop.
//!
//! One [`MonitorLoop`] owns the server session, the battery tracker and the
//! threshold policy. Each cycle connects if needed, reads the device, updates
//! the tracker and asks the policy whether to shut down. No failure inside a
//! cycle ends the loop; it is reported and the next cycle starts on schedule.
//! Stop requests are only honoured between cycles.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::battery::{BatteryState, BatteryStateTracker, Transition};
use crate::client::{ClientError, StatusClient, StatusSession};
use crate::config::MonitorMode;
use crate::events::{Event, EventCode, EventSink};
use crate::policy::{Decision, PolicyInput, ShutdownReason, ThresholdPolicy};
use crate::shutdown::ShutdownTrigger;
use crate::snapshot::StatusSnapshot;

/// What a single cycle did, mostly for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No session could be opened; nothing was polled.
    ConnectFailed,
    /// The query failed; `reconnect` tells whether the session was dropped.
    QueryFailed { reconnect: bool },
    /// The device was polled and evaluated.
    Polled {
        state: BatteryState,
        decision: Decision,
    },
}

pub struct MonitorLoop<C: StatusClient> {
    client: C,
    session: Option<C::Session>,
    device: String,
    tracker: BatteryStateTracker,
    policy: ThresholdPolicy,
    trigger: Box<dyn ShutdownTrigger>,
    sink: Box<dyn EventSink>,
    poll_interval: Duration,
}

impl<C: StatusClient> std::fmt::Debug for MonitorLoop<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorLoop")
            .field("device", &self.device)
            .field("connected", &self.session.is_some())
            .field("tracker", &self.tracker)
            .field("policy", &self.policy)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl<C: StatusClient> MonitorLoop<C> {
    #[must_use]
    pub fn new(
        client: C,
        device: impl Into<String>,
        policy: ThresholdPolicy,
        trigger: Box<dyn ShutdownTrigger>,
        sink: Box<dyn EventSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            session: None,
            device: device.into(),
            tracker: BatteryStateTracker::new(),
            policy,
            trigger,
            sink,
            poll_interval,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &BatteryStateTracker {
        &self.tracker
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Poll until `token` is cancelled, then close the session.
    pub async fn run(mut self, token: CancellationToken) {
        self.report(Event::info(
            EventCode::Lifecycle,
            format!(
                "Service started: monitoring UPS '{}' on {} ({} threshold {}, every {}s)",
                self.device,
                self.client.server(),
                self.policy.mode(),
                self.policy.threshold(),
                self.poll_interval.as_secs()
            ),
        ));
        if !self.policy.is_armed() {
            self.report(Event::warning(
                EventCode::ConfigFailed,
                format!(
                    "Unknown monitor_type '{}', automatic shutdown is disabled",
                    self.policy.mode()
                ),
            ));
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let outcome = self.run_cycle(Utc::now()).await;
            debug!("Cycle finished: {:?}", outcome);
        }

        self.stop().await;
    }

    /// Run one poll cycle as of `now`.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        self.ensure_connected().await;
        let Some(session) = self.session.as_mut() else {
            return CycleOutcome::ConnectFailed;
        };

        match session.query(&self.device).await {
            Ok(snapshot) => self.observe(&snapshot, now),
            Err(err) => self.query_failed(&err),
        }
    }

    async fn ensure_connected(&mut self) {
        if self.session.is_none() {
            match self.client.connect().await {
                Ok(mut session) => {
                    self.report(Event::info(
                        EventCode::Lifecycle,
                        format!("Connected to NUT server at {}", self.client.server()),
                    ));
                    if self.check_device(&mut session).await {
                        self.session = Some(session);
                    }
                }
                Err(err) => {
                    self.report(Event::error(
                        EventCode::ConnectFailed,
                        format!("Failed to connect to NUT server: {err}"),
                    ));
                }
            }
        }
    }

    /// Warn early when the server does not serve the configured device.
    ///
    /// Returns false when the session died while listing devices.
    async fn check_device(&mut self, session: &mut C::Session) -> bool {
        match session.devices().await {
            Ok(devices) => {
                debug!("NUT server serves: {:?}", devices);
                if !devices.iter().any(|name| *name == self.device) {
                    self.report(Event::warning(
                        EventCode::MonitorError,
                        format!(
                            "UPS '{}' is not served by {} (available: {})",
                            self.device,
                            self.client.server(),
                            devices.join(", ")
                        ),
                    ));
                }
                true
            }
            Err(err) if err.is_transport() => {
                self.report(Event::error(
                    EventCode::MonitorError,
                    format!("Lost connection while listing UPS devices: {err}"),
                ));
                false
            }
            Err(err) => {
                self.report(Event::warning(
                    EventCode::MonitorError,
                    format!("Could not list UPS devices: {err}"),
                ));
                true
            }
        }
    }

    fn query_failed(&mut self, err: &ClientError) -> CycleOutcome {
        if err.is_transport() {
            self.session = None;
            self.report(Event::error(
                EventCode::MonitorError,
                format!("Error monitoring UPS '{}', reconnecting: {err}", self.device),
            ));
            CycleOutcome::QueryFailed { reconnect: true }
        } else {
            self.report(Event::warning(
                EventCode::MonitorError,
                format!("Error monitoring UPS '{}': {err}", self.device),
            ));
            CycleOutcome::QueryFailed { reconnect: false }
        }
    }

    fn observe(&mut self, snapshot: &StatusSnapshot, now: DateTime<Utc>) -> CycleOutcome {
        let status = snapshot.status().unwrap_or("unknown");
        debug!("UPS '{}' status {} ({} vars)", self.device, status, snapshot.len());

        match self.tracker.update(snapshot.is_on_battery(), now) {
            Transition::WentOnBattery { at } => self.report(Event::warning(
                EventCode::OnBattery,
                format!(
                    "UPS '{}' is on battery power since {} (status {status})",
                    self.device,
                    at.to_rfc3339()
                ),
            )),
            Transition::ReturnedOnline { on_battery_for } => self.report(Event::info(
                EventCode::BatteryTimer,
                format!(
                    "UPS '{}' back on line power after {}s on battery",
                    self.device,
                    on_battery_for.num_seconds()
                ),
            )),
            Transition::Unchanged => {}
        }

        let state = self.tracker.state();
        if state == BatteryState::Online {
            return CycleOutcome::Polled {
                state,
                decision: Decision::NoAction,
            };
        }

        let charge_percent = match snapshot.charge_percent() {
            Ok(charge) => Some(charge),
            Err(err) => {
                self.report(Event::warning(
                    EventCode::MonitorError,
                    format!("Ignoring charge reading from UPS '{}': {err}", self.device),
                ));
                None
            }
        };

        let elapsed = self.tracker.elapsed(now);
        match self.policy.mode() {
            MonitorMode::BatteryPercentage => {
                info!("On battery, charge {:?}%", charge_percent);
            }
            MonitorMode::TimeOnBattery => {
                info!(
                    "On battery for {}s of {}s allowed",
                    elapsed.num_seconds(),
                    self.policy.threshold()
                );
            }
            MonitorMode::Unknown(_) => {}
        }

        let decision = self.policy.evaluate(&PolicyInput {
            state,
            elapsed,
            shutdown_issued: self.tracker.shutdown_issued(),
            charge_percent,
        });
        if let Decision::Shutdown(reason) = decision {
            self.initiate_shutdown(reason);
        }

        CycleOutcome::Polled { state, decision }
    }

    fn initiate_shutdown(&mut self, reason: ShutdownReason) {
        // Marked before firing so a failing command is not retried this episode
        self.tracker.mark_shutdown_issued();
        self.report(Event::warning(
            EventCode::ShutdownInitiated,
            format!("Initiating shutdown: {reason}"),
        ));
        if let Err(err) = self.trigger.fire(reason) {
            self.report(Event::error(
                EventCode::ShutdownFailed,
                format!("Failed to run shutdown command: {err}"),
            ));
        }
    }

    async fn stop(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close().await {
                debug!("Logout failed: {}", err);
            }
        }
        self.report(Event::info(EventCode::Lifecycle, "Service stopped"));
    }

    fn report(&mut self, event: Event) {
        self.sink.report(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RecordingSink, Severity};
    use crate::snapshot::{CHARGE_KEY, STATUS_KEY};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Replies = Arc<Mutex<VecDeque<Result<StatusSnapshot, ClientError>>>>;
    type DeviceLists = Arc<Mutex<VecDeque<Result<Vec<String>, ClientError>>>>;

    /// Client whose connects and queries follow a script.
    #[derive(Default)]
    struct FakeClient {
        connect_failures: usize,
        connects: Arc<AtomicUsize>,
        replies: Replies,
        /// One entry per session; an empty script serves just "ups".
        device_lists: DeviceLists,
        closed: Arc<AtomicBool>,
        cancel_on_query: Option<CancellationToken>,
    }

    struct FakeSession {
        replies: Replies,
        device_lists: DeviceLists,
        closed: Arc<AtomicBool>,
        cancel_on_query: Option<CancellationToken>,
    }

    #[async_trait]
    impl StatusClient for FakeClient {
        type Session = FakeSession;

        fn server(&self) -> String {
            "fake:3493".to_string()
        }

        async fn connect(&mut self) -> Result<FakeSession, ClientError> {
            let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
            if attempt < self.connect_failures {
                return Err(ClientError::Connect("connection refused".to_string()));
            }
            Ok(FakeSession {
                replies: Arc::clone(&self.replies),
                device_lists: Arc::clone(&self.device_lists),
                closed: Arc::clone(&self.closed),
                cancel_on_query: self.cancel_on_query.clone(),
            })
        }
    }

    #[async_trait]
    impl StatusSession for FakeSession {
        async fn devices(&mut self) -> Result<Vec<String>, ClientError> {
            self.device_lists
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec!["ups".to_string()]))
        }

        async fn query(&mut self, _device: &str) -> Result<StatusSnapshot, ClientError> {
            if let Some(token) = &self.cancel_on_query {
                token.cancel();
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Protocol("script exhausted".to_string())))
        }

        async fn variable(&mut self, _device: &str, name: &str) -> Result<String, ClientError> {
            Err(ClientError::Protocol(format!("ERR VAR-NOT-SUPPORTED {name}")))
        }

        async fn close(self) -> Result<(), ClientError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingTrigger {
        fired: Arc<Mutex<Vec<ShutdownReason>>>,
    }

    impl ShutdownTrigger for RecordingTrigger {
        fn fire(&mut self, reason: ShutdownReason) -> io::Result<()> {
            self.fired.lock().unwrap().push(reason);
            Ok(())
        }
    }

    struct FailingTrigger;

    impl ShutdownTrigger for FailingTrigger {
        fn fire(&mut self, _reason: ShutdownReason) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no shell"))
        }
    }

    struct Harness {
        monitor: MonitorLoop<FakeClient>,
        sink: RecordingSink,
        trigger: RecordingTrigger,
        connects: Arc<AtomicUsize>,
        replies: Replies,
    }

    fn harness(mode: MonitorMode, threshold: u64, client: FakeClient) -> Harness {
        let sink = RecordingSink::default();
        let trigger = RecordingTrigger::default();
        let connects = Arc::clone(&client.connects);
        let replies = Arc::clone(&client.replies);
        let monitor = MonitorLoop::new(
            client,
            "ups",
            ThresholdPolicy::new(mode, threshold),
            Box::new(trigger.clone()),
            Box::new(sink.clone()),
            Duration::from_millis(10),
        );
        Harness {
            monitor,
            sink,
            trigger,
            connects,
            replies,
        }
    }

    impl Harness {
        fn push(&self, reply: Result<StatusSnapshot, ClientError>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn fired(&self) -> Vec<ShutdownReason> {
            self.trigger.fired.lock().unwrap().clone()
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn on_battery(charge: &str) -> StatusSnapshot {
        [(STATUS_KEY, "OB DISCHRG"), (CHARGE_KEY, charge)]
            .into_iter()
            .collect()
    }

    fn online() -> StatusSnapshot {
        [(STATUS_KEY, "OL CHRG"), (CHARGE_KEY, "100")]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_capacity_fires_once_at_threshold() {
        let mut h = harness(MonitorMode::BatteryPercentage, 20, FakeClient::default());
        let mut fired_at = Vec::new();

        for (t, charge) in [(0, "50"), (5, "30"), (10, "20"), (15, "15")] {
            h.push(Ok(on_battery(charge)));
            let outcome = h.monitor.run_cycle(at(t)).await;
            if let CycleOutcome::Polled {
                decision: Decision::Shutdown(_),
                ..
            } = outcome
            {
                fired_at.push(charge);
            }
        }

        assert_eq!(fired_at, vec!["20"]);
        assert_eq!(h.fired(), vec![ShutdownReason::BatteryCritical]);
        assert_eq!(h.sink.count(EventCode::ShutdownInitiated), 1);
        assert_eq!(h.sink.count(EventCode::OnBattery), 1);
    }

    #[tokio::test]
    async fn test_capacity_missing_charge_never_fires() {
        let mut h = harness(MonitorMode::BatteryPercentage, 99, FakeClient::default());
        let no_charge: StatusSnapshot = [(STATUS_KEY, "OB")].into_iter().collect();

        for t in 0..5 {
            h.push(Ok(no_charge.clone()));
            h.monitor.run_cycle(at(t * 5)).await;
        }

        assert!(h.fired().is_empty());
        assert_eq!(h.monitor.tracker().state(), BatteryState::OnBattery);
    }

    #[tokio::test]
    async fn test_capacity_garbage_charge_is_reported_not_fired() {
        let mut h = harness(MonitorMode::BatteryPercentage, 20, FakeClient::default());
        h.push(Ok(on_battery("unknown")));

        let outcome = h.monitor.run_cycle(at(0)).await;

        assert_eq!(
            outcome,
            CycleOutcome::Polled {
                state: BatteryState::OnBattery,
                decision: Decision::NoAction
            }
        );
        assert_eq!(h.sink.count(EventCode::MonitorError), 1);
        assert!(h.monitor.is_connected());
    }

    #[tokio::test]
    async fn test_duration_fires_at_threshold_not_before() {
        let mut h = harness(MonitorMode::TimeOnBattery, 60, FakeClient::default());
        let mut fired_at = Vec::new();

        for t in (0..=75).step_by(5) {
            h.push(Ok(on_battery("90")));
            let outcome = h.monitor.run_cycle(at(t)).await;
            if matches!(
                outcome,
                CycleOutcome::Polled {
                    decision: Decision::Shutdown(_),
                    ..
                }
            ) {
                fired_at.push(t);
            }
        }

        assert_eq!(fired_at, vec![60]);
        assert_eq!(h.fired(), vec![ShutdownReason::TimeOnBatteryExceeded]);
    }

    #[tokio::test]
    async fn test_recovery_ends_episode_and_rearms() {
        let mut h = harness(MonitorMode::TimeOnBattery, 10, FakeClient::default());

        h.push(Ok(on_battery("80")));
        h.monitor.run_cycle(at(0)).await;
        h.push(Ok(on_battery("80")));
        h.monitor.run_cycle(at(10)).await;
        assert_eq!(h.fired().len(), 1);

        h.push(Ok(online()));
        h.monitor.run_cycle(at(15)).await;
        assert!(h.monitor.tracker().battery_start_time().is_none());
        assert!(!h.monitor.tracker().shutdown_issued());
        assert_eq!(h.sink.count(EventCode::BatteryTimer), 1);

        // A fresh episode measures from its own start
        h.push(Ok(on_battery("80")));
        h.monitor.run_cycle(at(100)).await;
        h.push(Ok(on_battery("80")));
        h.monitor.run_cycle(at(105)).await;
        assert_eq!(h.fired().len(), 1);

        h.push(Ok(on_battery("80")));
        h.monitor.run_cycle(at(110)).await;
        assert_eq!(h.fired().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_mode_never_fires() {
        let mut h = harness(
            MonitorMode::Unknown("load".to_string()),
            0,
            FakeClient::default(),
        );

        for t in 0..10 {
            h.push(Ok(on_battery("0")));
            h.monitor.run_cycle(at(t * 600)).await;
        }

        assert!(h.fired().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_then_recovery() {
        let mut h = harness(
            MonitorMode::BatteryPercentage,
            20,
            FakeClient {
                connect_failures: 1,
                ..Default::default()
            },
        );
        h.push(Ok(online()));

        assert_eq!(h.monitor.run_cycle(at(0)).await, CycleOutcome::ConnectFailed);
        assert!(!h.monitor.is_connected());

        assert_eq!(
            h.monitor.run_cycle(at(5)).await,
            CycleOutcome::Polled {
                state: BatteryState::Online,
                decision: Decision::NoAction
            }
        );
        assert!(h.monitor.is_connected());
        assert_eq!(h.connects.load(Ordering::SeqCst), 2);
        assert_eq!(h.sink.count(EventCode::ConnectFailed), 1);
    }

    #[tokio::test]
    async fn test_device_missing_from_server_is_reported() {
        let client = FakeClient::default();
        client
            .device_lists
            .lock()
            .unwrap()
            .push_back(Ok(vec!["rack".to_string(), "desk".to_string()]));
        let mut h = harness(MonitorMode::BatteryPercentage, 20, client);
        h.push(Ok(online()));

        assert_eq!(
            h.monitor.run_cycle(at(0)).await,
            CycleOutcome::Polled {
                state: BatteryState::Online,
                decision: Decision::NoAction
            }
        );
        assert!(h.monitor.is_connected());

        let warnings: Vec<_> = h
            .sink
            .events()
            .into_iter()
            .filter(|e| e.code == EventCode::MonitorError.code())
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, Severity::Warning);
        assert!(warnings[0].message.contains("'ups' is not served"));
        assert!(warnings[0].message.contains("rack, desk"));
    }

    #[tokio::test]
    async fn test_lost_connection_while_listing_devices_discards_session() {
        let client = FakeClient::default();
        client
            .device_lists
            .lock()
            .unwrap()
            .push_back(Err(ClientError::Transport("connection reset".to_string())));
        let mut h = harness(MonitorMode::BatteryPercentage, 20, client);
        h.push(Ok(online()));

        assert_eq!(h.monitor.run_cycle(at(0)).await, CycleOutcome::ConnectFailed);
        assert!(!h.monitor.is_connected());
        let errors: Vec<_> = h
            .sink
            .events()
            .into_iter()
            .filter(|e| e.code == EventCode::MonitorError.code())
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Error);

        // The next cycle opens a fresh session and polls normally
        assert_eq!(
            h.monitor.run_cycle(at(5)).await,
            CycleOutcome::Polled {
                state: BatteryState::Online,
                decision: Decision::NoAction
            }
        );
        assert_eq!(h.connects.load(Ordering::SeqCst), 2);
        assert!(h.monitor.is_connected());
    }

    #[tokio::test]
    async fn test_on_battery_event_carries_start_time() {
        let mut h = harness(MonitorMode::TimeOnBattery, 60, FakeClient::default());
        h.push(Ok(on_battery("90")));

        h.monitor.run_cycle(at(0)).await;

        let events = h.sink.events();
        let event = events
            .iter()
            .find(|e| e.code == EventCode::OnBattery.code())
            .unwrap();
        assert!(event.message.contains(&at(0).to_rfc3339()));
    }

    #[tokio::test]
    async fn test_transport_error_forces_reconnect() {
        let mut h = harness(MonitorMode::BatteryPercentage, 20, FakeClient::default());
        h.push(Err(ClientError::Transport("connection reset".to_string())));
        h.push(Ok(online()));

        assert_eq!(
            h.monitor.run_cycle(at(0)).await,
            CycleOutcome::QueryFailed { reconnect: true }
        );
        assert!(!h.monitor.is_connected());

        h.monitor.run_cycle(at(5)).await;
        assert_eq!(h.connects.load(Ordering::SeqCst), 2);
        assert!(h.monitor.is_connected());
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_connection() {
        let mut h = harness(MonitorMode::BatteryPercentage, 20, FakeClient::default());
        h.push(Err(ClientError::Protocol("ERR DATA-STALE".to_string())));
        h.push(Ok(online()));

        assert_eq!(
            h.monitor.run_cycle(at(0)).await,
            CycleOutcome::QueryFailed { reconnect: false }
        );
        assert!(h.monitor.is_connected());

        h.monitor.run_cycle(at(5)).await;
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.count(EventCode::MonitorError), 1);
    }

    #[tokio::test]
    async fn test_failed_shutdown_command_is_reported_once() {
        let sink = RecordingSink::default();
        let client = FakeClient::default();
        let replies = Arc::clone(&client.replies);
        let mut monitor = MonitorLoop::new(
            client,
            "ups",
            ThresholdPolicy::new(MonitorMode::BatteryPercentage, 50),
            Box::new(FailingTrigger),
            Box::new(sink.clone()),
            Duration::from_millis(10),
        );

        for t in 0..3 {
            replies.lock().unwrap().push_back(Ok(on_battery("10")));
            monitor.run_cycle(at(t * 5)).await;
        }

        assert_eq!(sink.count(EventCode::ShutdownInitiated), 1);
        assert_eq!(sink.count(EventCode::ShutdownFailed), 1);
    }

    #[tokio::test]
    async fn test_run_exits_before_polling_when_already_cancelled() {
        let h = harness(MonitorMode::BatteryPercentage, 20, FakeClient::default());
        let token = CancellationToken::new();
        token.cancel();

        let connects = Arc::clone(&h.connects);
        h.monitor.run(token).await;

        assert_eq!(connects.load(Ordering::SeqCst), 0);
        let events = h.sink.events();
        assert_eq!(events.first().map(|e| e.code), Some(1000));
        assert_eq!(events.last().map(|e| e.message.as_str()), Some("Service stopped"));
    }

    #[tokio::test]
    async fn test_stop_completes_current_cycle_and_logs_out() {
        let token = CancellationToken::new();
        let closed = Arc::new(AtomicBool::new(false));
        let client = FakeClient {
            cancel_on_query: Some(token.clone()),
            closed: Arc::clone(&closed),
            ..Default::default()
        };
        let h = harness(MonitorMode::BatteryPercentage, 20, client);
        h.push(Ok(on_battery("5")));

        // Stop is requested mid-query; the cycle still finishes and fires
        h.monitor.run(token).await;

        assert_eq!(
            *h.trigger.fired.lock().unwrap(),
            vec![ShutdownReason::BatteryCritical]
        );
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unknown_mode_reported_at_start() {
        let h = harness(
            MonitorMode::Unknown("load".to_string()),
            5,
            FakeClient::default(),
        );
        let token = CancellationToken::new();
        token.cancel();

        let sink = h.sink.clone();
        h.monitor.run(token).await;

        assert_eq!(sink.count(EventCode::ConfigFailed), 1);
    }
}
