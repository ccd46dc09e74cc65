//! Glue between fresh measurements and the alert sound.
//!
//! A sound is requested only on a rising edge: the first evaluation of a
//! (device, metric) pair that turns violated after being clear. A value that
//! stays out of range does not re-trigger on every poll.

use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::sound::{AlertSoundCoordinator, ReleaseReason};
use super::threshold::evaluate;
use super::toggles::{DeviceToggleStore, ToggleOutcome};
use crate::models::{AlertSignal, MeasurementSnapshot, NotificationSetting};

pub struct AlertMonitor {
    toggles: Arc<DeviceToggleStore>,
    coordinator: Arc<AlertSoundCoordinator>,
    notifications_enabled: bool,
    devices: HashSet<String>,
    /// (device, metric) -> violated at the previous evaluation
    previous: HashMap<(String, String), bool>,
}

impl AlertMonitor {
    pub fn new<I>(
        devices: I,
        toggles: Arc<DeviceToggleStore>,
        coordinator: Arc<AlertSoundCoordinator>,
        notifications_enabled: bool,
    ) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        if !notifications_enabled {
            info!("Notifications are globally disabled; violations will only be logged");
        }
        Self {
            toggles,
            coordinator,
            notifications_enabled,
            devices: devices.into_iter().collect(),
            previous: HashMap::new(),
        }
    }

    /// Evaluate every enabled setting against the latest snapshots
    ///
    /// Returns the signal of every evaluated pair, violated or not.
    pub fn process(
        &mut self,
        snapshots: &HashMap<String, MeasurementSnapshot>,
        settings: &[NotificationSetting],
    ) -> Vec<AlertSignal> {
        let mut signals = Vec::new();
        let mut seen = HashSet::new();

        for setting in settings {
            if !setting.enabled || !self.devices.contains(&setting.device_code) {
                continue;
            }
            let key = (setting.device_code.clone(), setting.metric.clone());
            let value = snapshots
                .get(&setting.device_code)
                .and_then(|snapshot| snapshot.value(&setting.metric));
            let signal = evaluate(value, setting);

            let was_violated = self.previous.insert(key.clone(), signal.violated) == Some(true);
            seen.insert(key);

            if signal.violated && !was_violated {
                self.on_violation(&signal, setting, value);
            }
            signals.push(signal);
        }

        // Pairs no longer evaluated start from "clear" if they come back
        self.previous.retain(|key, _| seen.contains(key));
        signals
    }

    fn on_violation(
        &self,
        signal: &AlertSignal,
        setting: &NotificationSetting,
        value: Option<f64>,
    ) {
        info!(
            "Threshold violated: user={} device={} metric={} value={:?} mode={} breach={:?}",
            setting.user_id,
            signal.device_code,
            signal.metric,
            value,
            signal.direction,
            signal.breach
        );

        if !self.notifications_enabled {
            return;
        }
        if self.toggles.is_emergency_stopped() {
            debug!("Emergency stop active, no sound for {}", signal.device_code);
            return;
        }
        if !self.toggles.is_device_enabled(&signal.device_code) {
            debug!("Notifications off for {}, no sound", signal.device_code);
            return;
        }
        self.coordinator.trigger(&signal.device_code);
    }

    pub fn enable_device(&self, device_code: &str) -> ToggleOutcome {
        self.toggles.enable_device(device_code)
    }

    /// Stop a device's notifications and silence its sound if it is playing
    pub fn stop_device(&self, device_code: &str) -> ToggleOutcome {
        let outcome = self.toggles.stop_device(device_code);
        self.coordinator.cancel_owner(
            device_code,
            &ReleaseReason::DeviceStopped(device_code.to_string()),
        );
        outcome
    }

    pub fn emergency_stop_all(&self) -> usize {
        let silenced = self.toggles.emergency_stop_all();
        self.coordinator.force_release(&ReleaseReason::EmergencyStop);
        silenced
    }

    pub fn resume_all(&self) -> usize {
        self.toggles.resume_all()
    }

    pub fn log_status(&self) {
        let toggles = self.toggles.snapshot();
        let (phase, owner) = self.coordinator.status();
        info!(
            "Status: sound={:?} owner={} emergency_stop={} violated={}",
            phase,
            owner.as_deref().unwrap_or("-"),
            toggles.emergency_stop,
            self.previous.values().filter(|v| **v).count()
        );
        let mut devices: Vec<_> = toggles.devices.iter().collect();
        devices.sort();
        for (code, enabled) in devices {
            info!("  {}: {}", code, if *enabled { "enabled" } else { "stopped" });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::sound::SoundPhase;
    use crate::alerting::toggles::testing::RecordingSink;
    use crate::audio::testing::MockAudio;
    use crate::config::SoundSettings;
    use crate::feedback::testing::RecordingFeedback;
    use crate::models::{DeviceToggleState, ThresholdMode};
    use time::OffsetDateTime;
    use tokio::time::Duration;

    fn monitor(notifications_enabled: bool) -> (AlertMonitor, Arc<AlertSoundCoordinator>) {
        let audio = Arc::new(MockAudio::new(Duration::from_millis(500)));
        let settings = SoundSettings {
            repeat_count: 1,
            repeat_interval: Duration::from_secs(1),
            command: None,
            tone_duration: Duration::from_millis(500),
        };
        let coordinator = Arc::new(AlertSoundCoordinator::new(audio, &settings));
        let devices = ["RQ-01", "RQ-02"].map(String::from);
        let toggles = Arc::new(DeviceToggleStore::new(
            devices.clone(),
            DeviceToggleState::default(),
            Arc::new(RecordingSink::default()),
            Arc::new(RecordingFeedback::default()),
        ));
        (
            AlertMonitor::new(devices, toggles, coordinator.clone(), notifications_enabled),
            coordinator,
        )
    }

    fn snapshot(device: &str, whiteness: f64) -> HashMap<String, MeasurementSnapshot> {
        HashMap::from([(
            device.to_string(),
            MeasurementSnapshot {
                device_code: device.to_string(),
                values: HashMap::from([("whiteness".to_string(), whiteness)]),
                captured_at: OffsetDateTime::UNIX_EPOCH,
            },
        )])
    }

    fn max_setting(device: &str) -> NotificationSetting {
        NotificationSetting {
            user_id: "user-1".to_string(),
            device_code: device.to_string(),
            metric: "whiteness".to_string(),
            enabled: true,
            mode: ThresholdMode::Max,
            threshold: Some(80.0),
            upper_threshold: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_only_on_rising_edge() {
        let (mut monitor, coordinator) = monitor(true);
        let settings = [max_setting("RQ-01")];

        let signals = monitor.process(&snapshot("RQ-01", 85.0), &settings);
        assert!(signals[0].violated);
        assert_eq!(coordinator.status().1.as_deref(), Some("RQ-01"));

        coordinator.force_release(&ReleaseReason::Shutdown);
        // Still violated: no new sound
        monitor.process(&snapshot("RQ-01", 90.0), &settings);
        assert_eq!(coordinator.status().0, SoundPhase::Idle);

        // Clears, then violates again
        monitor.process(&snapshot("RQ-01", 70.0), &settings);
        monitor.process(&snapshot("RQ-01", 81.0), &settings);
        assert_eq!(coordinator.status().1.as_deref(), Some("RQ-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_device_stays_silent() {
        let (mut monitor, coordinator) = monitor(true);
        monitor.stop_device("RQ-01");

        let signals = monitor.process(&snapshot("RQ-01", 85.0), &[max_setting("RQ-01")]);
        assert!(signals[0].violated);
        assert_eq!(coordinator.status().0, SoundPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn global_switch_suppresses_sound() {
        let (mut monitor, coordinator) = monitor(false);
        monitor.process(&snapshot("RQ-01", 85.0), &[max_setting("RQ-01")]);
        assert_eq!(coordinator.status().0, SoundPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_the_playing_device_silences_it() {
        let (mut monitor, coordinator) = monitor(true);
        monitor.process(&snapshot("RQ-01", 85.0), &[max_setting("RQ-01")]);
        assert_eq!(coordinator.status().0, SoundPhase::Playing);

        monitor.stop_device("RQ-02");
        assert_eq!(coordinator.status().0, SoundPhase::Playing);

        monitor.stop_device("RQ-01");
        assert_eq!(coordinator.status(), (SoundPhase::Idle, None));
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_stop_silences_and_blocks() {
        let (mut monitor, coordinator) = monitor(true);
        monitor.process(&snapshot("RQ-01", 85.0), &[max_setting("RQ-01")]);
        assert_eq!(monitor.emergency_stop_all(), 2);
        assert_eq!(coordinator.status(), (SoundPhase::Idle, None));
        assert_eq!(monitor.enable_device("RQ-02"), ToggleOutcome::Rejected);

        monitor.process(&snapshot("RQ-02", 99.0), &[max_setting("RQ-02")]);
        assert_eq!(coordinator.status().0, SoundPhase::Idle);

        assert_eq!(monitor.resume_all(), 2);
        monitor.process(&snapshot("RQ-02", 70.0), &[max_setting("RQ-02")]);
        monitor.process(&snapshot("RQ-02", 99.0), &[max_setting("RQ-02")]);
        assert_eq!(coordinator.status().1.as_deref(), Some("RQ-02"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_devices_and_missing_values_are_skipped() {
        let (mut monitor, coordinator) = monitor(true);
        let signals = monitor.process(&snapshot("RQ-99", 99.0), &[max_setting("RQ-99")]);
        assert!(signals.is_empty());

        // Configured device without a snapshot evaluates to "not violated"
        let signals = monitor.process(&HashMap::new(), &[max_setting("RQ-01")]);
        assert_eq!(signals.len(), 1);
        assert!(!signals[0].violated);
        assert_eq!(coordinator.status().0, SoundPhase::Idle);
    }
}
