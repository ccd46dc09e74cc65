//! Per-device notification switches with a global emergency stop.
//!
//! The in-memory map is authoritative for the running process. Every change
//! is handed to a [`PreferenceSink`] for persistence, which is best-effort:
//! a failed write is logged by the sink and never rolls the change back.

use log::{info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::feedback::{Feedback, FeedbackMessage};
use crate::models::{DeviceToggleState, PreferenceUpdate};

pub trait PreferenceSink: Send + Sync {
    fn persist(&self, update: PreferenceUpdate);
}

/// Hands updates to the background writer task
impl PreferenceSink for UnboundedSender<PreferenceUpdate> {
    fn persist(&self, update: PreferenceUpdate) {
        if let Err(e) = self.send(update) {
            warn!("Preference writer is gone, not persisted: {:?}", e.0);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Changed,
    Unchanged,
    /// Enable refused because the emergency stop is active
    Rejected,
}

pub struct DeviceToggleStore {
    state: RwLock<DeviceToggleState>,
    sink: Arc<dyn PreferenceSink>,
    feedback: Arc<dyn Feedback>,
}

impl DeviceToggleStore {
    /// Build the store from persisted preferences; configured devices without
    /// a stored entry start enabled.
    pub fn new<I>(
        known_devices: I,
        persisted: DeviceToggleState,
        sink: Arc<dyn PreferenceSink>,
        feedback: Arc<dyn Feedback>,
    ) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = persisted;
        for code in known_devices {
            state.devices.entry(code).or_insert(true);
        }
        if state.emergency_stop {
            warn!("Emergency stop is active from a previous session; alerts stay silent until resumed");
        }
        Self {
            state: RwLock::new(state),
            sink,
            feedback,
        }
    }

    pub fn is_device_enabled(&self, device_code: &str) -> bool {
        let state = self.state.read();
        !state.emergency_stop && state.devices.get(device_code).copied().unwrap_or(true)
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.state.read().emergency_stop
    }

    pub fn snapshot(&self) -> DeviceToggleState {
        self.state.read().clone()
    }

    pub fn enable_device(&self, device_code: &str) -> ToggleOutcome {
        let outcome = {
            let mut state = self.state.write();
            if state.emergency_stop {
                ToggleOutcome::Rejected
            } else {
                set_device(&mut state, device_code, true)
            }
        };

        match outcome {
            ToggleOutcome::Rejected => {
                self.feedback
                    .notify(FeedbackMessage::EnableRejected(device_code.to_string()));
            }
            _ => {
                if outcome == ToggleOutcome::Changed {
                    info!("Notifications enabled for {}", device_code);
                    self.sink.persist(PreferenceUpdate::Device {
                        device_code: device_code.to_string(),
                        enabled: true,
                    });
                }
                self.feedback
                    .notify(FeedbackMessage::DeviceEnabled(device_code.to_string()));
            }
        }
        outcome
    }

    pub fn stop_device(&self, device_code: &str) -> ToggleOutcome {
        let outcome = set_device(&mut self.state.write(), device_code, false);
        if outcome == ToggleOutcome::Changed {
            info!("Notifications stopped for {}", device_code);
            self.sink.persist(PreferenceUpdate::Device {
                device_code: device_code.to_string(),
                enabled: false,
            });
        }
        self.feedback
            .notify(FeedbackMessage::DeviceStopped(device_code.to_string()));
        outcome
    }

    /// Disable every known device and raise the global stop flag in one step.
    ///
    /// Returns how many devices were enabled before the call.
    pub fn emergency_stop_all(&self) -> usize {
        let (silenced, flag_changed) = {
            let mut state = self.state.write();
            let silenced: Vec<String> = state
                .devices
                .iter_mut()
                .filter(|(_, enabled)| **enabled)
                .map(|(code, enabled)| {
                    *enabled = false;
                    code.clone()
                })
                .collect();
            let flag_changed = !state.emergency_stop;
            state.emergency_stop = true;
            (silenced, flag_changed)
        };

        warn!("EMERGENCY STOP: {} devices silenced", silenced.len());
        if flag_changed {
            self.sink
                .persist(PreferenceUpdate::EmergencyStop { active: true });
        }
        for device_code in &silenced {
            self.sink.persist(PreferenceUpdate::Device {
                device_code: device_code.clone(),
                enabled: false,
            });
        }
        self.feedback.notify(FeedbackMessage::EmergencyStop {
            devices: silenced.len(),
        });
        silenced.len()
    }

    /// Clear the emergency stop and re-enable every known device.
    ///
    /// Returns how many devices were switched back on.
    pub fn resume_all(&self) -> usize {
        let (resumed, flag_changed) = {
            let mut state = self.state.write();
            let resumed: Vec<String> = state
                .devices
                .iter_mut()
                .filter(|(_, enabled)| !**enabled)
                .map(|(code, enabled)| {
                    *enabled = true;
                    code.clone()
                })
                .collect();
            let flag_changed = state.emergency_stop;
            state.emergency_stop = false;
            (resumed, flag_changed)
        };

        info!("Notifications resumed for {} devices", resumed.len());
        if flag_changed {
            self.sink
                .persist(PreferenceUpdate::EmergencyStop { active: false });
        }
        for device_code in &resumed {
            self.sink.persist(PreferenceUpdate::Device {
                device_code: device_code.clone(),
                enabled: true,
            });
        }
        self.feedback.notify(FeedbackMessage::Resumed {
            devices: resumed.len(),
        });
        resumed.len()
    }
}

fn set_device(state: &mut DeviceToggleState, device_code: &str, enabled: bool) -> ToggleOutcome {
    match state.devices.insert(device_code.to_string(), enabled) {
        Some(previous) if previous == enabled => ToggleOutcome::Unchanged,
        // Unknown devices are implicitly enabled
        None if enabled => ToggleOutcome::Unchanged,
        _ => ToggleOutcome::Changed,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingSink {
        pub updates: Mutex<Vec<PreferenceUpdate>>,
    }

    impl PreferenceSink for RecordingSink {
        fn persist(&self, update: PreferenceUpdate) {
            self.updates.lock().push(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::feedback::testing::RecordingFeedback;
    use std::collections::HashMap;

    struct Fixture {
        store: DeviceToggleStore,
        sink: Arc<RecordingSink>,
        feedback: Arc<RecordingFeedback>,
    }

    fn fixture(persisted: DeviceToggleState) -> Fixture {
        let sink = Arc::new(RecordingSink::default());
        let feedback = Arc::new(RecordingFeedback::default());
        let store = DeviceToggleStore::new(
            ["A", "B", "C"].map(String::from),
            persisted,
            sink.clone(),
            feedback.clone(),
        );
        Fixture {
            store,
            sink,
            feedback,
        }
    }

    #[test]
    fn devices_default_to_enabled() {
        let f = fixture(DeviceToggleState::default());
        assert!(f.store.is_device_enabled("A"));
        assert!(f.store.is_device_enabled("never-configured"));
    }

    #[test]
    fn persisted_state_is_restored() {
        let persisted = DeviceToggleState {
            devices: HashMap::from([("B".to_string(), false)]),
            emergency_stop: false,
        };
        let f = fixture(persisted);
        assert!(f.store.is_device_enabled("A"));
        assert!(!f.store.is_device_enabled("B"));
    }

    #[test]
    fn most_recent_call_wins_and_is_idempotent() {
        let f = fixture(DeviceToggleState::default());
        assert_eq!(f.store.stop_device("A"), ToggleOutcome::Changed);
        assert_eq!(f.store.stop_device("A"), ToggleOutcome::Unchanged);
        assert!(!f.store.is_device_enabled("A"));

        assert_eq!(f.store.enable_device("A"), ToggleOutcome::Changed);
        assert_eq!(f.store.enable_device("A"), ToggleOutcome::Unchanged);
        assert!(f.store.is_device_enabled("A"));

        // Only real changes are persisted; every action gets feedback
        assert_eq!(
            *f.sink.updates.lock(),
            vec![
                PreferenceUpdate::Device {
                    device_code: "A".into(),
                    enabled: false
                },
                PreferenceUpdate::Device {
                    device_code: "A".into(),
                    enabled: true
                },
            ]
        );
        assert_eq!(f.feedback.messages.lock().len(), 4);
    }

    #[test]
    fn emergency_stop_overrides_and_blocks_enable() {
        let f = fixture(DeviceToggleState::default());
        assert_eq!(f.store.emergency_stop_all(), 3);
        for code in ["A", "B", "C"] {
            assert!(!f.store.is_device_enabled(code));
        }
        // Even devices never seen before report disabled
        assert!(!f.store.is_device_enabled("X"));

        assert_eq!(f.store.enable_device("X"), ToggleOutcome::Rejected);
        assert_eq!(f.store.enable_device("A"), ToggleOutcome::Rejected);
        assert!(!f.store.is_device_enabled("A"));
        assert_eq!(
            f.feedback.messages.lock().last(),
            Some(&FeedbackMessage::EnableRejected("A".into()))
        );

        let updates = f.sink.updates.lock().clone();
        assert_eq!(updates[0], PreferenceUpdate::EmergencyStop { active: true });
        assert_eq!(updates.len(), 4);
    }

    #[test]
    fn emergency_stop_after_enable_still_wins() {
        let f = fixture(DeviceToggleState::default());
        f.store.stop_device("B");
        f.store.enable_device("B");
        f.store.emergency_stop_all();
        assert!(!f.store.is_device_enabled("B"));
    }

    #[test]
    fn resume_clears_the_flag() {
        let f = fixture(DeviceToggleState::default());
        f.store.emergency_stop_all();
        assert_eq!(f.store.resume_all(), 3);
        assert!(!f.store.is_emergency_stopped());
        assert!(f.store.is_device_enabled("A"));

        assert_eq!(f.store.stop_device("C"), ToggleOutcome::Changed);
        assert_eq!(f.store.enable_device("C"), ToggleOutcome::Changed);
    }

    #[test]
    fn persisted_emergency_stop_survives_restart() {
        let f = fixture(DeviceToggleState {
            devices: HashMap::new(),
            emergency_stop: true,
        });
        assert!(f.store.is_emergency_stopped());
        assert!(!f.store.is_device_enabled("A"));
        assert_eq!(f.store.enable_device("A"), ToggleOutcome::Rejected);
    }

    #[test]
    fn closed_writer_does_not_block_state_change() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let store = DeviceToggleStore::new(
            ["A".to_string()],
            DeviceToggleState::default(),
            Arc::new(tx),
            Arc::new(RecordingFeedback::default()),
        );
        assert_eq!(store.stop_device("A"), ToggleOutcome::Changed);
        assert!(!store.is_device_enabled("A"));
    }
}
