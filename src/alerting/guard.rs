//! Lifecycle/navigation guard.
//!
//! Every route change, logout, emergency stop and shutdown forces the alert
//! sound coordinator back to Idle and silences the audio output. Each event is
//! swept twice: immediately, and again after `recheck_delay` to catch a sound
//! whose playback started late.

use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use super::sound::{AlertSoundCoordinator, ReleaseReason};
use crate::audio::AudioOutput;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    RouteChanged { to: String },
    LoggedOut,
    EmergencyStop,
    Shutdown,
}

impl LifecycleEvent {
    fn reason(&self) -> ReleaseReason {
        match self {
            LifecycleEvent::RouteChanged { to } => ReleaseReason::Navigation(to.clone()),
            LifecycleEvent::LoggedOut => ReleaseReason::Logout,
            LifecycleEvent::EmergencyStop => ReleaseReason::EmergencyStop,
            LifecycleEvent::Shutdown => ReleaseReason::Shutdown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: bool,
    pub suspended: bool,
    pub stopped: usize,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        !self.released && !self.suspended && self.stopped == 0
    }
}

pub struct LifecycleGuard {
    coordinator: Arc<AlertSoundCoordinator>,
    audio: Arc<dyn AudioOutput>,
    recheck_delay: Duration,
    current_route: Mutex<Option<String>>,
}

impl LifecycleGuard {
    pub fn new(
        coordinator: Arc<AlertSoundCoordinator>,
        audio: Arc<dyn AudioOutput>,
        recheck_delay: Duration,
    ) -> Self {
        Self {
            coordinator,
            audio,
            recheck_delay,
            current_route: Mutex::new(None),
        }
    }

    /// Force everything audible to a stopped state; no-op when already quiet
    pub fn sweep(&self, reason: &ReleaseReason) -> SweepReport {
        let released = self.coordinator.force_release(reason);

        let suspended = self.audio.is_running();
        if suspended {
            self.audio.suspend();
        }

        let stopped = if self.audio.active_handles() > 0 {
            self.audio.stop_all()
        } else {
            0
        };

        let report = SweepReport {
            released,
            suspended,
            stopped,
        };
        if !report.is_quiet() {
            info!("Lifecycle sweep ({}): {:?}", reason, report);
        }
        report
    }

    /// Sweep now and schedule the delayed second pass.
    ///
    /// Returns `None` for a route change to the route already shown.
    pub fn handle(self: &Arc<Self>, event: LifecycleEvent) -> Option<JoinHandle<SweepReport>> {
        if let LifecycleEvent::RouteChanged { to } = &event {
            let mut current = self.current_route.lock();
            if current.as_deref() == Some(to.as_str()) {
                debug!("Route {} unchanged, nothing to clean up", to);
                return None;
            }
            *current = Some(to.clone());
        }

        let reason = event.reason();
        self.sweep(&reason);

        let guard = Arc::clone(self);
        Some(tokio::spawn(async move {
            sleep(guard.recheck_delay).await;
            guard.sweep(&reason)
        }))
    }

    /// Consume lifecycle events until the sender side closes
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<LifecycleEvent>) {
        while let Some(event) = events.recv().await {
            debug!("Lifecycle event: {:?}", event);
            self.handle(event);
        }
        debug!("Lifecycle event channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::sound::SoundPhase;
    use crate::audio::testing::MockAudio;
    use crate::config::SoundSettings;
    use tokio::time;

    const PLAY: Duration = Duration::from_millis(500);
    const INTERVAL: Duration = Duration::from_secs(1);
    const RECHECK: Duration = Duration::from_millis(250);

    fn guard() -> (Arc<LifecycleGuard>, Arc<AlertSoundCoordinator>, Arc<MockAudio>) {
        let audio = Arc::new(MockAudio::new(PLAY));
        let settings = SoundSettings {
            repeat_count: 2,
            repeat_interval: INTERVAL,
            command: None,
            tone_duration: PLAY,
        };
        let coordinator = Arc::new(AlertSoundCoordinator::new(audio.clone(), &settings));
        let guard = Arc::new(LifecycleGuard::new(
            coordinator.clone(),
            audio.clone(),
            RECHECK,
        ));
        (guard, coordinator, audio)
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_on_quiet_system_makes_no_audio_calls() {
        let (guard, coordinator, audio) = guard();
        let report = guard.sweep(&ReleaseReason::Logout);
        assert!(report.is_quiet());
        assert_eq!(guard.sweep(&ReleaseReason::Logout), report);
        assert_eq!(coordinator.status(), (SoundPhase::Idle, None));
        assert_eq!(audio.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_mid_playing_cancels_remaining_repeats() {
        let (guard, coordinator, audio) = guard();
        let episode = coordinator.trigger("RQ-01").unwrap();
        time::sleep(PLAY + INTERVAL / 2).await;
        assert_eq!(audio.plays(), 1);

        let recheck = guard
            .handle(LifecycleEvent::RouteChanged {
                to: "/prices".into(),
            })
            .unwrap();
        assert_eq!(coordinator.status(), (SoundPhase::Idle, None));

        episode.await.unwrap();
        assert!(recheck.await.unwrap().is_quiet());
        assert_eq!(audio.plays(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_pass_catches_late_playback() {
        let (guard, coordinator, audio) = guard();
        let recheck = guard.handle(LifecycleEvent::LoggedOut).unwrap();

        // A sound from the previous page starts after the first sweep
        let late = coordinator.trigger("RQ-02").unwrap();
        tokio::task::yield_now().await;
        assert_eq!(audio.active_handles(), 1);

        let report = recheck.await.unwrap();
        assert!(report.released);
        assert_eq!(coordinator.status(), (SoundPhase::Idle, None));
        late.await.unwrap();
        assert_eq!(audio.plays(), 1);
        assert_eq!(audio.active_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stray_audio_handles_are_stopped() {
        let (guard, _coordinator, audio) = guard();
        let stray = tokio::spawn(audio.play());
        tokio::task::yield_now().await;

        let report = guard.sweep(&ReleaseReason::Navigation("/admin".into()));
        assert!(!report.released);
        assert!(report.suspended);
        stray.await.unwrap().unwrap();
        assert_eq!(audio.active_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_route_is_ignored() {
        let (guard, _coordinator, _audio) = guard();
        assert!(guard
            .handle(LifecycleEvent::RouteChanged { to: "/".into() })
            .is_some());
        assert!(guard
            .handle(LifecycleEvent::RouteChanged { to: "/".into() })
            .is_none());
        assert!(guard
            .handle(LifecycleEvent::RouteChanged {
                to: "/devices".into()
            })
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_consumes_events_until_closed() {
        let (guard, coordinator, _audio) = guard();
        let (tx, rx) = mpsc::channel(4);
        let runner = tokio::spawn(guard.clone().run(rx));

        let _episode = coordinator.try_acquire("RQ-03").unwrap();
        tx.send(LifecycleEvent::EmergencyStop).await.unwrap();
        drop(tx);
        runner.await.unwrap();

        assert_eq!(coordinator.status(), (SoundPhase::Idle, None));
    }
}
