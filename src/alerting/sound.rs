//! Alert sound coordination: at most one alert sound sequence at a time.
//!
//! ```text
//!            try_acquire (lock free)
//!  Idle ──► Acquiring ──────────────► Playing ──► Cooldown ──► Idle
//!              │                       │  ▲
//!              │ lock held             │  │ repeat (token checked)
//!              ▼                       └──┘
//!            dropped
//!
//!  any state ── force_release / playback error ──► Canceled ──► Idle
//! ```
//!
//! A rejected request never touches the current episode. Each episode carries
//! an id so a task that wakes after a forced release cannot release a newer
//! episode's lock.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::audio::AudioOutput;
use crate::config::SoundSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundPhase {
    Idle,
    Acquiring,
    Playing,
    Cooldown,
    Canceled,
}

/// Why a forced release happened; only used for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseReason {
    Navigation(String),
    Logout,
    EmergencyStop,
    DeviceStopped(String),
    Shutdown,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseReason::Navigation(route) => write!(f, "navigation to {}", route),
            ReleaseReason::Logout => f.write_str("logout"),
            ReleaseReason::EmergencyStop => f.write_str("emergency stop"),
            ReleaseReason::DeviceStopped(code) => write!(f, "device {} stopped", code),
            ReleaseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Cooperative cancellation flag shared between the lock and its episode
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct AlertSoundLock {
    pub running: bool,
    pub owner_id: Option<String>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    Held { owner_id: String },
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::Held { owner_id } => write!(f, "alert sound held by {}", owner_id),
        }
    }
}

/// Proof of lock ownership for one sound sequence
#[derive(Debug, Clone)]
pub struct Episode {
    id: u64,
    owner_id: String,
    cancel: CancelToken,
}

impl Episode {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

#[derive(Debug)]
struct CoordinatorState {
    phase: SoundPhase,
    lock: AlertSoundLock,
    episode: u64,
}

impl CoordinatorState {
    fn transition(&mut self, to: SoundPhase) {
        debug!("Alert sound: {:?} -> {:?}", self.phase, to);
        self.phase = to;
    }

    /// Back to Idle with a fresh, uncanceled token
    fn reset(&mut self) {
        self.lock = AlertSoundLock::default();
        self.transition(SoundPhase::Idle);
    }
}

pub struct AlertSoundCoordinator {
    state: Mutex<CoordinatorState>,
    audio: Arc<dyn AudioOutput>,
    repeat_count: u32,
    repeat_interval: Duration,
}

impl AlertSoundCoordinator {
    pub fn new(audio: Arc<dyn AudioOutput>, settings: &SoundSettings) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                phase: SoundPhase::Idle,
                lock: AlertSoundLock::default(),
                episode: 0,
            }),
            audio,
            repeat_count: settings.repeat_count.max(1),
            repeat_interval: settings.repeat_interval,
        }
    }

    pub fn status(&self) -> (SoundPhase, Option<String>) {
        let state = self.state.lock();
        (state.phase, state.lock.owner_id.clone())
    }

    pub fn try_acquire(&self, owner_id: &str) -> Result<Episode, AcquireError> {
        let mut state = self.state.lock();
        if state.lock.running {
            let holder = state.lock.owner_id.clone().unwrap_or_default();
            debug!(
                "Alert sound request from {} dropped, held by {}",
                owner_id, holder
            );
            return Err(AcquireError::Held { owner_id: holder });
        }

        state.transition(SoundPhase::Acquiring);
        state.episode += 1;
        state.lock = AlertSoundLock {
            running: true,
            owner_id: Some(owner_id.to_string()),
            cancel: CancelToken::default(),
        };
        state.transition(SoundPhase::Playing);

        Ok(Episode {
            id: state.episode,
            owner_id: owner_id.to_string(),
            cancel: state.lock.cancel.clone(),
        })
    }

    /// Acquire for `owner_id` and play the sequence in the background
    pub fn trigger(self: &Arc<Self>, owner_id: &str) -> Option<JoinHandle<()>> {
        let episode = self.try_acquire(owner_id).ok()?;
        info!("Alert sound started for {}", owner_id);
        let coordinator = Arc::clone(self);
        Some(tokio::spawn(async move {
            coordinator.play_episode(episode).await;
        }))
    }

    pub async fn play_episode(&self, episode: Episode) {
        for round in 1..=self.repeat_count {
            if episode.cancel.is_canceled() {
                debug!(
                    "Alert sound for {} canceled before play {}",
                    episode.owner_id(),
                    round
                );
                return;
            }

            if let Err(e) = self.audio.play().await {
                warn!(
                    "Alert sound playback failed for {}: {}",
                    episode.owner_id(),
                    e
                );
                self.release_episode(&episode, SoundPhase::Canceled);
                return;
            }

            if round < self.repeat_count {
                if episode.cancel.is_canceled() {
                    return;
                }
                sleep(self.repeat_interval).await;
            }
        }

        if episode.cancel.is_canceled() {
            return;
        }
        self.release_episode(&episode, SoundPhase::Cooldown);
    }

    /// Release the lock if `episode` still owns it, passing through `via`
    fn release_episode(&self, episode: &Episode, via: SoundPhase) {
        let mut state = self.state.lock();
        if state.episode != episode.id || !state.lock.running {
            return;
        }
        if via == SoundPhase::Canceled {
            state.lock.cancel.cancel();
        }
        state.transition(via);
        state.reset();
        debug!("Alert sound lock released by {}", episode.owner_id());
    }

    /// Cancel whatever is playing and reset the lock; always wins.
    ///
    /// Returns false, without touching audio, when already idle.
    pub fn force_release(&self, reason: &ReleaseReason) -> bool {
        let released = release_locked(&mut self.state.lock());
        if released {
            self.stop_audio(reason);
        }
        released
    }

    /// Forced release limited to the given owner's sound
    pub fn cancel_owner(&self, owner_id: &str, reason: &ReleaseReason) -> bool {
        let released = {
            let mut state = self.state.lock();
            state.lock.owner_id.as_deref() == Some(owner_id) && release_locked(&mut state)
        };
        if released {
            self.stop_audio(reason);
        }
        released
    }

    fn stop_audio(&self, reason: &ReleaseReason) {
        let stopped = self.audio.stop_all();
        info!(
            "Alert sound force-released ({}), {} playback handles stopped",
            reason, stopped
        );
    }
}

/// Cancel and reset under an already held lock; false when idle
fn release_locked(state: &mut CoordinatorState) -> bool {
    if state.phase == SoundPhase::Idle && !state.lock.running {
        return false;
    }
    state.lock.cancel.cancel();
    state.transition(SoundPhase::Canceled);
    state.reset();
    true
}
