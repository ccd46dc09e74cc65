pub mod player;

use futures_util::future::BoxFuture;
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::SoundSettings;

pub use player::{CommandPlayer, SilentPlayer};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to start audio player: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("audio player exited with status {0:?}")]
    Exit(Option<i32>),
    #[error("failed waiting for audio player: {0}")]
    Wait(#[source] std::io::Error),
}

/// Platform audio primitive used for alert sounds
///
/// `play` resolves when the sound finishes, is stopped, or fails; the
/// resolution is the completion/error callback of the underlying output.
pub trait AudioOutput: Send + Sync {
    fn play(&self) -> BoxFuture<'static, Result<(), AudioError>>;

    /// Whether the shared output is currently producing sound
    fn is_running(&self) -> bool;

    /// Number of live playback handles
    fn active_handles(&self) -> usize;

    /// Suspend the shared output; in-flight plays resolve
    fn suspend(&self);

    /// Stop and forget every live handle, returning how many were stopped
    fn stop_all(&self) -> usize;
}

/// Live playback handles, each stoppable through a oneshot
#[derive(Debug, Default)]
pub struct HandleRegistry {
    next_id: AtomicU64,
    handles: Mutex<HashMap<u64, oneshot::Sender<()>>>,
}

impl HandleRegistry {
    pub fn register(&self) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.handles.lock().insert(id, tx);
        (id, rx)
    }

    pub fn release(&self, id: u64) {
        self.handles.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn stop_all(&self) -> usize {
        let drained: Vec<_> = self.handles.lock().drain().collect();
        let count = drained.len();
        for (_, stop) in drained {
            // Receiver already gone means the play finished on its own
            let _ = stop.send(());
        }
        count
    }
}

/// Pick the audio implementation for this run
pub fn select_output(settings: &SoundSettings) -> Arc<dyn AudioOutput> {
    match &settings.command {
        Some((program, args)) => Arc::new(CommandPlayer::new(program.clone(), args.clone())),
        None => {
            warn!("ALERT_SOUND_COMMAND not set, alert sounds will only be logged");
            Arc::new(SilentPlayer::new(settings.tone_duration))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_stops_every_handle() {
        let registry = HandleRegistry::default();
        let (_, mut first) = registry.register();
        let (second_id, _second) = registry.register();
        registry.release(second_id);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.stop_all(), 1);
        assert_eq!(registry.len(), 0);
        assert!(first.try_recv().is_ok());
    }

    #[test]
    fn silent_player_is_the_fallback() {
        let settings = SoundSettings {
            repeat_count: 1,
            repeat_interval: tokio::time::Duration::from_millis(10),
            command: None,
            tone_duration: tokio::time::Duration::from_millis(10),
        };
        let output = select_output(&settings);
        assert!(!output.is_running());
        assert_eq!(output.active_handles(), 0);
    }
}
