/// Concrete alert-sound outputs: a native player process and a logging fallback
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use log::{debug, info, warn};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration};

use super::{AudioError, AudioOutput, HandleRegistry};

/// Plays the alert by running an external program (e.g. `aplay -q alert.wav`)
///
/// One process per play; stopping a handle kills its process.
#[derive(Debug)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
    handles: Arc<HandleRegistry>,
}

impl CommandPlayer {
    pub fn new(program: String, args: Vec<String>) -> Self {
        info!("Alert sound player: {} {}", program, args.join(" "));
        Self {
            program,
            args,
            handles: Arc::new(HandleRegistry::default()),
        }
    }
}

async fn run_to_completion(
    mut command: Command,
    stop: oneshot::Receiver<()>,
) -> Result<(), AudioError> {
    let mut child = command.spawn().map_err(AudioError::Spawn)?;

    let finished = tokio::select! {
        status = child.wait() => Some(status),
        _ = stop => None,
    };

    match finished {
        Some(status) => {
            let status = status.map_err(AudioError::Wait)?;
            if status.success() {
                Ok(())
            } else {
                Err(AudioError::Exit(status.code()))
            }
        }
        None => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill audio player: {}", e);
            }
            debug!("Audio player stopped");
            Ok(())
        }
    }
}

impl AudioOutput for CommandPlayer {
    fn play(&self) -> BoxFuture<'static, Result<(), AudioError>> {
        let (id, stop) = self.handles.register();
        let handles = Arc::clone(&self.handles);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        async move {
            let result = run_to_completion(command, stop).await;
            handles.release(id);
            result
        }
        .boxed()
    }

    fn is_running(&self) -> bool {
        self.handles.len() > 0
    }

    fn active_handles(&self) -> usize {
        self.handles.len()
    }

    fn suspend(&self) {
        // No mixer to pause; the output is free once its writers are gone
        let stopped = self.handles.stop_all();
        debug!("Suspended audio output ({} players killed)", stopped);
    }

    fn stop_all(&self) -> usize {
        self.handles.stop_all()
    }
}

/// Fallback output for hosts without a sound device: logs a timed tone
#[derive(Debug)]
pub struct SilentPlayer {
    tone_duration: Duration,
    handles: Arc<HandleRegistry>,
}

impl SilentPlayer {
    pub fn new(tone_duration: Duration) -> Self {
        Self {
            tone_duration,
            handles: Arc::new(HandleRegistry::default()),
        }
    }
}

impl AudioOutput for SilentPlayer {
    fn play(&self) -> BoxFuture<'static, Result<(), AudioError>> {
        let (id, stop) = self.handles.register();
        let handles = Arc::clone(&self.handles);
        let tone = self.tone_duration;

        async move {
            info!("*** ALERT TONE ({} ms) ***", tone.as_millis());
            tokio::select! {
                _ = sleep(tone) => {}
                _ = stop => debug!("Alert tone cut short"),
            }
            handles.release(id);
            Ok(())
        }
        .boxed()
    }

    fn is_running(&self) -> bool {
        self.handles.len() > 0
    }

    fn active_handles(&self) -> usize {
        self.handles.len()
    }

    fn suspend(&self) {
        self.handles.stop_all();
    }

    fn stop_all(&self) -> usize {
        self.handles.stop_all()
    }
}
