mod alerting;
mod audio;
mod config;
mod control;
mod database;
mod feedback;
mod models;
mod utils;

use log::{debug, error, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};

use alerting::{
    AlertMonitor, AlertSoundCoordinator, DeviceToggleStore, LifecycleEvent, LifecycleGuard,
};
use config::MonitorConfig;
use control::{spawn_command_reader, ControlCommand};
use database::{
    fetch_latest_snapshots, fetch_notification_settings, listen_for_measurements,
    load_toggle_state, run_preference_writer,
};
use feedback::{Feedback, LogFeedback};
use models::DeviceToggleState;
use utils::{duration_to_seconds, format_datetime};

const STALE_SNAPSHOT_SECS: u64 = 3600; // 1 hour
const PREFERENCE_FLUSH_SECS: u64 = 10;

async fn poll_once(config: &MonitorConfig, monitor: &mut AlertMonitor) -> Result<(), String> {
    let settings = fetch_notification_settings(&config.database, &config.user_id).await?;
    let snapshots = fetch_latest_snapshots(&config.database, &config.device_codes()).await?;

    let now = OffsetDateTime::now_utc();
    for snapshot in snapshots.values() {
        if duration_to_seconds(now - snapshot.captured_at) > STALE_SNAPSHOT_SECS {
            warn!(
                "Latest reading of {} ({}) is stale: {}",
                config.device_name(&snapshot.device_code),
                snapshot.device_code,
                format_datetime(&snapshot.captured_at)
            );
        }
    }
    for (code, name) in &config.devices {
        if !snapshots.contains_key(code) {
            debug!("No measurements yet for {} ({})", name, code);
        }
    }

    let signals = monitor.process(&snapshots, &settings);
    info!(
        "Evaluated {} settings across {} devices, {} violated",
        signals.len(),
        snapshots.len(),
        signals.iter().filter(|s| s.violated).count()
    );
    Ok(())
}

/// Apply one control command; returns false when the session is over
async fn handle_command(
    command: ControlCommand,
    monitor: &AlertMonitor,
    lifecycle: &mpsc::Sender<LifecycleEvent>,
) -> bool {
    let event = match command {
        ControlCommand::Route(to) => Some(LifecycleEvent::RouteChanged { to }),
        ControlCommand::Logout => Some(LifecycleEvent::LoggedOut),
        ControlCommand::StopAll => {
            monitor.emergency_stop_all();
            Some(LifecycleEvent::EmergencyStop)
        }
        ControlCommand::Enable(code) => {
            monitor.enable_device(&code);
            None
        }
        ControlCommand::Disable(code) => {
            monitor.stop_device(&code);
            None
        }
        ControlCommand::Resume => {
            monitor.resume_all();
            None
        }
        ControlCommand::Status => {
            monitor.log_status();
            None
        }
    };

    let logged_out = event == Some(LifecycleEvent::LoggedOut);
    if let Some(event) = event {
        if lifecycle.send(event).await.is_err() {
            warn!("Lifecycle guard is not running");
        }
    }
    !logged_out
}

async fn main_loop(
    config: &MonitorConfig,
    mut monitor: AlertMonitor,
    lifecycle: mpsc::Sender<LifecycleEvent>,
    mut commands: mpsc::Receiver<ControlCommand>,
    mut wake: mpsc::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting rice-quality alert monitor");

    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = poll_once(config, &mut monitor).await {
                    error!("Poll failed: {}", e);
                }
            }
            Some(()) = wake.recv() => {
                debug!("Realtime update received, polling now");
                if let Err(e) = poll_once(config, &mut monitor).await {
                    error!("Poll failed: {}", e);
                }
                ticker.reset();
            }
            Some(command) = commands.recv() => {
                if !handle_command(command, &monitor, &lifecycle).await {
                    info!("Logged out, ending monitoring session");
                    return Ok(());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match MonitorConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };
    info!(
        "Monitoring {} devices for user {}",
        config.devices.len(),
        config.user_id
    );

    // Restore notification switches; the monitor runs on defaults if this fails
    let persisted = match load_toggle_state(&config.database, &config.user_id).await {
        Ok(state) => state,
        Err(e) => {
            warn!(
                "Could not load notification preferences, using defaults: {}",
                e
            );
            DeviceToggleState::default()
        }
    };

    let (preference_tx, preference_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(run_preference_writer(
        preference_rx,
        config.database.clone(),
        config.user_id.clone(),
    ));

    let feedback: Arc<dyn Feedback> = Arc::new(LogFeedback);
    let audio = audio::select_output(&config.sound);
    let toggles = Arc::new(DeviceToggleStore::new(
        config.device_codes(),
        persisted,
        Arc::new(preference_tx),
        feedback,
    ));
    let coordinator = Arc::new(AlertSoundCoordinator::new(audio.clone(), &config.sound));
    let guard = Arc::new(LifecycleGuard::new(
        coordinator.clone(),
        audio,
        config.guard_recheck_delay,
    ));
    let monitor = AlertMonitor::new(
        config.device_codes(),
        toggles,
        coordinator,
        config.notifications_enabled,
    );

    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(16);
    let guard_task = tokio::spawn(guard.clone().run(lifecycle_rx));

    // Left blocked on stdin at exit; returning from main ends the process
    let (command_tx, command_rx) = mpsc::channel(16);
    spawn_command_reader(command_tx)?;

    // Realtime wakeups are opt-in; without them only the poll timer runs
    let (wake_tx, wake_rx) = mpsc::channel(1);
    if config.realtime_enabled {
        let url = config.database.url.clone();
        let channel = config.realtime_channel.clone();
        tokio::spawn(async move {
            if let Err(e) = listen_for_measurements(&url, &channel, wake_tx).await {
                error!("Realtime updates unavailable: {}", e);
            }
        });
    } else {
        info!(
            "Realtime updates disabled, polling every {} s",
            config.poll_interval.as_secs()
        );
        drop(wake_tx);
    }

    // Run main loop or wait for shutdown signal
    tokio::select! {
        result = main_loop(&config, monitor, lifecycle_tx, command_rx, wake_rx) => {
            match result {
                Ok(_) => info!("Monitoring session completed"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        Ok(()) = tokio::signal::ctrl_c() => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    // The main loop owned the last lifecycle sender, so the guard drains and stops
    if let Err(e) = guard_task.await {
        error!("Lifecycle guard task failed: {}", e);
    }
    if let Some(recheck) = guard.handle(LifecycleEvent::Shutdown) {
        if let Err(e) = recheck.await {
            error!("Final lifecycle sweep failed: {}", e);
        }
    }

    // Give queued preference writes a chance to land
    if timeout(Duration::from_secs(PREFERENCE_FLUSH_SECS), writer)
        .await
        .is_err()
    {
        warn!("Pending preference writes abandoned at shutdown");
    }

    Ok(())
}
