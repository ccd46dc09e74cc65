/// Database operations: measurements and settings in, toggle preferences in and out
use log::{error, warn};
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_postgres::Row;

use crate::config::DatabaseSettings;
use crate::database::connection::execute_with_retry;
use crate::models::{DeviceToggleState, MeasurementSnapshot, NotificationSetting, PreferenceUpdate};

/// Fetch the latest value of every metric for the given devices
///
/// One row per (device, metric) is read; the snapshot timestamp is the newest
/// row of the device. NULL values are left out of the snapshot.
///
/// # Arguments
/// * `settings` - Connection string and retry policy
/// * `device_codes` - Devices to look up
///
/// # Returns
/// HashMap mapping device code to its latest snapshot
pub async fn fetch_latest_snapshots(
    settings: &DatabaseSettings,
    device_codes: &[String],
) -> Result<HashMap<String, MeasurementSnapshot>, String> {
    let device_codes = device_codes.to_vec();

    execute_with_retry(settings, move |client| {
        let device_codes = device_codes.clone();
        async move {
            let rows = client
                .query(
                    "SELECT DISTINCT ON (device_code, metric) device_code, metric, value, measured_at
                     FROM device_measurements
                     WHERE device_code = ANY($1)
                     ORDER BY device_code, metric, measured_at DESC",
                    &[&device_codes],
                )
                .await?;
            snapshots_from_rows(&rows)
        }
    })
    .await
}

fn snapshots_from_rows(
    rows: &[Row],
) -> Result<HashMap<String, MeasurementSnapshot>, tokio_postgres::Error> {
    let mut snapshots: HashMap<String, MeasurementSnapshot> = HashMap::new();

    for row in rows {
        let device_code: String = row.try_get("device_code")?;
        let metric: String = row.try_get("metric")?;
        let value: Option<f64> = row.try_get("value")?;
        let measured_at: OffsetDateTime = row.try_get("measured_at")?;

        let snapshot = snapshots
            .entry(device_code.clone())
            .or_insert_with(|| MeasurementSnapshot {
                device_code,
                values: HashMap::new(),
                captured_at: measured_at,
            });
        if measured_at > snapshot.captured_at {
            snapshot.captured_at = measured_at;
        }
        if let Some(value) = value {
            snapshot.values.insert(metric, value);
        }
    }

    Ok(snapshots)
}

/// Fetch every notification setting of a user
///
/// Rows with an unknown mode are skipped with a warning.
pub async fn fetch_notification_settings(
    settings: &DatabaseSettings,
    user_id: &str,
) -> Result<Vec<NotificationSetting>, String> {
    let user_id = user_id.to_string();

    let rows = execute_with_retry(settings, move |client| {
        let user_id = user_id.clone();
        async move {
            client
                .query(
                    "SELECT user_id, device_code, metric, enabled, mode, threshold, upper_threshold
                     FROM notification_settings
                     WHERE user_id = $1",
                    &[&user_id],
                )
                .await
        }
    })
    .await?;

    let mut result = Vec::with_capacity(rows.len());
    for row in &rows {
        match setting_from_row(row) {
            Ok(Some(setting)) => result.push(setting),
            Ok(None) => {}
            Err(e) => error!("Unreadable notification setting row: {}", e),
        }
    }
    Ok(result)
}

fn setting_from_row(row: &Row) -> Result<Option<NotificationSetting>, tokio_postgres::Error> {
    let device_code: String = row.try_get("device_code")?;
    let metric: String = row.try_get("metric")?;
    let mode: String = row.try_get("mode")?;

    let mode = match mode.parse() {
        Ok(mode) => mode,
        Err(e) => {
            warn!("Skipping setting {}/{}: {}", device_code, metric, e);
            return Ok(None);
        }
    };

    Ok(Some(NotificationSetting {
        user_id: row.try_get("user_id")?,
        device_code,
        metric,
        enabled: row.try_get("enabled")?,
        mode,
        threshold: row.try_get("threshold")?,
        upper_threshold: row.try_get("upper_threshold")?,
    }))
}

/// Load the persisted per-device switches and emergency-stop flag of a user
pub async fn load_toggle_state(
    settings: &DatabaseSettings,
    user_id: &str,
) -> Result<DeviceToggleState, String> {
    let user_id = user_id.to_string();

    execute_with_retry(settings, move |client| {
        let user_id = user_id.clone();
        async move {
            let device_rows = client
                .query(
                    "SELECT device_code, enabled FROM device_notification_toggles WHERE user_id = $1",
                    &[&user_id],
                )
                .await?;
            let stop_row = client
                .query_opt(
                    "SELECT stopped FROM notification_emergency_stop WHERE user_id = $1",
                    &[&user_id],
                )
                .await?;

            let mut state = DeviceToggleState::default();
            for row in &device_rows {
                state
                    .devices
                    .insert(row.try_get("device_code")?, row.try_get("enabled")?);
            }
            if let Some(row) = stop_row {
                state.emergency_stop = row.try_get("stopped")?;
            }
            Ok::<_, tokio_postgres::Error>(state)
        }
    })
    .await
}

/// Upsert one preference change
pub async fn store_preference(
    settings: &DatabaseSettings,
    user_id: &str,
    update: &PreferenceUpdate,
) -> Result<(), String> {
    let user_id = user_id.to_string();
    let update = update.clone();

    execute_with_retry(settings, move |client| {
        let user_id = user_id.clone();
        let update = update.clone();
        async move {
            match update {
                PreferenceUpdate::Device {
                    device_code,
                    enabled,
                } => {
                    client
                        .execute(
                            "INSERT INTO device_notification_toggles(user_id, device_code, enabled, updated_at)
                             VALUES ($1, $2, $3, now())
                             ON CONFLICT (user_id, device_code)
                             DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = EXCLUDED.updated_at",
                            &[&user_id, &device_code, &enabled],
                        )
                        .await
                }
                PreferenceUpdate::EmergencyStop { active } => {
                    client
                        .execute(
                            "INSERT INTO notification_emergency_stop(user_id, stopped, updated_at)
                             VALUES ($1, $2, now())
                             ON CONFLICT (user_id)
                             DO UPDATE SET stopped = EXCLUDED.stopped, updated_at = EXCLUDED.updated_at",
                            &[&user_id, &active],
                        )
                        .await
                }
            }
        }
    })
    .await
    .map(|_| ())
}

/// Persist queued preference changes in order until the queue closes
///
/// Failures are logged and dropped; the in-memory store stays authoritative.
pub async fn run_preference_writer(
    mut updates: UnboundedReceiver<PreferenceUpdate>,
    settings: DatabaseSettings,
    user_id: String,
) {
    while let Some(update) = updates.recv().await {
        if let Err(e) = store_preference(&settings, &user_id, &update).await {
            error!("Failed to persist {:?}: {}", update, e);
        }
    }
}
