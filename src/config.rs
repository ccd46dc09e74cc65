use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::str::FromStr;
use tokio::time::Duration;

use crate::utils::{parse_flag, split_command};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_REPEAT_COUNT: u32 = 3;
const DEFAULT_REPEAT_INTERVAL_MS: u64 = 1000;
const DEFAULT_TONE_MS: u64 = 800;
const DEFAULT_GUARD_RECHECK_MS: u64 = 250;
const DEFAULT_REALTIME_CHANNEL: &str = "device_measurements";
const DEFAULT_DB_MAX_RETRIES: usize = 3;
const DEFAULT_DB_RETRY_WAIT_SECS: u64 = 5;

/// Connection string plus retry policy for every database operation
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_retries: usize,
    pub retry_wait: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoundSettings {
    pub repeat_count: u32,
    pub repeat_interval: Duration,
    /// `None` selects the silent fallback player
    pub command: Option<(String, Vec<String>)>,
    pub tone_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// device code -> display name
    pub devices: BTreeMap<String, String>,
    pub user_id: String,
    pub database: DatabaseSettings,
    pub poll_interval: Duration,
    pub notifications_enabled: bool,
    pub sound: SoundSettings,
    pub guard_recheck_delay: Duration,
    pub realtime_enabled: bool,
    pub realtime_channel: String,
}

impl MonitorConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, Box<dyn std::error::Error>> {
        let database_url = vars
            .get("DATABASE_URL")
            .cloned()
            .ok_or("DATABASE_URL environment variable not set")?;
        let user_id = vars
            .get("MONITOR_USER_ID")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or("MONITOR_USER_ID environment variable not set")?;

        let devices = parse_devices(vars);
        info!("Total devices loaded: {}", devices.len());
        for (code, name) in &devices {
            debug!("Device: {} -> {}", code, name);
        }

        if devices.is_empty() {
            return Err("No devices configured. Please set MONITORED_DEVICES or DEVICE_<N>_CODE/DEVICE_<N>_NAME environment variables".into());
        }

        let repeat_count: u32 = parse_or(vars, "ALERT_REPEAT_COUNT", DEFAULT_REPEAT_COUNT)?;
        if repeat_count == 0 {
            return Err("ALERT_REPEAT_COUNT must be at least 1".into());
        }

        let command = match vars
            .get("ALERT_SOUND_COMMAND")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            Some(line) => Some(
                split_command(line)
                    .ok_or_else(|| format!("ALERT_SOUND_COMMAND has unbalanced quotes: {}", line))?,
            ),
            None => None,
        };

        let sound = SoundSettings {
            repeat_count,
            repeat_interval: Duration::from_millis(parse_or(
                vars,
                "ALERT_REPEAT_INTERVAL_MS",
                DEFAULT_REPEAT_INTERVAL_MS,
            )?),
            command,
            tone_duration: Duration::from_millis(parse_or(vars, "ALERT_TONE_MS", DEFAULT_TONE_MS)?),
        };

        let database = DatabaseSettings {
            url: database_url,
            max_retries: parse_or(vars, "DB_MAX_RETRIES", DEFAULT_DB_MAX_RETRIES)?.max(1),
            retry_wait: Duration::from_secs(parse_or(
                vars,
                "DB_RETRY_WAIT_SECS",
                DEFAULT_DB_RETRY_WAIT_SECS,
            )?),
        };

        let poll_secs: u64 = parse_or(vars, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;

        Ok(MonitorConfig {
            devices,
            user_id,
            database,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            notifications_enabled: flag_or(vars, "NOTIFICATIONS_ENABLED", true)?,
            sound,
            guard_recheck_delay: Duration::from_millis(parse_or(
                vars,
                "GUARD_RECHECK_DELAY_MS",
                DEFAULT_GUARD_RECHECK_MS,
            )?),
            realtime_enabled: flag_or(vars, "REALTIME_ENABLED", false)?,
            realtime_channel: vars
                .get("REALTIME_CHANNEL")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_REALTIME_CHANNEL.to_string()),
        })
    }

    pub fn device_codes(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    /// Display name of a configured device, or the code itself
    pub fn device_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.devices.get(code).map_or(code, String::as_str)
    }
}

fn parse_devices(vars: &HashMap<String, String>) -> BTreeMap<String, String> {
    let mut devices = BTreeMap::new();

    // Try MONITORED_DEVICES format first
    if let Some(list) = vars.get("MONITORED_DEVICES") {
        debug!("Found MONITORED_DEVICES: '{}'", list);
        for pair in list.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((code, name)) => {
                    let code = code.trim();
                    let name = name.trim();
                    if !code.is_empty() && !name.is_empty() {
                        devices.insert(code.to_string(), name.to_string());
                    }
                }
                // A bare code is accepted and named after itself
                None => {
                    devices.insert(pair.to_string(), pair.to_string());
                }
            }
        }
    } else {
        // Fallback to individual environment variables
        debug!("MONITORED_DEVICES not found, trying individual variables");
        for (key, value) in vars {
            if let Some(index) = key
                .strip_prefix("DEVICE_")
                .and_then(|s| s.strip_suffix("_CODE"))
            {
                let code = value.trim();
                if code.is_empty() {
                    continue;
                }
                let name = vars
                    .get(&format!("DEVICE_{}_NAME", index))
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| code.to_string());
                devices.insert(code.to_string(), name);
            }
        }
    }

    devices
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| format!("Invalid {} '{}': {}", key, raw, e)),
        _ => Ok(default),
    }
}

fn flag_or(vars: &HashMap<String, String>, key: &str, default: bool) -> Result<bool, String> {
    match vars.get(key) {
        Some(raw) if !raw.trim().is_empty() => {
            parse_flag(raw).ok_or_else(|| format!("Invalid {} '{}': expected true/false", key, raw))
        }
        _ => Ok(default),
    }
}
