use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Latest reading of one device: metric name -> value
#[derive(Debug, Clone)]
pub struct MeasurementSnapshot {
    pub device_code: String,
    pub values: HashMap<String, f64>,
    pub captured_at: OffsetDateTime,
}

impl MeasurementSnapshot {
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// Which side of the threshold a setting watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMode {
    Min,
    Max,
    Both,
}

impl FromStr for ThresholdMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "min" => Ok(ThresholdMode::Min),
            "max" => Ok(ThresholdMode::Max),
            "both" => Ok(ThresholdMode::Both),
            other => Err(format!("unknown threshold mode '{}'", other)),
        }
    }
}

impl fmt::Display for ThresholdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThresholdMode::Min => "min",
            ThresholdMode::Max => "max",
            ThresholdMode::Both => "both",
        };
        f.write_str(name)
    }
}

/// Per (user, device, metric) notification rule
///
/// `threshold` is the single bound for `Min`/`Max` and the lower bound for
/// `Both`; `upper_threshold` is only consulted in `Both` mode.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSetting {
    pub user_id: String,
    pub device_code: String,
    pub metric: String,
    pub enabled: bool,
    pub mode: ThresholdMode,
    pub threshold: Option<f64>,
    pub upper_threshold: Option<f64>,
}

/// Bound that a violating value crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breach {
    Below,
    Above,
}

/// Derived alert decision for one (device, metric); never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct AlertSignal {
    pub device_code: String,
    pub metric: String,
    pub violated: bool,
    pub direction: ThresholdMode,
    pub breach: Option<Breach>,
}

/// Persisted notification preferences for the monitored user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceToggleState {
    pub devices: HashMap<String, bool>,
    pub emergency_stop: bool,
}

/// A single preference change queued for best-effort persistence
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceUpdate {
    Device { device_code: String, enabled: bool },
    EmergencyStop { active: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_mode_parses_case_insensitively() {
        assert_eq!("MIN".parse::<ThresholdMode>(), Ok(ThresholdMode::Min));
        assert_eq!(" max ".parse::<ThresholdMode>(), Ok(ThresholdMode::Max));
        assert_eq!("Both".parse::<ThresholdMode>(), Ok(ThresholdMode::Both));
        assert!("between".parse::<ThresholdMode>().is_err());
    }

    #[test]
    fn snapshot_value_lookup() {
        let snapshot = MeasurementSnapshot {
            device_code: "D1".to_string(),
            values: HashMap::from([("whiteness".to_string(), 42.5)]),
            captured_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert_eq!(snapshot.value("whiteness"), Some(42.5));
        assert_eq!(snapshot.value("head_rice"), None);
    }
}
