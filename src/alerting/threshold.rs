//! Threshold evaluation: measurement value + notification setting -> alert signal.
//!
//! Evaluation is fail-safe. Anything missing or non-finite means "no alert";
//! a false positive is worse than a missed beep.

use crate::models::{AlertSignal, Breach, NotificationSetting, ThresholdMode};

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Which bound, if any, `value` crosses under `setting`.
///
/// Comparisons are strict: a value equal to its threshold never violates.
/// In `Both` mode `threshold` is the lower bound and `upper_threshold` the
/// upper one; each side is checked only if its bound is present.
pub fn breach(value: Option<f64>, setting: &NotificationSetting) -> Option<Breach> {
    if !setting.enabled {
        return None;
    }
    let v = finite(value)?;
    let lower = finite(setting.threshold);

    match setting.mode {
        ThresholdMode::Min => lower.filter(|t| v < *t).map(|_| Breach::Below),
        ThresholdMode::Max => lower.filter(|t| v > *t).map(|_| Breach::Above),
        ThresholdMode::Both => {
            if lower.is_some_and(|t| v < t) {
                Some(Breach::Below)
            } else if finite(setting.upper_threshold).is_some_and(|t| v > t) {
                Some(Breach::Above)
            } else {
                None
            }
        }
    }
}

pub fn evaluate(value: Option<f64>, setting: &NotificationSetting) -> AlertSignal {
    let breach = breach(value, setting);
    AlertSignal {
        device_code: setting.device_code.clone(),
        metric: setting.metric.clone(),
        violated: breach.is_some(),
        direction: setting.mode,
        breach,
    }
}
