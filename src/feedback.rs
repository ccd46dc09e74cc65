/// User-facing feedback for explicit notification actions
use log::{info, warn};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackMessage {
    DeviceEnabled(String),
    DeviceStopped(String),
    EnableRejected(String),
    EmergencyStop { devices: usize },
    Resumed { devices: usize },
}

impl fmt::Display for FeedbackMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackMessage::DeviceEnabled(code) => {
                write!(f, "Notifications enabled for device {}", code)
            }
            FeedbackMessage::DeviceStopped(code) => {
                write!(f, "Notifications stopped for device {}", code)
            }
            FeedbackMessage::EnableRejected(code) => write!(
                f,
                "Cannot enable device {} while the emergency stop is active",
                code
            ),
            FeedbackMessage::EmergencyStop { devices } => {
                write!(f, "Emergency stop: all alerts silenced ({} devices)", devices)
            }
            FeedbackMessage::Resumed { devices } => {
                write!(f, "Notifications resumed for {} devices", devices)
            }
        }
    }
}

/// Fire-and-forget display primitive; nothing is returned to the caller
pub trait Feedback: Send + Sync {
    fn notify(&self, message: FeedbackMessage);
}

/// Reports feedback through the log, the only display a headless monitor has
#[derive(Debug, Default)]
pub struct LogFeedback;

impl Feedback for LogFeedback {
    fn notify(&self, message: FeedbackMessage) {
        match message {
            FeedbackMessage::EnableRejected(_) => warn!("{}", message),
            _ => info!("{}", message),
        }
    }
}
