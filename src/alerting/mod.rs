pub mod guard;
pub mod monitor;
pub mod sound;
pub mod threshold;
pub mod toggles;

pub use guard::{LifecycleEvent, LifecycleGuard};
pub use monitor::AlertMonitor;
pub use sound::AlertSoundCoordinator;
pub use toggles::DeviceToggleStore;
