pub mod connection;
pub mod operations;
pub mod realtime;

pub use operations::{
    fetch_latest_snapshots, fetch_notification_settings, load_toggle_state, run_preference_writer,
};
pub use realtime::listen_for_measurements;
