/// Line-based control commands read from stdin
///
/// They stand in for the UI: route changes, logout and the notification
/// buttons.
use log::warn;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Route(String),
    Logout,
    Enable(String),
    Disable(String),
    StopAll,
    Resume,
    Status,
}

impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let command = parts.next().ok_or("empty command")?;
        let argument = parts.next();
        if parts.next().is_some() {
            return Err(format!("too many arguments for '{}'", command));
        }

        let required = |name: &str| {
            argument
                .map(str::to_string)
                .ok_or_else(|| format!("'{}' needs a {}", command, name))
        };

        match (command.to_ascii_lowercase().as_str(), argument) {
            ("route", _) => Ok(ControlCommand::Route(required("path")?)),
            ("enable", _) => Ok(ControlCommand::Enable(required("device code")?)),
            ("disable" | "stop", _) => Ok(ControlCommand::Disable(required("device code")?)),
            ("logout", None) => Ok(ControlCommand::Logout),
            ("stop-all", None) => Ok(ControlCommand::StopAll),
            ("resume", None) => Ok(ControlCommand::Resume),
            ("status", None) => Ok(ControlCommand::Status),
            ("logout" | "stop-all" | "resume" | "status", Some(_)) => {
                Err(format!("'{}' takes no argument", command))
            }
            _ => Err(format!("unknown command '{}'", command)),
        }
    }
}

/// Read control commands from stdin on a dedicated thread
///
/// A blocked stdin read cannot be canceled, so it stays off the runtime's
/// blocking pool; the process can exit while the thread still waits for a
/// line.
pub fn spawn_command_reader(
    commands: mpsc::Sender<ControlCommand>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("control-input".to_string())
        .spawn(move || forward_commands(io::stdin().lock(), &commands))
}

/// Forward parsed commands until EOF or until the receiver is dropped
pub fn forward_commands<R: BufRead>(input: R, commands: &mpsc::Sender<ControlCommand>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read control input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ControlCommand>() {
            Ok(command) => {
                if commands.blocking_send(command).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Ignoring control input '{}': {}", line.trim(), e),
        }
    }
}
