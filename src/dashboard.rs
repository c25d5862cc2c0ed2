//! View state of the dashboard and the handlers for each event source.

use std::collections::VecDeque;
use std::ops::ControlFlow;

use tracing::{error, info};

use crate::history::{ActivityLog, LogEntry, LogKind};
use crate::mirror::{DeviceState, RemoteStateMirror, WriteResult};
use crate::remote::Delivery;

/// User intents, independent of how they were entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TurnOn,
    TurnOff,
    ClearLog,
    DismissAlert,
    Quit,
}

pub struct Dashboard {
    mirror: RemoteStateMirror,
    history: ActivityLog,
    uptime_secs: u64,
    /// Write failures not yet acknowledged, oldest first.
    alerts: VecDeque<String>,
    project: String,
    backend: &'static str,
    key: String,
}

impl Dashboard {
    pub fn new(
        mirror: RemoteStateMirror,
        history: ActivityLog,
        project: String,
        backend: &'static str,
        key: String,
    ) -> Self {
        Self {
            mirror,
            history,
            uptime_secs: 0,
            alerts: VecDeque::new(),
            project,
            backend,
            key,
        }
    }

    pub fn handle_delivery(&mut self, delivery: Delivery) {
        if let Some(state) = self.mirror.on_delivery(delivery) {
            self.history
                .record_toggle(format!("LED turned {state}"), state.log_kind());
        }
    }

    pub fn handle_write_result(&mut self, done: WriteResult) {
        match done.result {
            Ok(()) => info!("Remote accepted LED {}", done.target),
            Err(e) => {
                error!("Error turning LED {}: {}", done.target, e);
                self.alerts
                    .push_back(format!("Failed to turn LED {}: {}", done.target, e));
            }
        }
    }

    /// Apply a user command. While an alert is open only
    /// [`Command::DismissAlert`] has any effect, and it closes one alert.
    pub fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        if !self.alerts.is_empty() {
            if command == Command::DismissAlert {
                self.alerts.pop_front();
            }
            return ControlFlow::Continue(());
        }

        match command {
            Command::TurnOn => self.mirror.set_state(DeviceState::On),
            Command::TurnOff => self.mirror.set_state(DeviceState::Off),
            Command::ClearLog => {
                info!("Clearing activity log");
                self.history.clear();
            }
            Command::DismissAlert => {}
            Command::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    pub fn tick(&mut self) {
        self.uptime_secs += 1;
    }

    /// Startup entry, added shortly after the dashboard comes up.
    pub fn greet(&mut self) {
        self.history
            .append(format!("Dashboard connected to {}", self.backend), LogKind::On);
    }

    pub fn state(&self) -> Option<&DeviceState> {
        self.mirror.state()
    }

    pub fn is_connected(&self) -> bool {
        self.mirror.is_connected()
    }

    pub fn toggle_count(&self) -> u64 {
        self.history.toggle_count()
    }

    pub fn uptime(&self) -> String {
        format_uptime(self.uptime_secs)
    }

    pub fn last_update(&self) -> String {
        self.mirror
            .last_update()
            .map(|t| t.format("%-I:%M:%S %p").to_string())
            .unwrap_or_else(|| "--:--:--".to_string())
    }

    pub fn entries(&self) -> &[LogEntry] {
        self.history.entries()
    }

    pub fn alert(&self) -> Option<&str> {
        self.alerts.front().map(String::as_str)
    }

    /// Alerts queued behind the one on screen.
    pub fn pending_alerts(&self) -> usize {
        self.alerts.len().saturating_sub(1)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn backend(&self) -> &str {
        self.backend
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

pub fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
