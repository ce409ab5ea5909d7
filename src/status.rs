// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Advisory status notifications for displays and indicators.
//!
//! Sinks are called from the background loader and must never block or fail.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{info, warn};

/// A status notification about the preset currently being loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// A preset load has started.
    Loading { preset: u8, name: String },
    /// A preset has been loaded and published.
    Loaded { preset: u8, name: String },
    /// The preset does not exist or resolved to zero samples.
    Empty { preset: u8 },
}

impl Status {
    /// Returns the four character code shown on a segment display.
    pub fn display_code(&self) -> String {
        match self {
            Status::Loading { preset, .. } => format!("L{:03}", preset),
            Status::Loaded { preset, .. } => format!("{:04}", preset),
            Status::Empty { preset } => format!("E{:03}", preset),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Loading { preset, name } => write!(f, "Preset loading: {} ({})", preset, name),
            Status::Loaded { preset, name } => write!(f, "Preset loaded: {} ({})", preset, name),
            Status::Empty { preset } => write!(f, "Preset empty: {}", preset),
        }
    }
}

/// Receives status notifications.
pub trait StatusSink: Send + Sync + 'static {
    fn publish(&self, status: Status);
}

/// Reports status through the log.
#[derive(Debug, Default)]
pub struct LogStatus {}

impl StatusSink for LogStatus {
    fn publish(&self, status: Status) {
        info!(code = status.display_code(), "{}", status);
    }
}

/// Forwards status to a channel. Notifications are dropped when the receiver lags.
pub struct ChannelStatus {
    sender: mpsc::Sender<Status>,
}

impl ChannelStatus {
    pub fn new(sender: mpsc::Sender<Status>) -> ChannelStatus {
        ChannelStatus { sender }
    }
}

impl StatusSink for ChannelStatus {
    fn publish(&self, status: Status) {
        if let Err(e) = self.sender.try_send(status) {
            warn!(err = e.to_string(), "Dropping status notification.");
        }
    }
}
