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

use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};

pub mod keyboard;

/// Controller events that change what the instrument plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Moves to the previous preset, wrapping from 0 to 127.
    Prev,

    /// Moves to the next preset, wrapping from 127 to 0.
    Next,

    /// Loads the given preset.
    Preset(u8),
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}
