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
use serde::Deserialize;

/// Connect to every input port except the loopback.
pub const ALL_DEVICES: &str = "all";

/// A YAML representation of the MIDI configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Midi {
    /// The MIDI input port, or "all".
    device: Option<String>,
}

impl Midi {
    /// New will create a new MIDI configuration.
    pub fn new(device: &str) -> Midi {
        Midi {
            device: Some(device.to_string()),
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(ALL_DEVICES)
    }
}
