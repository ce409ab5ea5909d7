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
use std::error::Error;

use midir::{MidiInput, MidiInputConnection};
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, warn};

use super::NoteEvent;
use crate::config::ALL_DEVICES;

/// The ALSA loopback port, never connected when listening to all devices.
const MIDI_THROUGH: &str = "Midi Through";

/// An open input connection. Dropping it disconnects.
pub type Connection = MidiInputConnection<()>;

/// Lists input port names.
pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
    let input = MidiInput::new("samplebox input listing")?;
    let mut names = input
        .ports()
        .iter()
        .map(|port| input.port_name(port))
        .collect::<Result<Vec<String>, _>>()?;
    names.sort();
    Ok(names)
}

/// Chooses which ports to connect. "all" selects everything but the loopback, any other
/// name must match exactly one port.
pub fn select_ports(names: &[String], device: &str) -> Result<Vec<String>, Box<dyn Error>> {
    if device == ALL_DEVICES {
        return Ok(names
            .iter()
            .filter(|name| !name.contains(MIDI_THROUGH))
            .cloned()
            .collect());
    }

    let matches = names
        .iter()
        .filter(|name| name.contains(device))
        .cloned()
        .collect::<Vec<String>>();
    match matches.len() {
        0 => Err(format!("no device found with name {}", device).into()),
        1 => Ok(matches),
        _ => Err(format!(
            "found too many devices that match ({}), use a less ambiguous device name",
            matches.join(", ")
        )
        .into()),
    }
}

/// Connects to the selected ports.
pub fn connect(device: &str, sender: Sender<NoteEvent>) -> Result<Vec<Connection>, Box<dyn Error>> {
    let selected = select_ports(&list()?, device)?;
    if selected.is_empty() {
        warn!("No MIDI inputs found.");
    }

    let mut connections = Vec::with_capacity(selected.len());
    for name in selected {
        let input = MidiInput::new("samplebox input")?;
        let Some(port) = input
            .ports()
            .into_iter()
            .find(|port| input.port_name(port).is_ok_and(|port_name| port_name == name))
        else {
            warn!(device = name, "MIDI input went away before connecting.");
            continue;
        };

        let sender = sender.clone();
        let connection = input.connect(
            &port,
            "samplebox input watcher",
            move |_, raw_event, _| {
                let Some(event) = NoteEvent::parse(raw_event) else {
                    return;
                };
                debug!(event = format!("{:?}", event), "Received MIDI event.");
                if let Err(e) = sender.blocking_send(event) {
                    error!(
                        err = format!("{:?}", e),
                        "Error sending MIDI event to receiver."
                    );
                }
            },
            (),
        )?;
        info!(device = name, "Listening for MIDI events.");
        connections.push(connection);
    }

    Ok(connections)
}
