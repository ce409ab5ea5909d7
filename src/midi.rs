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

//! MIDI input: raw bytes are decoded once into [`NoteEvent`]s at the transport boundary.

use std::error::Error;

use midly::live::LiveEvent;
use midly::MidiMessage;
use tokio::sync::mpsc::Sender;

use crate::config;

pub mod midir;

/// The controller number of the sustain pedal.
pub const SUSTAIN_CONTROLLER: u8 = 64;

/// A decoded note event. The MIDI channel is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ControlChange { controller: u8, value: u8 },
    ProgramChange { program: u8 },
}

impl NoteEvent {
    /// Decodes a raw MIDI message. Messages the instrument does not respond to yield None.
    pub fn parse(raw: &[u8]) -> Option<NoteEvent> {
        let LiveEvent::Midi { message, .. } = LiveEvent::parse(raw).ok()? else {
            return None;
        };

        match message {
            MidiMessage::NoteOn { key, vel } => Some(NoteEvent::NoteOn {
                note: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::NoteOff { key, .. } => Some(NoteEvent::NoteOff { note: key.as_int() }),
            MidiMessage::Controller { controller, value } => Some(NoteEvent::ControlChange {
                controller: controller.as_int(),
                value: value.as_int(),
            }),
            MidiMessage::ProgramChange { program } => Some(NoteEvent::ProgramChange {
                program: program.as_int(),
            }),
            _ => None,
        }
    }
}

/// Lists MIDI input ports known to midir.
pub fn list_devices() -> Result<Vec<String>, Box<dyn Error>> {
    midir::list()
}

/// Connects the configured inputs, forwarding decoded events to the sender. Device names
/// starting with "mock" connect nothing. Inputs stay connected until the result is dropped.
pub fn connect(
    config: &config::Midi,
    sender: Sender<NoteEvent>,
) -> Result<Vec<midir::Connection>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Vec::new());
    }
    midir::connect(device, sender)
}
