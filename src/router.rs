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

//! Routes note events to voices.
//!
//! The router runs on the control context. It reads the published bank, picks a sample for
//! each note-on, hands the new voice to the mixer and keeps a handle per voice so note-off
//! and the sustain pedal can start its fade later.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::audio::{QueueError, Voice, VoiceHandle, VoiceQueue};
use crate::midi::{NoteEvent, SUSTAIN_CONTROLLER};
use crate::samples::{BankHandle, PresetLoader, SampleAsset};

const NOTES: usize = 128;

/// The highest preset number.
pub const MAX_PRESET: u8 = 127;

/// Alternatives needed before the router avoids repeating the last sequence.
const ANTI_REPEAT_MIN: usize = 3;

/// Why a note-on produced no sound. Always absorbed by [`NoteRouter::handle`].
#[derive(Debug, thiserror::Error)]
pub enum RoutingMiss {
    #[error("note {0} is out of range after transposition")]
    OutOfRange(i32),

    #[error("no sample for note {note} at velocity {velocity}")]
    NoSample { note: u8, velocity: u8 },

    #[error("unable to start voice: {0}")]
    Queue(#[from] QueueError),
}

pub struct NoteRouter {
    bank: BankHandle,
    queue: VoiceQueue,
    loader: PresetLoader,
    /// Sounding voices by transposed note, for note-off.
    active: Vec<Vec<VoiceHandle>>,
    /// Voices released while the pedal was down.
    sustained: Vec<VoiceHandle>,
    sustain: bool,
    last_sequence: [Option<u32>; NOTES],
    preset: u8,
    rng: StdRng,
}

impl NoteRouter {
    pub fn new(bank: BankHandle, queue: VoiceQueue, loader: PresetLoader) -> NoteRouter {
        NoteRouter::with_rng(bank, queue, loader, StdRng::from_entropy())
    }

    pub fn with_rng(
        bank: BankHandle,
        queue: VoiceQueue,
        loader: PresetLoader,
        rng: StdRng,
    ) -> NoteRouter {
        NoteRouter {
            bank,
            queue,
            loader,
            active: vec![Vec::new(); NOTES],
            sustained: Vec::new(),
            sustain: false,
            last_sequence: [None; NOTES],
            preset: 0,
            rng,
        }
    }

    /// Handles a single event. Events that produce no sound are logged and dropped.
    pub fn handle(&mut self, event: NoteEvent) {
        match event {
            NoteEvent::NoteOn { note, velocity } => {
                if let Err(e) = self.note_on(note, velocity) {
                    debug!(note, velocity, err = e.to_string(), "Note not played.");
                }
            }
            NoteEvent::NoteOff { note } => self.note_off(note),
            NoteEvent::ControlChange { controller, value } => {
                if controller == SUSTAIN_CONTROLLER {
                    self.set_sustain(value >= 64);
                }
            }
            NoteEvent::ProgramChange { program } => self.program_change(program),
        }
    }

    /// Starts a voice for the note. A zero velocity is a note-off.
    pub fn note_on(&mut self, note: u8, velocity: u8) -> Result<(), RoutingMiss> {
        if velocity == 0 {
            self.note_off(note);
            return Ok(());
        }

        let bank = self.bank.load();
        let transposed = i32::from(note) + bank.transpose();
        let target = transposed_note(transposed).ok_or(RoutingMiss::OutOfRange(transposed))?;
        let assets = bank
            .lookup(i32::from(target), i32::from(velocity))
            .ok_or(RoutingMiss::NoSample {
                note: target,
                velocity,
            })?;

        let last = self.last_sequence[usize::from(target)];
        let asset = choose(&mut self.rng, assets, last).clone();
        let sequence = asset.sequence();

        let (voice, handle) = Voice::new(asset, target, self.queue.sample_rate());
        self.queue.push(voice)?;

        let voices = &mut self.active[usize::from(target)];
        voices.retain(VoiceHandle::is_alive);
        voices.push(handle);
        self.last_sequence[usize::from(target)] = Some(sequence);
        Ok(())
    }

    /// Releases every voice started by the note: held by the pedal, or faded out.
    pub fn note_off(&mut self, note: u8) {
        let transposed = i32::from(note) + self.bank.load().transpose();
        let Some(target) = transposed_note(transposed) else {
            return;
        };

        let voices = std::mem::take(&mut self.active[usize::from(target)]);
        if self.sustain {
            self.sustained.extend(voices.into_iter().filter(VoiceHandle::is_alive));
        } else {
            voices.iter().for_each(VoiceHandle::fade_out);
        }
    }

    pub fn set_sustain(&mut self, down: bool) {
        if self.sustain == down {
            return;
        }
        self.sustain = down;
        if !down {
            self.sustained.drain(..).for_each(|voice| voice.fade_out());
        }
    }

    /// Switches preset. The current bank keeps playing until the new one is published.
    pub fn program_change(&mut self, program: u8) {
        if program > MAX_PRESET {
            return;
        }
        info!(preset = program, "Changing preset.");
        self.preset = program;
        self.loader.request(program);
    }

    pub fn next_preset(&mut self) {
        let next = if self.preset >= MAX_PRESET {
            0
        } else {
            self.preset + 1
        };
        self.program_change(next);
    }

    pub fn prev_preset(&mut self) {
        let prev = if self.preset == 0 {
            MAX_PRESET
        } else {
            self.preset - 1
        };
        self.program_change(prev);
    }

    /// Frees voices the mixer has finished with and forgets their handles.
    pub fn collect_retired(&mut self) -> usize {
        let freed = self.queue.collect_retired();
        for voices in self.active.iter_mut() {
            voices.retain(VoiceHandle::is_alive);
        }
        self.sustained.retain(VoiceHandle::is_alive);
        freed
    }

    pub fn preset(&self) -> u8 {
        self.preset
    }

    pub fn is_sustained(&self) -> bool {
        self.sustain
    }

    /// Handles of the voices sounding for a transposed note.
    pub fn active_voices(&self, note: u8) -> &[VoiceHandle] {
        self.active
            .get(usize::from(note))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn sustained_voices(&self) -> &[VoiceHandle] {
        &self.sustained
    }

    /// The sequence id last played for a transposed note.
    pub fn last_sequence(&self, note: u8) -> Option<u32> {
        self.last_sequence.get(usize::from(note)).copied().flatten()
    }

    pub fn loader(&mut self) -> &mut PresetLoader {
        &mut self.loader
    }
}

fn transposed_note(note: i32) -> Option<u8> {
    u8::try_from(note).ok().filter(|note| usize::from(*note) < NOTES)
}

/// Picks an alternative uniformly. With enough alternatives, the last played sequence is
/// avoided unless every alternative shares it.
fn choose<'a, R: Rng>(
    rng: &mut R,
    assets: &'a [Arc<SampleAsset>],
    last: Option<u32>,
) -> &'a Arc<SampleAsset> {
    if let (true, Some(last)) = (assets.len() >= ANTI_REPEAT_MIN, last) {
        let fresh = assets.iter().filter(|a| a.sequence() != last).count();
        if fresh > 0 {
            let pick = rng.gen_range(0..fresh);
            if let Some(asset) = assets.iter().filter(|a| a.sequence() != last).nth(pick) {
                return asset;
            }
        }
    }
    &assets[rng.gen_range(0..assets.len())]
}
