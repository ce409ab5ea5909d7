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
use std::fmt;
use std::path::{Path, PathBuf};

use super::decoder::DecodedSample;

/// A decoded sample held in memory, shared between the bank that owns it and any voice
/// still playing it. Immutable once created.
pub struct SampleAsset {
    /// The file the sample was decoded from.
    path: PathBuf,
    /// Interleaved stereo frames.
    data: Vec<i16>,
    /// The native sample rate of the data.
    sample_rate: u32,
    /// The MIDI note this sample was recorded at.
    source_note: u8,
    /// The velocity this sample is assigned to.
    velocity: u8,
    /// Disambiguates round-robin variants at the same note and velocity.
    sequence: u32,
}

impl SampleAsset {
    /// Creates a new asset from decoded sample data.
    pub fn new(
        path: &Path,
        decoded: DecodedSample,
        source_note: u8,
        velocity: u8,
        sequence: u32,
    ) -> SampleAsset {
        SampleAsset {
            path: path.to_path_buf(),
            data: decoded.data,
            sample_rate: decoded.sample_rate,
            source_note,
            velocity,
            sequence,
        }
    }

    /// Creates an asset directly from stereo frames.
    pub fn from_frames(
        data: Vec<i16>,
        sample_rate: u32,
        source_note: u8,
        velocity: u8,
        sequence: u32,
    ) -> SampleAsset {
        SampleAsset {
            path: PathBuf::new(),
            data,
            sample_rate,
            source_note,
            velocity,
            sequence,
        }
    }

    /// The interleaved stereo data.
    pub fn data(&self) -> &[i16] {
        &self.data
    }

    /// Number of stereo frames.
    pub fn frames(&self) -> usize {
        self.data.len() / 2
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn source_note(&self) -> u8 {
        self.source_note
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The playback ratio needed to sound this asset at the given note.
    pub fn pitch_ratio(&self, note: u8) -> f64 {
        let semitones = f64::from(note) - f64::from(self.source_note);
        2f64.powf(semitones / 12.0)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<i16>()
    }
}

impl fmt::Debug for SampleAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleAsset")
            .field("path", &self.path)
            .field("frames", &self.frames())
            .field("source_note", &self.source_note)
            .field("velocity", &self.velocity)
            .field("sequence", &self.sequence)
            .finish()
    }
}
