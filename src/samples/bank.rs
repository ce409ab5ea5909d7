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

//! The note x velocity sample lookup table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::asset::SampleAsset;
use super::definition::{db_to_gain, DEFAULT_VOLUME_DB};

/// Number of MIDI notes and velocities.
pub const GRID_SIZE: usize = 128;

/// The alternatives available for one note/velocity cell. Inherited cells share the list.
pub type AssetList = Arc<[Arc<SampleAsset>]>;

/// The currently published bank, swapped whole by the loader.
pub type BankHandle = Arc<ArcSwap<SampleBank>>;

/// Creates a handle holding an empty bank.
pub fn empty_handle() -> BankHandle {
    Arc::new(ArcSwap::from_pointee(SampleBank::empty()))
}

/// A fully resolved sample bank. Immutable once built.
pub struct SampleBank {
    /// Row-major by note, then velocity.
    cells: Vec<Option<AssetList>>,
    /// Linear gain applied to the mixed output.
    volume_gain: f32,
    /// Semitones added to every incoming note.
    transpose: i32,
    /// The number of assets loaded from files.
    asset_count: usize,
    /// The preset this bank was built from.
    name: String,
}

impl SampleBank {
    /// A bank with no samples, used before the first preset is loaded.
    pub fn empty() -> SampleBank {
        SampleBank {
            cells: vec![None; GRID_SIZE * GRID_SIZE],
            volume_gain: db_to_gain(DEFAULT_VOLUME_DB),
            transpose: 0,
            asset_count: 0,
            name: String::new(),
        }
    }

    /// Looks up the alternatives for a note and velocity. Out of range values resolve to nothing.
    pub fn lookup(&self, note: i32, velocity: i32) -> Option<&[Arc<SampleAsset>]> {
        let note = usize::try_from(note).ok().filter(|n| *n < GRID_SIZE)?;
        let velocity = usize::try_from(velocity).ok().filter(|v| *v < GRID_SIZE)?;
        self.cells[index(note, velocity)].as_deref()
    }

    pub fn volume_gain(&self) -> f32 {
        self.volume_gain
    }

    pub fn transpose(&self) -> i32 {
        self.transpose
    }

    pub fn asset_count(&self) -> usize {
        self.asset_count
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.asset_count == 0
    }

    /// Number of notes with at least one playable velocity.
    pub fn playable_notes(&self) -> usize {
        (0..GRID_SIZE)
            .filter(|note| (0..GRID_SIZE).any(|v| self.cells[index(*note, v)].is_some()))
            .count()
    }
}

impl fmt::Debug for SampleBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBank")
            .field("name", &self.name)
            .field("assets", &self.asset_count)
            .field("volume_gain", &self.volume_gain)
            .field("transpose", &self.transpose)
            .finish()
    }
}

fn index(note: usize, velocity: usize) -> usize {
    note * GRID_SIZE + velocity
}

/// Collects assets by exact note and velocity, then fills the rest of the grid.
#[derive(Default)]
pub struct BankBuilder {
    direct: BTreeMap<(u8, u8), Vec<Arc<SampleAsset>>>,
    volume_gain: Option<f32>,
    transpose: i32,
    name: String,
}

impl BankBuilder {
    pub fn new(name: &str) -> BankBuilder {
        BankBuilder {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn volume_gain(mut self, volume_gain: f32) -> BankBuilder {
        self.volume_gain = Some(volume_gain);
        self
    }

    pub fn transpose(mut self, transpose: i32) -> BankBuilder {
        self.transpose = transpose;
        self
    }

    /// Adds an asset at its own note and velocity.
    pub fn add(&mut self, asset: SampleAsset) {
        let key = (asset.source_note(), asset.velocity());
        self.direct.entry(key).or_default().push(Arc::new(asset));
    }

    pub fn asset_count(&self) -> usize {
        self.direct.values().map(Vec::len).sum()
    }

    /// Bytes of sample data held by the added assets.
    pub fn memory_size(&self) -> usize {
        self.direct
            .values()
            .flatten()
            .map(|asset| asset.memory_size())
            .sum()
    }

    /// Builds the bank. Returns None when no assets were added.
    pub fn build(self) -> Option<SampleBank> {
        let asset_count = self.asset_count();
        if asset_count == 0 {
            return None;
        }

        let mut cells: Vec<Option<AssetList>> = vec![None; GRID_SIZE * GRID_SIZE];
        for note in 0..GRID_SIZE {
            // Velocity fill: inherit the nearest lower populated velocity, and everything below
            // the first populated velocity inherits that one.
            let mut last: Option<AssetList> = None;
            for velocity in 0..GRID_SIZE {
                match self.direct.get(&(note as u8, velocity as u8)) {
                    Some(assets) => {
                        let list: AssetList = assets.iter().cloned().collect();
                        if last.is_none() {
                            for below in 0..velocity {
                                cells[index(note, below)] = Some(list.clone());
                            }
                        }
                        cells[index(note, velocity)] = Some(list.clone());
                        last = Some(list);
                    }
                    None => cells[index(note, velocity)] = last.clone(),
                }
            }

            // Note fill: an empty note borrows the note below it, velocity by velocity. The
            // note below has already been filled, so this scans left until a populated note.
            if last.is_none() && note > 0 {
                for velocity in 0..GRID_SIZE {
                    cells[index(note, velocity)] = cells[index(note - 1, velocity)].clone();
                }
            }
        }

        Some(SampleBank {
            cells,
            volume_gain: self
                .volume_gain
                .unwrap_or_else(|| db_to_gain(DEFAULT_VOLUME_DB)),
            transpose: self.transpose,
            asset_count,
            name: self.name,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn asset(note: u8, velocity: u8, sequence: u32) -> SampleAsset {
        SampleAsset::from_frames(vec![0; 4], 44100, note, velocity, sequence)
    }

    fn notes(bank: &SampleBank, note: i32, velocity: i32) -> Vec<(u8, u8, u32)> {
        bank.lookup(note, velocity)
            .unwrap_or_default()
            .iter()
            .map(|a| (a.source_note(), a.velocity(), a.sequence()))
            .collect()
    }

    #[test]
    fn test_empty_builder() {
        assert!(BankBuilder::new("empty").build().is_none());
        let bank = SampleBank::empty();
        assert!(bank.is_empty());
        assert!(bank.lookup(60, 100).is_none());
    }

    #[test]
    fn test_direct_cells_are_exact() {
        let mut builder = BankBuilder::new("direct");
        builder.add(asset(60, 40, 1));
        builder.add(asset(60, 40, 2));
        builder.add(asset(60, 100, 1));
        assert_eq!(3 * 8, builder.memory_size());
        let bank = builder.build().expect("bank");

        assert_eq!(vec![(60, 40, 1), (60, 40, 2)], notes(&bank, 60, 40));
        assert_eq!(vec![(60, 100, 1)], notes(&bank, 60, 100));
        assert_eq!(3, bank.asset_count());
    }

    #[test]
    fn test_velocity_fill() {
        let mut builder = BankBuilder::new("velocity");
        builder.add(asset(60, 40, 1));
        builder.add(asset(60, 100, 1));
        let bank = builder.build().expect("bank");

        // Below the first populated velocity inherits it.
        assert_eq!(vec![(60, 40, 1)], notes(&bank, 60, 0));
        assert_eq!(vec![(60, 40, 1)], notes(&bank, 60, 39));
        // Between layers inherits the nearest lower one.
        assert_eq!(vec![(60, 40, 1)], notes(&bank, 60, 99));
        // Above the top layer inherits it.
        assert_eq!(vec![(60, 100, 1)], notes(&bank, 60, 127));

        for velocity in 0..128 {
            assert!(bank.lookup(60, velocity).is_some());
        }
    }

    #[test]
    fn test_note_fill_borrows_from_below() {
        let mut builder = BankBuilder::new("implicit");
        builder.add(asset(60, 127, 1));
        builder.add(asset(64, 127, 1));
        let bank = builder.build().expect("bank");

        for velocity in [0, 64, 127] {
            assert_eq!(vec![(60, 127, 1)], notes(&bank, 60, velocity));
            assert_eq!(vec![(60, 127, 1)], notes(&bank, 61, velocity));
            assert_eq!(vec![(60, 127, 1)], notes(&bank, 62, velocity));
            assert_eq!(vec![(60, 127, 1)], notes(&bank, 63, velocity));
            assert_eq!(vec![(64, 127, 1)], notes(&bank, 64, velocity));
            assert_eq!(vec![(64, 127, 1)], notes(&bank, 127, velocity));
        }

        // Nothing is borrowed from above.
        assert!(bank.lookup(59, 127).is_none());
        assert!(bank.lookup(0, 127).is_none());
        assert_eq!(68, bank.playable_notes());
    }

    #[test]
    fn test_inherited_lists_are_shared() {
        let mut builder = BankBuilder::new("shared");
        builder.add(asset(10, 127, 1));
        let bank = builder.build().expect("bank");

        let direct = bank.lookup(10, 127).expect("direct");
        let borrowed = bank.lookup(20, 3).expect("borrowed");
        assert!(Arc::ptr_eq(&direct[0], &borrowed[0]));
    }

    #[test]
    fn test_out_of_range_lookup() {
        let mut builder = BankBuilder::new("range");
        builder.add(asset(0, 0, 1));
        let bank = builder.build().expect("bank");

        assert!(bank.lookup(-1, 0).is_none());
        assert!(bank.lookup(128, 0).is_none());
        assert!(bank.lookup(0, 128).is_none());
        assert!(bank.lookup(0, -5).is_none());
        assert!(bank.lookup(127, 127).is_some());
    }

    #[test]
    fn test_globals() {
        let mut builder = BankBuilder::new("globals").volume_gain(0.5).transpose(-3);
        builder.add(asset(0, 0, 1));
        let bank = builder.build().expect("bank");

        assert_eq!(0.5, bank.volume_gain());
        assert_eq!(-3, bank.transpose());
        assert_eq!("globals", bank.name());
    }
}
