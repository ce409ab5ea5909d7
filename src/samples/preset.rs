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

//! Preset directories and building a bank from one.
//!
//! A samples root holds one directory per preset, named `"<n> <name>"`. A preset may carry a
//! `definition.txt` describing how file names map to notes; without one, files named
//! `<midinote>.wav` are used at full velocity.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::asset::SampleAsset;
use super::bank::{BankBuilder, SampleBank};
use super::decoder;
use super::definition::{Definition, SampleKey};
use crate::playsync::CancelHandle;

/// The name of the optional per-preset definition file.
pub const DEFINITION_FILE: &str = "definition.txt";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no directory found for preset {0}")]
    PresetNotFound(u8),

    #[error("preset {0} has no playable samples")]
    PresetEmpty(u8),

    #[error("load cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A preset directory found under the samples root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetDir {
    pub number: u8,
    pub name: String,
    pub path: PathBuf,
}

/// Lists every preset directory in the samples root, sorted by directory name.
pub fn list_presets(samples_dir: &Path) -> Result<Vec<PresetDir>, LoadError> {
    let mut presets = Vec::new();
    for entry in sorted_entries(samples_dir)? {
        if !entry.is_dir() {
            continue;
        }
        let Some(dir_name) = entry.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some((number, name)) = dir_name.split_once(' ') else {
            continue;
        };
        let Ok(number) = number.parse::<u8>() else {
            continue;
        };
        if number > 127 {
            continue;
        }
        presets.push(PresetDir {
            number,
            name: name.to_string(),
            path: entry.clone(),
        });
    }
    Ok(presets)
}

/// Finds the directory for the given preset: the first entry whose name starts with `"<n> "`.
pub fn find_preset(samples_dir: &Path, preset: u8) -> Result<PresetDir, LoadError> {
    let prefix = format!("{} ", preset);
    for entry in sorted_entries(samples_dir)? {
        let Some(dir_name) = entry.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if let Some(name) = dir_name.strip_prefix(&prefix) {
            return Ok(PresetDir {
                number: preset,
                name: name.to_string(),
                path: entry.clone(),
            });
        }
    }
    Err(LoadError::PresetNotFound(preset))
}

/// Finds and builds the given preset.
pub fn load_preset(
    samples_dir: &Path,
    preset: u8,
    cancel: &CancelHandle,
) -> Result<SampleBank, LoadError> {
    let dir = find_preset(samples_dir, preset)?;
    build_bank(&dir, cancel)
}

/// How often decode progress is logged.
const PROGRESS_INTERVAL: usize = 100;

/// Builds a bank from a preset directory. The cancel handle is checked before every file is
/// decoded.
pub fn build_bank(preset: &PresetDir, cancel: &CancelHandle) -> Result<SampleBank, LoadError> {
    build_bank_with_progress(preset, cancel, |decoded| {
        if decoded % PROGRESS_INTERVAL == 0 {
            debug!(preset = preset.number, decoded, "Decoding samples.");
        }
    })
}

/// Builds a bank, calling `on_decoded` with the running count after each file is decoded.
pub fn build_bank_with_progress<F>(
    preset: &PresetDir,
    cancel: &CancelHandle,
    mut on_decoded: F,
) -> Result<SampleBank, LoadError>
where
    F: FnMut(usize),
{
    let definition_path = preset.path.join(DEFINITION_FILE);
    let definition = if definition_path.is_file() {
        Some(Definition::parse(&fs::read_to_string(&definition_path)?))
    } else {
        None
    };

    let mut builder = BankBuilder::new(&preset.name);
    if let Some(definition) = &definition {
        builder = builder
            .volume_gain(definition.volume_gain())
            .transpose(definition.transpose());
    }

    let mut decoded_files = 0;
    for path in sorted_entries(&preset.path)? {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if file_name == DEFINITION_FILE || !path.is_file() {
            continue;
        }

        let keys = match &definition {
            Some(definition) => resolve_definition(definition, file_name),
            None => implicit_key(file_name).into_iter().collect(),
        };
        if keys.is_empty() {
            continue;
        }

        if cancel.is_cancelled() {
            debug!(preset = preset.number, "Preset load cancelled.");
            return Err(LoadError::Cancelled);
        }

        let decoded = match decoder::decode(&path) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(path = ?path, err = e.to_string(), "Unable to decode sample, skipping.");
                continue;
            }
        };
        decoded_files += 1;
        on_decoded(decoded_files);

        for key in keys {
            debug!(
                path = ?path,
                note = key.note,
                velocity = key.velocity,
                seq = key.sequence,
                "Adding sample."
            );
            builder.add(SampleAsset::new(
                &path,
                decoded.clone(),
                key.note,
                key.velocity,
                key.sequence,
            ));
        }
    }

    let assets = builder.asset_count();
    let memory_bytes = builder.memory_size();
    match builder.build() {
        Some(bank) => {
            info!(
                preset = preset.number,
                name = preset.name,
                assets,
                memory_bytes,
                notes = bank.playable_notes(),
                "Preset built."
            );
            Ok(bank)
        }
        None => Err(LoadError::PresetEmpty(preset.number)),
    }
}

/// Every key a file resolves to under the definition rules, in rule order.
fn resolve_definition(definition: &Definition, file_name: &str) -> Vec<SampleKey> {
    definition
        .rules()
        .iter()
        .filter_map(|rule| rule.resolve(file_name))
        .filter_map(|resolved| match resolved {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(file = file_name, err = e.to_string(), "Ignoring sample.");
                None
            }
        })
        .collect()
}

/// Without a definition file, `<midinote>.wav` plays at full velocity.
fn implicit_key(file_name: &str) -> Option<SampleKey> {
    let stem = file_name.strip_suffix(".wav")?;
    let note = stem.parse::<u8>().ok().filter(|note| *note <= 127)?;
    // Reject forms like "060" so each note has exactly one file name.
    if note.to_string() != stem {
        return None;
    }
    Some(SampleKey {
        note,
        velocity: 127,
        sequence: 1,
    })
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, io::Error>>()?;
    entries.sort();
    Ok(entries)
}
