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

//! YAML configuration for the instrument.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::audio::mixer::{MixerSettings, DEFAULT_MAX_POLYPHONY};
use crate::audio::voice::DEFAULT_FADE_LENGTH;

mod audio;
mod error;
mod midi;

pub use self::audio::Audio;
pub use self::error::ConfigError;
pub use self::midi::{Midi, ALL_DEVICES};

/// The top level configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// The directory holding the "<n> <name>" preset directories.
    samples_dir: PathBuf,

    /// The preset loaded at startup (default: 0).
    initial_preset: Option<u8>,

    /// The maximum number of voices rendered at once (default: 80).
    max_polyphony: Option<usize>,

    /// Fade out length in frames (default: 30000).
    fade_length_frames: Option<usize>,

    /// The audio output configuration.
    #[serde(default)]
    audio: Audio,

    /// The MIDI input configuration.
    #[serde(default)]
    midi: Midi,
}

impl Config {
    /// Loads the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses the configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Config, ConfigError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_preset() > 127 {
            return Err(ConfigError::Invalid {
                field: "initial_preset",
                reason: format!("{} is not a MIDI program number", self.initial_preset()),
            });
        }
        if self.audio.sample_rate() == 0 {
            return Err(ConfigError::Invalid {
                field: "audio.sample_rate",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn samples_dir(&self) -> &Path {
        &self.samples_dir
    }

    pub fn initial_preset(&self) -> u8 {
        self.initial_preset.unwrap_or(0)
    }

    pub fn max_polyphony(&self) -> usize {
        self.max_polyphony.unwrap_or(DEFAULT_MAX_POLYPHONY).max(1)
    }

    pub fn fade_length_frames(&self) -> usize {
        self.fade_length_frames.unwrap_or(DEFAULT_FADE_LENGTH).max(1)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn midi(&self) -> &Midi {
        &self.midi
    }

    /// The mixer settings implied by this configuration.
    pub fn mixer_settings(&self) -> MixerSettings {
        MixerSettings {
            max_polyphony: self.max_polyphony(),
            fade_length: self.fade_length_frames(),
            block_frames: self.audio.block_frames(),
            sample_rate: self.audio.sample_rate(),
        }
    }
}
