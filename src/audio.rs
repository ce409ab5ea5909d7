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
use std::{error::Error, thread::JoinHandle};

use tracing::error;

use crate::config;
use crate::playsync::CancelHandle;

pub mod cpal;
pub mod mixer;
pub mod mock;
pub mod voice;

pub use mixer::{MasterGain, MixerSettings, QueueError, VoiceMixer, VoiceQueue};
pub use voice::{FadeEnvelope, FadeState, Voice, VoiceHandle};

/// A running output. The mixer is pulled from its own thread until stopped.
pub struct OutputStream {
    name: String,
    cancel: CancelHandle,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream {
    fn new(name: &str, cancel: CancelHandle, thread: JoinHandle<()>) -> OutputStream {
        OutputStream {
            name: name.to_string(),
            cancel,
            thread: Some(thread),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the output and waits for its thread to exit.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(device = self.name, "Output thread panicked.");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.thread.is_none()
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::Device>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Starts the configured output device pulling from the mixer. Device names starting with
/// "mock" render to nowhere.
pub fn start_output(
    config: &config::Audio,
    mixer: VoiceMixer,
) -> Result<OutputStream, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(mock::Device::get(device).start(
            mixer,
            config.sample_rate(),
            config.block_frames(),
        ));
    }

    cpal::Device::get(device)?.start(mixer, config.sample_rate(), config.block_frames())
}
