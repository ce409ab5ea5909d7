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

//! Background preset loading.
//!
//! Each request builds a bank on its own thread. A new request cancels the load in flight
//! and waits for it to stop before starting, so at most one build runs at a time. Finished
//! banks are published with a single swap of the bank handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, span, warn, Level};

use super::bank::BankHandle;
use super::preset::{self, LoadError};
use crate::audio::MasterGain;
use crate::playsync::CancelHandle;
use crate::status::{Status, StatusSink};

struct LoadTask {
    preset: u8,
    cancel: CancelHandle,
    join: JoinHandle<()>,
}

pub struct PresetLoader {
    samples_dir: PathBuf,
    bank: BankHandle,
    gain: MasterGain,
    status: Arc<dyn StatusSink>,
    current: Option<LoadTask>,
}

impl PresetLoader {
    pub fn new(
        samples_dir: &Path,
        bank: BankHandle,
        gain: MasterGain,
        status: Arc<dyn StatusSink>,
    ) -> PresetLoader {
        PresetLoader {
            samples_dir: samples_dir.to_path_buf(),
            bank,
            gain,
            status,
            current: None,
        }
    }

    /// Starts loading the given preset, cancelling any load in progress.
    pub fn request(&mut self, preset: u8) {
        self.cancel_current();

        let samples_dir = self.samples_dir.clone();
        let bank = self.bank.clone();
        let gain = self.gain.clone();
        let status = self.status.clone();
        let cancel = CancelHandle::new();
        let task_cancel = cancel.clone();

        info!(preset, "Loading preset.");
        let join = thread::spawn(move || {
            let span = span!(Level::INFO, "preset loader", preset);
            let _enter = span.enter();
            load(&samples_dir, preset, &bank, &gain, status.as_ref(), &task_cancel);
        });

        self.current = Some(LoadTask {
            preset,
            cancel,
            join,
        });
    }

    /// Blocks until the current load, if any, has finished.
    pub fn wait(&mut self) {
        if let Some(task) = self.current.take() {
            if task.join.join().is_err() {
                error!(preset = task.preset, "Preset loader thread panicked.");
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|task| !task.join.is_finished())
    }

    /// The preset most recently requested.
    pub fn requested(&self) -> Option<u8> {
        self.current.as_ref().map(|task| task.preset)
    }

    fn cancel_current(&mut self) {
        if let Some(task) = self.current.as_ref() {
            if !task.join.is_finished() {
                debug!(preset = task.preset, "Cancelling preset load.");
            }
            task.cancel.cancel();
        }
        self.wait();
    }
}

impl Drop for PresetLoader {
    fn drop(&mut self) {
        self.cancel_current();
    }
}

fn load(
    samples_dir: &Path,
    preset: u8,
    bank: &BankHandle,
    gain: &MasterGain,
    status: &dyn StatusSink,
    cancel: &CancelHandle,
) {
    let result = preset::find_preset(samples_dir, preset).and_then(|dir| {
        status.publish(Status::Loading {
            preset,
            name: dir.name.clone(),
        });
        preset::build_bank(&dir, cancel)
    });

    match result {
        Ok(built) => {
            let name = built.name().to_string();
            let volume_gain = built.volume_gain();
            // Voices from the new bank must never render at the old gain.
            gain.set(volume_gain);
            bank.store(Arc::new(built));
            info!(name, "Preset published.");
            status.publish(Status::Loaded { preset, name });
        }
        Err(LoadError::Cancelled) => debug!("Preset load abandoned."),
        Err(e @ (LoadError::PresetEmpty(_) | LoadError::PresetNotFound(_))) => {
            warn!(err = e.to_string(), "Keeping the current preset.");
            status.publish(Status::Empty { preset });
        }
        Err(e) => {
            error!(err = e.to_string(), "Unable to load preset.");
            status.publish(Status::Empty { preset });
        }
    }
}
