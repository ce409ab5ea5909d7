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
use std::{
    fmt,
    sync::{
        atomic::{AtomicI16, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{info, span, Level};

use super::mixer::VoiceMixer;
use super::OutputStream;
use crate::playsync::CancelHandle;

/// A mock device. Pulls blocks from the mixer at the real-time cadence and discards them.
#[derive(Clone)]
pub struct Device {
    name: String,
    frames_rendered: Arc<AtomicU64>,
    peak: Arc<AtomicI16>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            frames_rendered: Arc::new(AtomicU64::new(0)),
            peak: Arc::new(AtomicI16::new(0)),
        }
    }

    /// Starts pulling audio from the mixer.
    pub fn start(
        &self,
        mut mixer: VoiceMixer,
        sample_rate: u32,
        block_frames: usize,
    ) -> OutputStream {
        let cancel = CancelHandle::new();
        let block_frames = block_frames.max(1);
        let period = Duration::from_secs_f64(block_frames as f64 / f64::from(sample_rate.max(1)));

        info!(device = self.name, block_frames, "Starting mock output.");
        let thread = {
            let cancel = cancel.clone();
            let frames_rendered = self.frames_rendered.clone();
            let peak = self.peak.clone();
            thread::spawn(move || {
                let span = span!(Level::INFO, "mock output");
                let _enter = span.enter();

                let mut block = vec![0i16; block_frames * 2];
                while !cancel.is_cancelled() {
                    mixer.render(&mut block);
                    let loudest = block.iter().map(|s| s.saturating_abs()).max().unwrap_or(0);
                    peak.fetch_max(loudest, Ordering::Relaxed);
                    frames_rendered.fetch_add(block_frames as u64, Ordering::Relaxed);
                    thread::sleep(period);
                }
            })
        };

        OutputStream::new(&self.name, cancel, thread)
    }

    /// Total frames pulled from the mixer.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// The loudest absolute sample seen so far.
    pub fn peak(&self) -> i16 {
        self.peak.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
