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
    error::Error,
    fs::{self, File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, SystemTime},
};

use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;

use crate::status::{Status, StatusSink};

/// Writes a 16-bit WAV file. Each inner vector is one channel.
pub fn write_wav<S: hound::Sample + Copy + 'static>(
    path: PathBuf,
    samples: Vec<Vec<S>>,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    write_wav_with_bits(path, samples, sample_rate, 16)
}

pub fn write_wav_with_bits<S: hound::Sample + Copy + 'static>(
    path: PathBuf,
    samples: Vec<Vec<S>>,
    sample_rate: u32,
    bits_per_sample: u16,
) -> Result<(), Box<dyn Error>> {
    let tempwav = File::create(path)?;

    let sample_format = if std::any::TypeId::of::<S>() == std::any::TypeId::of::<f32>() {
        SampleFormat::Float
    } else if std::any::TypeId::of::<S>() == std::any::TypeId::of::<i32>()
        || std::any::TypeId::of::<S>() == std::any::TypeId::of::<i16>()
    {
        SampleFormat::Int
    } else {
        return Err("Unsupported sample format".into());
    };

    let num_channels = samples.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");
    let mut writer = WavWriter::new(
        tempwav,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample,
            sample_format,
        },
    )?;

    let frames = samples.iter().map(|c| c.len()).min().unwrap_or(0);
    for frame in 0..frames {
        for channel_samples in &samples {
            writer.write_sample(channel_samples[frame])?;
        }
    }
    writer.finalize()?;

    Ok(())
}

/// Writes a mono 16-bit WAV file followed by a `smpl` chunk holding one loop.
pub fn write_wav_with_loop(
    path: PathBuf,
    samples: Vec<i16>,
    sample_rate: u32,
    loop_start: u32,
    loop_end: u32,
) -> Result<(), Box<dyn Error>> {
    write_wav(path.clone(), vec![samples], sample_rate)?;

    let mut smpl = Vec::new();
    smpl.extend_from_slice(b"smpl");
    smpl.extend_from_slice(&60u32.to_le_bytes());
    // Manufacturer, product, period, unity note, pitch fraction, SMPTE format, SMPTE offset.
    for _ in 0..7 {
        smpl.extend_from_slice(&0u32.to_le_bytes());
    }
    // Loop count, sampler data.
    smpl.extend_from_slice(&1u32.to_le_bytes());
    smpl.extend_from_slice(&0u32.to_le_bytes());
    // Cue point id, type, start, end, fraction, play count.
    for value in [0u32, 0, loop_start, loop_end, 0, 0] {
        smpl.extend_from_slice(&value.to_le_bytes());
    }

    let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
    let len = file.seek(SeekFrom::End(0))?;
    file.write_all(&smpl)?;
    let riff_size = (len + smpl.len() as u64 - 8) as u32;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&riff_size.to_le_bytes())?;
    Ok(())
}

/// Writes a short mono sample whose first value identifies it.
pub fn write_tagged_sample(path: &Path, tag: i16) -> Result<(), Box<dyn Error>> {
    write_wav(path.to_path_buf(), vec![vec![tag, 0, 0, 0]], 44100)
}

/// Creates a preset directory under the given samples root.
pub fn preset_dir(root: &Path, name: &str) -> Result<PathBuf, Box<dyn Error>> {
    let dir = root.join(name);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Records every status it receives.
#[derive(Default)]
pub struct RecordingStatus {
    statuses: Mutex<Vec<Status>>,
}

impl RecordingStatus {
    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().clone()
    }
}

impl StatusSink for RecordingStatus {
    fn publish(&self, status: Status) {
        self.statuses.lock().push(status);
    }
}

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}
