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

//! Core voice mixing, independent of any audio backend.
//!
//! The mixer runs on the audio thread. New voices arrive over a bounded channel and
//! finished voices leave over another, so the render path never locks, allocates or frees
//! sample memory.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::voice::{FadeEnvelope, Voice, DEFAULT_FADE_LENGTH};
use crate::samples::definition::{db_to_gain, DEFAULT_VOLUME_DB};

pub const DEFAULT_MAX_POLYPHONY: usize = 80;
pub const DEFAULT_BLOCK_FRAMES: usize = 512;

/// Number of voices that can be waiting for the mixer at once.
const QUEUE_CAPACITY: usize = 64;

/// The output gain, shared between the loader that sets it and the mixer that applies it.
#[derive(Debug, Clone)]
pub struct MasterGain {
    bits: Arc<AtomicU32>,
}

impl MasterGain {
    pub fn new(gain: f32) -> MasterGain {
        MasterGain {
            bits: Arc::new(AtomicU32::new(gain.to_bits())),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, gain: f32) {
        self.bits.store(gain.to_bits(), Ordering::Relaxed);
    }
}

impl Default for MasterGain {
    fn default() -> Self {
        MasterGain::new(db_to_gain(DEFAULT_VOLUME_DB))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MixerSettings {
    pub max_polyphony: usize,
    pub fade_length: usize,
    pub block_frames: usize,
    pub sample_rate: u32,
}

impl Default for MixerSettings {
    fn default() -> Self {
        MixerSettings {
            max_polyphony: DEFAULT_MAX_POLYPHONY,
            fade_length: DEFAULT_FADE_LENGTH,
            block_frames: DEFAULT_BLOCK_FRAMES,
            sample_rate: 44100,
        }
    }
}

/// Why a voice could not be handed to the mixer.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("voice queue is full")]
    Full,
    #[error("mixer has stopped")]
    Disconnected,
}

/// The control side of the mixer: sends new voices and reclaims finished ones.
pub struct VoiceQueue {
    sender: Sender<Voice>,
    retired: Receiver<Voice>,
    sample_rate: u32,
}

impl VoiceQueue {
    /// Hands a voice to the mixer without blocking.
    pub fn push(&self, voice: Voice) -> Result<(), QueueError> {
        self.sender.try_send(voice).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Disconnected(_) => QueueError::Disconnected,
        })
    }

    /// Frees every voice the mixer has finished with. Returns how many were freed.
    pub fn collect_retired(&self) -> usize {
        self.retired.try_iter().count()
    }

    /// The output sample rate voices are rendered at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

pub struct VoiceMixer {
    incoming: Receiver<Voice>,
    retired: Sender<Voice>,
    voices: Vec<Voice>,
    /// Finished voices waiting for room in the retired channel.
    overflow: Vec<Voice>,
    /// Voices held at once, rendering or waiting to be retired.
    capacity: usize,
    accumulator: Vec<f32>,
    envelope: FadeEnvelope,
    gain: MasterGain,
    max_polyphony: usize,
}

impl VoiceMixer {
    /// Creates a mixer and the queue used to feed it.
    pub fn new(settings: MixerSettings, gain: MasterGain) -> (VoiceMixer, VoiceQueue) {
        let (sender, incoming) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let max_polyphony = settings.max_polyphony.max(1);
        let capacity = max_polyphony + QUEUE_CAPACITY;
        let (retired, retired_rx) = crossbeam_channel::bounded(capacity);

        let mixer = VoiceMixer {
            incoming,
            retired,
            voices: Vec::with_capacity(capacity),
            overflow: Vec::with_capacity(capacity),
            capacity,
            accumulator: vec![0.0; settings.block_frames.max(1) * 2],
            envelope: FadeEnvelope::new(settings.fade_length),
            gain,
            max_polyphony,
        };
        let queue = VoiceQueue {
            sender,
            retired: retired_rx,
            sample_rate: settings.sample_rate,
        };
        (mixer, queue)
    }

    /// Renders interleaved stereo frames into the output buffer.
    pub fn render(&mut self, out: &mut [i16]) {
        self.flush_retired();
        self.receive();
        self.enforce_polyphony();

        let gain = self.gain.get();
        let block = self.accumulator.len();
        for chunk in out.chunks_mut(block) {
            let accumulator = &mut self.accumulator[..chunk.len()];
            accumulator.fill(0.0);

            let mut i = 0;
            while i < self.voices.len() {
                if self.voices[i].render(accumulator, &self.envelope) {
                    i += 1;
                } else {
                    retire(&self.retired, &mut self.overflow, self.voices.remove(i));
                }
            }

            for (sample, mixed) in chunk.iter_mut().zip(accumulator.iter()) {
                *sample = (mixed * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
        }
    }

    /// Number of voices currently being rendered.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Voices waiting to be retired, after the retired channel filled up.
    pub fn pending_retired(&self) -> usize {
        self.overflow.len()
    }

    fn receive(&mut self) {
        // Voices still waiting to be retired count against the capacity, so neither list
        // grows past its preallocation. New voices wait in the queue until there is room.
        while self.voices.len() + self.overflow.len() < self.capacity {
            match self.incoming.try_recv() {
                Ok(voice) => self.voices.push(voice),
                Err(_) => break,
            }
        }
    }

    /// Drops the oldest voices beyond the polyphony cap.
    fn enforce_polyphony(&mut self) {
        if self.voices.len() > self.max_polyphony {
            let excess = self.voices.len() - self.max_polyphony;
            for voice in self.voices.drain(..excess) {
                retire(&self.retired, &mut self.overflow, voice);
            }
        }
    }

    fn flush_retired(&mut self) {
        while let Some(voice) = self.overflow.pop() {
            match self.retired.try_send(voice) {
                Ok(()) => {}
                Err(TrySendError::Full(voice)) => {
                    self.overflow.push(voice);
                    break;
                }
                // The control side is gone, nothing is left to free the voice.
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

/// Sends a voice back to the control side, or parks it until the next block when the
/// control side has not collected recently.
fn retire(retired: &Sender<Voice>, overflow: &mut Vec<Voice>, voice: Voice) {
    if let Err(TrySendError::Full(voice)) = retired.try_send(voice) {
        overflow.push(voice);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::audio::voice::VoiceHandle;
    use crate::samples::SampleAsset;

    use super::*;

    fn settings(max_polyphony: usize, fade_length: usize, block_frames: usize) -> MixerSettings {
        MixerSettings {
            max_polyphony,
            fade_length,
            block_frames,
            sample_rate: 44100,
        }
    }

    fn constant(value: i16, frames: usize) -> Arc<SampleAsset> {
        Arc::new(SampleAsset::from_frames(
            vec![value; frames * 2],
            44100,
            60,
            127,
            1,
        ))
    }

    fn start(queue: &VoiceQueue, asset: &Arc<SampleAsset>) -> VoiceHandle {
        let (voice, handle) = Voice::new(asset.clone(), 60, queue.sample_rate());
        queue.push(voice).expect("queue");
        handle
    }

    #[test]
    fn test_silence() {
        let (mut mixer, _queue) = VoiceMixer::new(settings(8, 16, 32), MasterGain::new(0.5));
        let mut out = vec![123i16; 128];
        mixer.render(&mut out);
        assert!(out.iter().all(|s| *s == 0));
        assert_eq!(0, mixer.active_voices());
    }

    #[test]
    fn test_gain_applied() {
        let (mut mixer, queue) = VoiceMixer::new(settings(8, 16, 32), MasterGain::new(0.5));
        let asset = constant(1000, 1000);
        start(&queue, &asset);

        let mut out = vec![0i16; 64];
        mixer.render(&mut out);
        assert!(out.iter().all(|s| *s == 500));
    }

    #[test]
    fn test_overflow_clips() {
        let max_polyphony = 60;
        let (mut mixer, queue) =
            VoiceMixer::new(settings(max_polyphony, 16, 32), MasterGain::new(1.0));
        let loud = constant(i16::MAX, 1000);
        let quiet = constant(i16::MIN, 1000);
        for _ in 0..max_polyphony {
            start(&queue, &loud);
        }

        let mut out = vec![0i16; 256];
        mixer.render(&mut out);
        assert_eq!(max_polyphony, mixer.active_voices());
        assert!(out.iter().all(|s| *s == i16::MAX));

        let (mut mixer, queue) =
            VoiceMixer::new(settings(max_polyphony, 16, 32), MasterGain::new(1.0));
        for _ in 0..max_polyphony {
            start(&queue, &quiet);
        }
        mixer.render(&mut out);
        assert!(out.iter().all(|s| *s == i16::MIN));
    }

    #[test]
    fn test_polyphony_drops_oldest() {
        let (mut mixer, queue) = VoiceMixer::new(settings(4, 16, 32), MasterGain::new(1.0));
        let asset = constant(1, 1000);
        let handles: Vec<VoiceHandle> = (0..6).map(|_| start(&queue, &asset)).collect();

        let mut out = vec![0i16; 64];
        mixer.render(&mut out);
        assert_eq!(4, mixer.active_voices());
        assert!(out.iter().all(|s| *s == 4));

        assert_eq!(2, queue.collect_retired());
        assert!(!handles[0].is_alive());
        assert!(!handles[1].is_alive());
        assert!(handles[2..].iter().all(VoiceHandle::is_alive));
    }

    #[test]
    fn test_finished_voices_are_retired() {
        let (mut mixer, queue) = VoiceMixer::new(settings(4, 16, 32), MasterGain::new(1.0));
        let handle = start(&queue, &constant(100, 10));

        let mut out = vec![0i16; 64];
        mixer.render(&mut out);
        assert_eq!(0, mixer.active_voices());
        // Nine frames play before the voice runs out.
        assert_eq!(100, out[16]);
        assert_eq!(0, out[18]);

        assert!(handle.is_alive());
        assert_eq!(1, queue.collect_retired());
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_fade_removes_voice() {
        let fade_length = 100;
        let (mut mixer, queue) =
            VoiceMixer::new(settings(4, fade_length, 32), MasterGain::new(1.0));
        let handle = start(&queue, &constant(10000, 100_000));

        let mut out = vec![0i16; 64];
        mixer.render(&mut out);
        assert_eq!(1, mixer.active_voices());

        handle.fade_out();
        let mut frames_faded = 0;
        while mixer.active_voices() > 0 {
            mixer.render(&mut out);
            frames_faded += out.len() / 2;
            assert!(frames_faded <= fade_length + out.len() / 2);
        }

        // The tail of the last block is silent.
        assert_eq!(0, *out.last().expect("samples"));
        assert_eq!(1, queue.collect_retired());
    }

    #[test]
    fn test_large_output_is_chunked() {
        let (mut mixer, queue) = VoiceMixer::new(settings(4, 16, 8), MasterGain::new(1.0));
        start(&queue, &constant(7, 1000));

        let mut out = vec![0i16; 200];
        mixer.render(&mut out);
        assert!(out.iter().all(|s| *s == 7));
    }

    #[test]
    fn test_uncollected_voices_are_never_freed_by_the_mixer() {
        let (mut mixer, queue) = VoiceMixer::new(settings(4, 16, 32), MasterGain::new(1.0));
        let mut out = vec![0i16; 64];
        let mut pushed = Vec::new();

        for _ in 0..5 {
            for _ in 0..QUEUE_CAPACITY {
                let asset = constant(1, 2000);
                let weak = Arc::downgrade(&asset);
                let (voice, _) = Voice::new(asset, 60, 44100);
                if queue.push(voice).is_err() {
                    break;
                }
                pushed.push(weak);
            }
            mixer.render(&mut out);
            assert!(pushed.iter().all(|asset| asset.strong_count() > 0));
        }
        assert!(mixer.pending_retired() > 0);

        for _ in 0..20 {
            queue.collect_retired();
            mixer.render(&mut out);
        }
        queue.collect_retired();
        assert_eq!(0, mixer.pending_retired());
        assert_eq!(4, mixer.active_voices());
        let freed = pushed.iter().filter(|asset| asset.strong_count() == 0).count();
        assert_eq!(pushed.len() - 4, freed);
    }

    #[test]
    fn test_full_queue() {
        let (_mixer, queue) = VoiceMixer::new(settings(4, 16, 8), MasterGain::new(1.0));
        let asset = constant(1, 10);
        for _ in 0..QUEUE_CAPACITY {
            let (voice, _) = Voice::new(asset.clone(), 60, 44100);
            queue.push(voice).expect("room");
        }
        let (voice, _) = Voice::new(asset, 60, 44100);
        assert!(matches!(queue.push(voice), Err(QueueError::Full)));
    }
}
