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

//! Voices: live playback instances of a sample.
//!
//! A voice is owned by the mixer once it has been handed over. The router keeps a
//! [`VoiceHandle`] per voice so it can start the fade without touching the voice itself.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::samples::SampleAsset;

/// The default fade length in frames, about 0.68 seconds at 44.1kHz.
pub const DEFAULT_FADE_LENGTH: usize = 30000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeState {
    Playing,
    FadingOut,
}

/// A precomputed fade curve, `(1 - i/len)^6`, followed by silence.
#[derive(Clone)]
pub struct FadeEnvelope {
    curve: Arc<[f32]>,
}

impl FadeEnvelope {
    pub fn new(len: usize) -> FadeEnvelope {
        let len = len.max(1);
        let curve = (0..len)
            .map(|i| (1.0 - i as f64 / len as f64).powi(6) as f32)
            .collect();
        FadeEnvelope { curve }
    }

    pub fn len(&self) -> usize {
        self.curve.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curve.is_empty()
    }

    /// The gain at the given fade position. Zero once the curve is exhausted.
    #[inline]
    pub fn gain(&self, progress: usize) -> f32 {
        self.curve.get(progress).copied().unwrap_or(0.0)
    }
}

impl Default for FadeEnvelope {
    fn default() -> Self {
        FadeEnvelope::new(DEFAULT_FADE_LENGTH)
    }
}

/// A single playing sample.
pub struct Voice {
    asset: Arc<SampleAsset>,
    /// The note that triggered the voice, after transposition.
    note: u8,
    /// Fractional read position in source frames.
    position: f64,
    /// Source frames advanced per output frame.
    step: f64,
    /// Set by the router's handle to start the fade.
    fade_requested: Arc<AtomicBool>,
    state: FadeState,
    fade_progress: usize,
}

impl Voice {
    /// Creates a voice playing the asset at the given note, and the handle that controls it.
    pub fn new(asset: Arc<SampleAsset>, note: u8, output_rate: u32) -> (Voice, VoiceHandle) {
        let fade_requested = Arc::new(AtomicBool::new(false));
        let rate_ratio = f64::from(asset.sample_rate()) / f64::from(output_rate.max(1));
        let step = asset.pitch_ratio(note) * rate_ratio;

        let voice = Voice {
            asset,
            note,
            position: 0.0,
            step,
            fade_requested: fade_requested.clone(),
            state: FadeState::Playing,
            fade_progress: 0,
        };
        let handle = VoiceHandle { fade_requested };
        (voice, handle)
    }

    pub fn state(&self) -> FadeState {
        self.state
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn fade_progress(&self) -> usize {
        self.fade_progress
    }

    /// Mixes the voice into an interleaved stereo accumulator. Returns false once the voice
    /// has nothing left to play: the source ran out or the fade reached its end.
    pub fn render(&mut self, out: &mut [f32], envelope: &FadeEnvelope) -> bool {
        if self.state == FadeState::Playing && self.fade_requested.load(Ordering::Relaxed) {
            self.state = FadeState::FadingOut;
        }

        let data = self.asset.data();
        let frames = self.asset.frames();

        for frame in out.chunks_exact_mut(2) {
            let k = self.position as usize;
            if k + 1 >= frames {
                return false;
            }

            let gain = match self.state {
                FadeState::Playing => 1.0,
                FadeState::FadingOut => {
                    if self.fade_progress >= envelope.len() {
                        return false;
                    }
                    let gain = envelope.gain(self.fade_progress);
                    self.fade_progress += 1;
                    gain
                }
            };

            let t = (self.position - k as f64) as f32;
            let (l0, r0) = (f32::from(data[2 * k]), f32::from(data[2 * k + 1]));
            let (l1, r1) = (f32::from(data[2 * k + 2]), f32::from(data[2 * k + 3]));
            frame[0] += (l0 + t * (l1 - l0)) * gain;
            frame[1] += (r0 + t * (r1 - r0)) * gain;

            self.position += self.step;
        }

        !(self.state == FadeState::FadingOut && self.fade_progress >= envelope.len())
    }
}

impl fmt::Debug for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voice")
            .field("note", &self.note)
            .field("state", &self.state)
            .field("position", &self.position)
            .finish()
    }
}

/// The router's view of a voice owned by the mixer.
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    fade_requested: Arc<AtomicBool>,
}

impl VoiceHandle {
    /// Starts the fade. Has no effect on a voice that has already finished.
    pub fn fade_out(&self) {
        self.fade_requested.store(true, Ordering::Relaxed);
    }

    pub fn is_fading(&self) -> bool {
        self.fade_requested.load(Ordering::Relaxed)
    }

    /// True while the voice itself still exists.
    pub fn is_alive(&self) -> bool {
        Arc::strong_count(&self.fade_requested) > 1
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn asset(frames: Vec<i16>, sample_rate: u32, note: u8) -> Arc<SampleAsset> {
        let data = frames.iter().flat_map(|s| [*s, *s]).collect();
        Arc::new(SampleAsset::from_frames(data, sample_rate, note, 127, 1))
    }

    #[test]
    fn test_envelope() {
        let envelope = FadeEnvelope::new(4);
        assert_eq!(4, envelope.len());
        assert_eq!(1.0, envelope.gain(0));
        assert!((envelope.gain(2) - 0.5f32.powi(6)).abs() < 1e-7);
        assert_eq!(0.0, envelope.gain(4));
        assert_eq!(0.0, envelope.gain(1000));

        let envelope = FadeEnvelope::default();
        for i in 1..envelope.len() {
            assert!(envelope.gain(i) <= envelope.gain(i - 1));
        }
    }

    #[test]
    fn test_step() {
        let (voice, _) = Voice::new(asset(vec![0; 4], 44100, 60), 72, 44100);
        assert!((voice.step() - 2.0).abs() < 1e-12);

        let (voice, _) = Voice::new(asset(vec![0; 4], 22050, 60), 60, 44100);
        assert!((voice.step() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_render_interpolates() {
        let (mut voice, _) = Voice::new(asset(vec![0, 100, 200, 300], 22050, 60), 60, 44100);
        let envelope = FadeEnvelope::new(8);
        let mut out = vec![0.0f32; 8];

        assert!(voice.render(&mut out, &envelope));
        assert_eq!(vec![0.0, 0.0, 50.0, 50.0, 100.0, 100.0, 150.0, 150.0], out);
        assert!((voice.position() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_render_ends_at_last_frame() {
        let (mut voice, handle) = Voice::new(asset(vec![10, 20, 30], 44100, 60), 60, 44100);
        let envelope = FadeEnvelope::new(8);
        let mut out = vec![0.0f32; 8];

        assert!(handle.is_alive());
        assert!(!voice.render(&mut out, &envelope));
        // Two frames are played, the third has nothing to interpolate towards.
        assert_eq!(vec![10.0, 10.0, 20.0, 20.0, 0.0, 0.0, 0.0, 0.0], out);
        drop(voice);
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_fade() {
        let (mut voice, handle) = Voice::new(asset(vec![1000; 64], 44100, 60), 60, 44100);
        let envelope = FadeEnvelope::new(4);
        let mut out = vec![0.0f32; 4];

        assert!(voice.render(&mut out, &envelope));
        assert_eq!(FadeState::Playing, voice.state());

        handle.fade_out();
        assert!(handle.is_fading());
        let mut out = vec![0.0f32; 4];
        assert!(voice.render(&mut out, &envelope));
        assert_eq!(FadeState::FadingOut, voice.state());
        assert_eq!(1000.0, out[0]);
        assert!(out[2] < 1000.0);

        let mut out = vec![0.0f32; 4];
        assert!(!voice.render(&mut out, &envelope));
        assert_eq!(4, voice.fade_progress());
    }
}
