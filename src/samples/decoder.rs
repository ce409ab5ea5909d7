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

//! WAV decoding into in-memory stereo 16-bit frames.
//!
//! PCM data is read with hound. Loop markers live in the `smpl` chunk, which hound skips,
//! so the RIFF chunk list is walked separately to find the first loop region.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use hound::{SampleFormat, WavReader};

/// The `smpl` header plus the first loop record. Nothing past it is read.
const SMPL_FIRST_LOOP_LEN: u32 = 36 + 24;

/// Errors produced while decoding a sample file. The file is unusable, the caller skips it.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Malformed container: {0}")]
    Malformed(&'static str),

    #[error("Unsupported sample format: {0} bits ({1:?})")]
    Unsupported(u16, SampleFormat),
}

/// The result of decoding a sample file.
#[derive(Clone, Debug)]
pub struct DecodedSample {
    /// Interleaved stereo frames.
    pub data: Vec<i16>,
    /// The sample rate of the file.
    pub sample_rate: u32,
    /// The channel count of the file before conversion to stereo.
    pub channels: u16,
    /// The first loop region (start, end) in frames.
    pub loop_region: Option<(u32, u32)>,
}

/// Decodes the given WAV file. When the file has a loop region, only the frames up to the
/// loop end (plus two frames of interpolation headroom) are loaded.
pub fn decode(path: &Path) -> Result<DecodedSample, DecodeError> {
    let loop_region = {
        let mut file = BufReader::new(File::open(path)?);
        read_loop_region(&mut file)?
    };

    let reader = WavReader::open(path)?;
    decode_from(reader, loop_region)
}

fn decode_from<R: Read>(
    mut reader: WavReader<R>,
    loop_region: Option<(u32, u32)>,
) -> Result<DecodedSample, DecodeError> {
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(DecodeError::Malformed("zero channels"));
    }

    let total_frames = reader.duration() as usize;
    let frames = match loop_region {
        Some((_, end)) => total_frames.min(end as usize + 2),
        None => total_frames,
    };
    let channels = spec.channels as usize;
    let wanted = frames * channels;

    let mut data = Vec::with_capacity(frames * 2);
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 1..=32) => {
            let bits = spec.bits_per_sample;
            let samples = reader
                .samples::<i32>()
                .take(wanted)
                .map(|sample| sample.map(|s| int_to_i16(s, bits)));
            interleave_stereo(samples, channels, &mut data)?;
        }
        (SampleFormat::Float, 32) => {
            let samples = reader
                .samples::<f32>()
                .take(wanted)
                .map(|sample| sample.map(float_to_i16));
            interleave_stereo(samples, channels, &mut data)?;
        }
        (format, bits) => return Err(DecodeError::Unsupported(bits, format)),
    }

    Ok(DecodedSample {
        data,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        loop_region,
    })
}

/// Converts an integer sample of the given width to 16 bits. Wider samples keep their most
/// significant 16 bits (arithmetic shift, truncating toward negative infinity).
pub fn int_to_i16(sample: i32, bits_per_sample: u16) -> i16 {
    if bits_per_sample > 16 {
        (sample >> (bits_per_sample - 16)) as i16
    } else {
        (sample << (16 - bits_per_sample)) as i16
    }
}

fn float_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Writes samples as stereo frames. Mono is duplicated, extra channels are dropped.
fn interleave_stereo<I>(samples: I, channels: usize, data: &mut Vec<i16>) -> Result<(), DecodeError>
where
    I: Iterator<Item = Result<i16, hound::Error>>,
{
    for (i, sample) in samples.enumerate() {
        let sample = sample?;
        match (channels, i % channels) {
            (1, _) => {
                data.push(sample);
                data.push(sample);
            }
            (_, 0) | (_, 1) => data.push(sample),
            _ => {}
        }
    }
    Ok(())
}

/// Walks the RIFF chunk list and returns the first loop of the `smpl` chunk, if any.
pub fn read_loop_region<R: Read + Seek>(reader: &mut R) -> Result<Option<(u32, u32)>, DecodeError> {
    let mut header = [0u8; 12];
    reader
        .read_exact(&mut header)
        .map_err(|_| DecodeError::Malformed("file too short for a RIFF header"))?;
    if &header[0..4] != b"RIFF" {
        return Err(DecodeError::Malformed("file does not start with RIFF id"));
    }
    if &header[8..12] != b"WAVE" {
        return Err(DecodeError::Malformed("not a WAVE file"));
    }

    loop {
        let mut chunk_header = [0u8; 8];
        match reader.read_exact(&mut chunk_header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]);

        if &chunk_header[0..4] == b"smpl" {
            let wanted = size.min(SMPL_FIRST_LOOP_LEN);
            let mut chunk = Vec::with_capacity(wanted as usize);
            reader.by_ref().take(u64::from(wanted)).read_to_end(&mut chunk)?;
            if chunk.len() < wanted as usize {
                return Err(DecodeError::Malformed("smpl chunk is truncated"));
            }
            return Ok(parse_smpl(&chunk));
        }

        // Chunks are word aligned.
        let skip = i64::from(size) + i64::from(size & 1);
        reader.seek(SeekFrom::Current(skip))?;
    }
}

fn parse_smpl(chunk: &[u8]) -> Option<(u32, u32)> {
    let read_u32 = |offset: usize| -> Option<u32> {
        chunk
            .get(offset..offset + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };

    // 36 byte header, the loop count is the eighth field.
    let loops = read_u32(28)?;
    if loops == 0 {
        return None;
    }
    // Each loop: cue point id, type, start, end, fraction, play count.
    let start = read_u32(36 + 8)?;
    let end = read_u32(36 + 12)?;
    Some((start, end))
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use crate::testutil::{write_wav, write_wav_with_bits, write_wav_with_loop};

    use super::*;

    #[test]
    fn test_int_conversion() {
        assert_eq!(0x1234, int_to_i16(0x1234, 16));
        assert_eq!(0x1234, int_to_i16(0x123456, 24));
        // Negative 24-bit values truncate toward negative infinity.
        assert_eq!(-1, int_to_i16(-1, 24));
        assert_eq!(-2, int_to_i16(-257, 24));
        assert_eq!(i16::MIN, int_to_i16(-0x800000, 24));
        assert_eq!(i16::MAX, int_to_i16(0x7FFFFF, 24));
        assert_eq!(0x1200, int_to_i16(0x12, 8));
        assert_eq!(0x1234, int_to_i16(0x12345678, 32));
    }

    #[test]
    fn test_decode_mono_duplicates_channels() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("60.wav");
        write_wav::<i16>(path.clone(), vec![vec![1, -2, 3]], 44100)?;

        let decoded = decode(&path)?;
        assert_eq!(vec![1, 1, -2, -2, 3, 3], decoded.data);
        assert_eq!(1, decoded.channels);
        assert_eq!(44100, decoded.sample_rate);
        assert_eq!(None, decoded.loop_region);
        Ok(())
    }

    #[test]
    fn test_decode_stereo_24_bit() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("24.wav");
        write_wav_with_bits::<i32>(
            path.clone(),
            vec![vec![0x010000, 0x7FFFFF], vec![-0x010000, -1]],
            48000,
            24,
        )?;

        let decoded = decode(&path)?;
        assert_eq!(vec![0x0100, -0x0100, 0x7FFF, -1], decoded.data);
        assert_eq!(2, decoded.channels);
        Ok(())
    }

    #[test]
    fn test_decode_loop_bounds_length() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("loop.wav");
        let frames: Vec<i16> = (0..100).collect();
        write_wav_with_loop(path.clone(), frames, 44100, 10, 20)?;

        let decoded = decode(&path)?;
        assert_eq!(Some((10, 20)), decoded.loop_region);
        // Loop end plus two frames.
        assert_eq!(22 * 2, decoded.data.len());
        assert_eq!(21, decoded.data[42]);
        Ok(())
    }

    #[test]
    fn test_malformed_magic() {
        let mut bad = Cursor::new(b"RIFX\x00\x00\x00\x00WAVE".to_vec());
        assert!(matches!(
            read_loop_region(&mut bad),
            Err(DecodeError::Malformed(_))
        ));

        let mut not_wave = Cursor::new(b"RIFF\x00\x00\x00\x00AVI ".to_vec());
        assert!(matches!(
            read_loop_region(&mut not_wave),
            Err(DecodeError::Malformed(_))
        ));

        let mut short = Cursor::new(b"RI".to_vec());
        assert!(read_loop_region(&mut short).is_err());
    }

    #[test]
    fn test_oversized_smpl_chunk() {
        let mut file = b"RIFF\x00\x00\x00\x00WAVEsmpl\xF0\xFF\xFF\xFF".to_vec();
        file.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            read_loop_region(&mut Cursor::new(file)),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_smpl_chunk_without_loops() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = b"RIFF\x00\x00\x00\x00WAVEsmpl\x24\x00\x00\x00".to_vec();
        file.extend_from_slice(&[0u8; 36]);

        assert_eq!(None, read_loop_region(&mut Cursor::new(file))?);
        Ok(())
    }

    #[test]
    fn test_unreadable_file() {
        let result = decode(Path::new("/nonexistent/sample.wav"));
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }

    #[test]
    fn test_missing_data_chunk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"RIFF\x04\x00\x00\x00WAVE")?;

        assert!(decode(&path).is_err());
        Ok(())
    }
}
