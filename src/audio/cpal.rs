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
use std::{error::Error, fmt, thread, time::Duration};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use super::mixer::VoiceMixer;
use super::OutputStream;
use crate::playsync::CancelHandle;

/// The stereo output the mixer renders.
const OUTPUT_CHANNELS: u16 = 2;

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels >= OUTPUT_CHANNELS {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device. "default" selects the default output of the default host.
    pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
        if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device")?;
            return Ok(Device {
                name: device.name()?,
                max_channels: OUTPUT_CHANNELS,
                host_id: host.id(),
                device,
            });
        }

        Device::list()?
            .into_iter()
            .find(|device| device.name.trim() == name)
            .ok_or_else(|| format!("no device found with name {}", name).into())
    }

    /// Starts a stereo output stream pulling from the mixer. The stream lives on its own
    /// thread until the returned handle is stopped.
    pub fn start(
        self,
        mixer: VoiceMixer,
        sample_rate: u32,
        block_frames: usize,
    ) -> Result<OutputStream, Box<dyn Error>> {
        let cancel = CancelHandle::new();
        let (started_tx, started_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let name = self.name.clone();

        let thread = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                let span = span!(Level::INFO, "audio output (cpal)");
                let _enter = span.enter();

                let stream = match self.build_stream(mixer, sample_rate, block_frames) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = started_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = started_tx.send(Err(e.to_string()));
                    return;
                }
                info!(device = self.name, sample_rate, "Output stream started.");
                let _ = started_tx.send(Ok(()));

                // Keep the stream alive until stopped.
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(100));
                }
                info!(device = self.name, "Output stream stopped.");
            })
        };

        match started_rx.recv() {
            Ok(Ok(())) => Ok(OutputStream::new(&name, cancel, thread)),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(format!("unable to start output on {}: {}", name, e).into())
            }
            Err(_) => {
                let _ = thread.join();
                Err(format!("output thread for {} exited", name).into())
            }
        }
    }

    fn build_stream(
        &self,
        mixer: VoiceMixer,
        sample_rate: u32,
        block_frames: usize,
    ) -> Result<cpal::Stream, Box<dyn Error>> {
        let config = cpal::StreamConfig {
            channels: OUTPUT_CHANNELS,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let sample_format = self.device.default_output_config()?.sample_format();
        match sample_format {
            cpal::SampleFormat::I16 => {
                let mut mixer = mixer;
                Ok(self.device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| mixer.render(data),
                    |err: cpal::StreamError| error!("CPAL output stream error: {}", err),
                    None,
                )?)
            }
            cpal::SampleFormat::F32 => {
                self.build_converted_stream(&config, mixer, block_frames, i16_to_f32)
            }
            cpal::SampleFormat::I32 => {
                self.build_converted_stream(&config, mixer, block_frames, i16_to_i32)
            }
            cpal::SampleFormat::U16 => {
                self.build_converted_stream(&config, mixer, block_frames, i16_to_u16)
            }
            format => Err(format!("unsupported output sample format {:?}", format).into()),
        }
    }

    /// Renders in fixed blocks into a reused scratch buffer and converts to the device format.
    fn build_converted_stream<T, F>(
        &self,
        config: &cpal::StreamConfig,
        mut mixer: VoiceMixer,
        block_frames: usize,
        convert: F,
    ) -> Result<cpal::Stream, Box<dyn Error>>
    where
        T: cpal::SizedSample,
        F: Fn(i16) -> T + Send + 'static,
    {
        let mut scratch = vec![0i16; block_frames.max(1) * OUTPUT_CHANNELS as usize];
        Ok(self.device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(scratch.len()) {
                    let rendered = &mut scratch[..chunk.len()];
                    mixer.render(rendered);
                    for (dst, src) in chunk.iter_mut().zip(rendered.iter()) {
                        *dst = convert(*src);
                    }
                }
            },
            |err: cpal::StreamError| error!("CPAL output stream error: {}", err),
            None,
        )?)
    }
}

fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

fn i16_to_i32(sample: i16) -> i32 {
    i32::from(sample) << 16
}

fn i16_to_u16(sample: i16) -> u16 {
    (i32::from(sample) + 32768) as u16
}
