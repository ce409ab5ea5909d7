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

//! Wires the execution contexts together.
//!
//! The audio output pulls from the mixer on its own thread, presets load on the loader's
//! thread, and a single task handles note and controller events in arrival order.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, span, Instrument, Level};

use crate::audio::{self, MasterGain, OutputStream, VoiceMixer};
use crate::config::Config;
use crate::controller::{self, Driver};
use crate::midi::{self, NoteEvent};
use crate::router::NoteRouter;
use crate::samples::{empty_handle, BankHandle, PresetLoader};
use crate::status::StatusSink;

/// How often finished voices are collected from the mixer.
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

/// Pending note events before senders block.
const EVENT_CAPACITY: usize = 256;

pub struct Engine {
    bank: BankHandle,
    events_tx: Option<Sender<NoteEvent>>,
    midi_inputs: Vec<midi::midir::Connection>,
    output: OutputStream,
    handle: JoinHandle<()>,
}

impl Engine {
    /// Starts audio output, MIDI input and the initial preset load.
    pub fn start(
        config: &Config,
        status: Arc<dyn StatusSink>,
        driver: Option<Arc<dyn Driver>>,
    ) -> Result<Engine, Box<dyn Error>> {
        let bank = empty_handle();
        let gain = MasterGain::default();

        let (mixer, queue) = VoiceMixer::new(config.mixer_settings(), gain.clone());
        let output = audio::start_output(config.audio(), mixer)?;

        let loader = PresetLoader::new(config.samples_dir(), bank.clone(), gain, status);
        let mut router = NoteRouter::new(bank.clone(), queue, loader);
        router.program_change(config.initial_preset());

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let midi_inputs = midi::connect(config.midi(), events_tx.clone())?;

        let (controls_tx, controls_rx) = mpsc::channel(1);
        let driver_handle = driver.map(|driver| driver.monitor_events(controls_tx));

        info!(
            samples_dir = ?config.samples_dir(),
            output = output.name(),
            midi_inputs = midi_inputs.len(),
            "Engine started."
        );
        let handle = tokio::spawn(
            async move {
                Engine::handle_events(router, events_rx, controls_rx).await;
                if let Some(driver_handle) = driver_handle {
                    driver_handle.abort();
                }
            }
            .instrument(span!(Level::INFO, "engine")),
        );

        Ok(Engine {
            bank,
            events_tx: Some(events_tx),
            midi_inputs,
            output,
            handle,
        })
    }

    /// A sender for injecting note events alongside the MIDI inputs.
    pub fn sender(&self) -> Option<Sender<NoteEvent>> {
        self.events_tx.clone()
    }

    /// The currently published bank.
    pub fn bank(&self) -> BankHandle {
        self.bank.clone()
    }

    /// Join will block until the engine finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Disconnects every input, waits for pending events to be handled and stops the output.
    pub async fn shutdown(mut self) -> Result<(), JoinError> {
        self.midi_inputs.clear();
        self.events_tx = None;
        let result = self.join().await;
        self.output.stop();
        result
    }

    async fn handle_events(
        mut router: NoteRouter,
        mut events_rx: Receiver<NoteEvent>,
        mut controls_rx: Receiver<controller::Event>,
    ) {
        let mut collect = tokio::time::interval(COLLECT_INTERVAL);
        loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => dispatch(&mut router, event),
                    None => break,
                },
                Some(event) = controls_rx.recv() => {
                    info!(event = format!("{:?}", event), "Received controller event.");
                    match event {
                        controller::Event::Prev => load_preset(|| router.prev_preset()),
                        controller::Event::Next => load_preset(|| router.next_preset()),
                        controller::Event::Preset(preset) => {
                            load_preset(|| router.program_change(preset))
                        }
                    }
                },
                _ = collect.tick() => {
                    let freed = router.collect_retired();
                    if freed > 0 {
                        debug!(freed, "Collected finished voices.");
                    }
                },
            }
        }

        info!("Engine closing.");
        router.loader().wait();
    }
}

fn dispatch(router: &mut NoteRouter, event: NoteEvent) {
    match event {
        NoteEvent::ProgramChange { .. } => load_preset(|| router.handle(event)),
        _ => router.handle(event),
    }
}

/// Preset changes wait for the previous load to stop, which may block briefly.
fn load_preset<F: FnOnce()>(change: F) {
    match tokio::runtime::Handle::current().runtime_flavor() {
        tokio::runtime::RuntimeFlavor::CurrentThread => change(),
        _ => tokio::task::block_in_place(change),
    }
}
