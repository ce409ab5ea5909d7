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

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use samplebox::config::Config;
use samplebox::controller::{self, keyboard};
use samplebox::engine::Engine;
use samplebox::playsync::CancelHandle;
use samplebox::samples::preset;
use samplebox::status::LogStatus;
use samplebox::{audio, midi};

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=sample playback instrument

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/samplebox
ExecStart=/usr/local/bin/samplebox start "$SAMPLEBOX_CONFIG"

[Install]
WantedBy=multi-user.target
Alias=samplebox.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A polyphonic sample playback instrument."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Lists and loads every preset in the given samples directory.
    Presets {
        /// The path to the samples directory on disk.
        path: String,
    },
    /// Starts the instrument using the given configuration.
    Start {
        /// The path to the configuration file.
        config_path: String,
    },
    /// Prints a systemd service definition.
    Systemd {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Presets { path } => {
            let presets = preset::list_presets(&PathBuf::from(&path))?;

            if presets.is_empty() {
                println!("No presets found in {}.", path.as_str());
                return Ok(());
            }

            println!("Presets (count: {}):", presets.len());
            let cancel = CancelHandle::new();
            for dir in presets.iter() {
                match preset::build_bank(dir, &cancel) {
                    Ok(bank) => println!(
                        "- {} {} (samples={}, notes={})",
                        dir.number,
                        dir.name,
                        bank.asset_count(),
                        bank.playable_notes()
                    ),
                    Err(e) => println!("- {} {} ({})", dir.number, dir.name, e),
                }
            }
        }
        Commands::Start { config_path } => {
            let config = Config::load(&PathBuf::from(config_path))?;
            let driver: Arc<dyn controller::Driver> = Arc::new(keyboard::Driver::new());
            Engine::start(&config, Arc::new(LogStatus {}), Some(driver))?
                .join()
                .await?;
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
