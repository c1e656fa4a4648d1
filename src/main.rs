// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
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
use loopmix::controller::{keyboard, Controller};
use loopmix::player::MixerHost;
use loopmix::samples::{Decoder, SymphoniaDecoder};
use loopmix::{audio, config};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A looping audio mixer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Decodes every voice in the given config and prints what was found.
    Verify {
        /// The path to the mixer config.
        config_path: String,
    },
    /// Plays the voices in the given config and reads commands from stdin.
    Play {
        /// The path to the mixer config.
        config_path: String,
    },
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
        Commands::Verify { config_path } => {
            let config = config::Host::deserialize(&PathBuf::from(&config_path))?;
            let sample_rate = config.audio().sample_rate();
            let decoder = SymphoniaDecoder::new();

            let mut failures = 0;
            println!("Voices (count: {}):", config.voices().len());
            for (index, source) in config.voice_sources().iter().enumerate() {
                match decoder.decode(&source.path, sample_rate) {
                    Ok(decoded) => println!(
                        "- {} {}: {} channel(s), {} frames at {} Hz ({:.2}s)",
                        index,
                        source.name,
                        decoded.channel_count(),
                        decoded.frame_count(),
                        decoded.sample_rate,
                        decoded.duration().as_secs_f64(),
                    ),
                    Err(e) => {
                        failures += 1;
                        println!("- {} {}: {}", index, source.name, e);
                    }
                }
            }

            if failures > 0 {
                return Err(format!("{} voice(s) failed to decode", failures).into());
            }
        }
        Commands::Play { config_path } => {
            let config = config::Host::deserialize(&PathBuf::from(&config_path))?;
            let device = audio::get_device(config.audio())?;
            let host = Arc::new(MixerHost::new(&config, device, &SymphoniaDecoder::new())?);
            host.start()?;
            println!("{}", host.status());

            Controller::new(host, Arc::new(keyboard::Driver::new()))
                .join()
                .await?;
        }
    }

    Ok(())
}
