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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;

const START: &str = "start";
const STOP: &str = "stop";
const ON: &str = "on";
const OFF: &str = "off";
const GAIN: &str = "gain";
const OUTPUT: &str = "output";
const STATUS: &str = "status";
const QUIT: &str = "quit";

/// A controller that controls the mixer host using the keyboard.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Parses one line of input.
    fn parse(input: &str) -> Option<Event> {
        let mut words = input.split_whitespace();
        let command = words.next()?.to_lowercase();
        let args: Vec<&str> = words.collect();

        let event = match (command.as_str(), args.as_slice()) {
            (START, []) => Event::Start,
            (STOP, []) => Event::Stop,
            (ON, [voice]) => Event::Enable {
                voice: voice.parse().ok()?,
                on: true,
            },
            (OFF, [voice]) => Event::Enable {
                voice: voice.parse().ok()?,
                on: false,
            },
            (GAIN, [voice, gain]) => Event::InputGain {
                voice: voice.parse().ok()?,
                gain: gain.parse().ok()?,
            },
            (OUTPUT, [gain]) => Event::OutputGain(gain.parse().ok()?),
            (STATUS, []) => Event::Status,
            (QUIT, []) => Event::Quit,
            _ => return None,
        };
        Some(event)
    }

    /// Reads one command and forwards it. Returns false once there is nothing more to read.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({}, {}, {} <n>, {} <n>, {} <n> <value>, {} <value>, {}, {}): ",
            START, STOP, ON, OFF, GAIN, OUTPUT, STATUS, QUIT,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            events_tx
                .blocking_send(Event::Quit)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            return Ok(false);
        }

        let event = match Driver::parse(&input) {
            Some(event) => event,
            None => {
                warn!(input = input.trim(), "Unrecognized input");
                return Ok(true);
            }
        };
        let quit = event == Event::Quit;
        events_tx
            .blocking_send(event)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(!quit)
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            Ok(())
        })
    }
}
