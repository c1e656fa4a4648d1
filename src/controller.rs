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
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, Instrument, Level};

use crate::audio::GraphConfigError;
use crate::player::MixerHost;

pub mod keyboard;

/// How often queued session events are handled.
const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How often render faults are checked and logged.
const FAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Controller events that will trigger behavior in the mixer host.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Starts playback. Does nothing if already playing.
    Start,

    /// Stops playback. Does nothing if already stopped.
    Stop,

    /// Turns a voice on or off.
    Enable { voice: usize, on: bool },

    /// Sets the gain of a voice.
    InputGain { voice: usize, gain: f32 },

    /// Sets the gain of the mixed output.
    OutputGain(f32),

    /// Prints the host status.
    Status,

    /// Stops playback and closes the controller.
    Quit,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Controls a mixer host. Besides driver events, the controller feeds session events back
/// into the host and reports render faults.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(host: Arc<MixerHost>, driver: Arc<dyn Driver>) -> Controller {
        let span = span!(Level::INFO, "controller");
        Controller {
            handle: tokio::spawn(Controller::trigger_events(host, driver).instrument(span)),
        }
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Triggers host behavior by watching the driver and the host's session.
    async fn trigger_events(host: Arc<MixerHost>, driver: Arc<dyn Driver>) {
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);
        let playback_events = host.events();

        let mut session_poll = tokio::time::interval(SESSION_POLL_INTERVAL);
        let mut fault_check = tokio::time::interval(FAULT_CHECK_INTERVAL);

        info!(voices = host.voice_count(), "Controller started.");

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => break,
                    };
                    info!(event = ?event, "Received event.");

                    let blocking_host = host.clone();
                    match tokio::task::spawn_blocking(move || apply(&blocking_host, event)).await {
                        Ok(Ok(Flow::Continue)) => {}
                        Ok(Ok(Flow::Quit)) => break,
                        Ok(Err(e)) => error!(err = %e, "Error talking to mixer host"),
                        Err(e) => error!(err = %e, "Mixer host task failed"),
                    }
                }
                _ = session_poll.tick() => {
                    let blocking_host = host.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || {
                        blocking_host.drain_session_events()
                    })
                    .await
                    {
                        error!(err = %e, "Session event task failed");
                    }
                    for event in playback_events.try_iter() {
                        info!(%event, "Playback event.");
                    }
                }
                _ = fault_check.tick() => {
                    host.check_faults();
                }
            }
        }

        info!("Controller closing.");
        let blocking_host = host.clone();
        match tokio::task::spawn_blocking(move || blocking_host.stop()).await {
            Ok(Err(e)) => error!(err = %e, "Error stopping mixer host"),
            Err(e) => error!(err = %e, "Mixer host task failed"),
            Ok(Ok(())) => {}
        }

        // Closing the receiver lets a driver blocked on sending notice.
        drop(events_rx);
        match join_handle.await {
            Ok(Err(e)) => error!(err = %e, "Event monitor failed"),
            Err(e) => error!(err = %e, "Error waiting for event monitor to stop"),
            Ok(Ok(())) => {}
        }
    }
}

/// Whether the controller keeps running after an event.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Applies a single event to the host.
fn apply(host: &MixerHost, event: Event) -> Result<Flow, GraphConfigError> {
    match event {
        Event::Start => host.start()?,
        Event::Stop => host.stop()?,
        Event::Enable { voice, on } => host.enable(voice, on)?,
        Event::InputGain { voice, gain } => {
            let applied = host.set_input_gain(voice, gain)?;
            info!(voice, requested = gain, applied, "Input gain set");
        }
        Event::OutputGain(gain) => host.set_output_gain(gain),
        Event::Status => println!("{}", host.status()),
        // Playback is stopped once the controller loop ends.
        Event::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

#[cfg(test)]
mod test {
    use std::{error::Error, io, sync::Arc};

    use crossbeam_channel::Receiver;
    use parking_lot::Mutex;
    use tokio::{sync::mpsc::Sender, task::JoinHandle};

    use crate::audio::Device as _;
    use crate::{
        audio, config,
        player::MixerHost,
        samples::SymphoniaDecoder,
        session::SessionEvent,
        test::eventually,
        testutil::write_wav,
    };

    use super::{apply, Controller, Driver, Event, Flow};

    /// Forwards whatever the test sends until the test drops its sender.
    struct TestDriver {
        events: Mutex<Option<Receiver<Event>>>,
    }

    impl Driver for TestDriver {
        fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
            let events = self.events.lock().take();
            tokio::task::spawn_blocking(move || {
                if let Some(events) = events {
                    for event in events.iter() {
                        if events_tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                }
                Ok(())
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_controller() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let guitar: Vec<i16> = (0..2000).map(|i| (i % 100) as i16 * 100).collect();
        write_wav(dir.path().join("guitar.wav"), guitar, 2, 44100)?;
        let beats: Vec<i16> = (0..1000).map(|i| (i % 50) as i16 * 100).collect();
        write_wav(dir.path().join("beats.wav"), beats, 1, 44100)?;

        let config = config::Host::parse(
            r#"
            audio:
              device: mock-device
            voices:
              - name: guitar
                file: guitar.wav
              - name: beats
                file: beats.wav
            "#,
            dir.path(),
        )?;
        let device = audio::get_device(config.audio())?;
        let mock = device.to_mock()?;
        let host = Arc::new(MixerHost::new(&config, device, &SymphoniaDecoder::new())?);

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let driver = Arc::new(TestDriver {
            events: Mutex::new(Some(events_rx)),
        });
        let mut controller = Controller::new(host.clone(), driver);

        events_tx.send(Event::Start)?;
        eventually(|| host.is_playing(), "Host never started playing");
        eventually(|| mock.periods() > 2, "Device never rendered");

        events_tx.send(Event::Enable { voice: 1, on: false })?;
        eventually(
            || !host.status().voices[1].enabled,
            "Beats were never disabled",
        );

        events_tx.send(Event::InputGain {
            voice: 0,
            gain: 0.5,
        })?;
        eventually(
            || host.status().voices[0].gain == 0.5,
            "Guitar gain never changed",
        );

        events_tx.send(Event::OutputGain(0.25))?;
        eventually(
            || host.status().output_gain == 0.25,
            "Output gain never changed",
        );

        // Session events reach the host without going through the driver.
        mock.inject(SessionEvent::InterruptionBegan);
        eventually(|| !host.is_playing(), "Interruption never stopped playback");
        mock.inject(SessionEvent::InterruptionEnded {
            should_resume: true,
        });
        eventually(|| host.is_playing(), "Playback never resumed");

        events_tx.send(Event::Stop)?;
        eventually(|| !host.is_playing(), "Host never stopped playing");

        events_tx.send(Event::Start)?;
        eventually(|| host.is_playing(), "Host never restarted");
        events_tx.send(Event::Quit)?;
        drop(events_tx);
        assert!(
            controller.join().await.is_ok(),
            "Error waiting for controller"
        );
        assert!(!host.is_playing());
        assert!(!mock.is_running());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_controller_closes_when_driver_ends() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        write_wav(dir.path().join("beats.wav"), vec![0i16; 100], 1, 44100)?;
        let config = config::Host::parse(
            r#"
            audio:
              device: mock-device
            voices:
              - name: beats
                file: beats.wav
            "#,
            dir.path(),
        )?;
        let device = audio::get_device(config.audio())?;
        let host = Arc::new(MixerHost::new(&config, device, &SymphoniaDecoder::new())?);

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let driver = Arc::new(TestDriver {
            events: Mutex::new(Some(events_rx)),
        });
        let mut controller = Controller::new(host.clone(), driver);
        events_tx.send(Event::Start)?;
        drop(events_tx);

        assert!(controller.join().await.is_ok());
        assert!(!host.is_playing());
        Ok(())
    }

    #[test]
    fn test_only_quit_ends_the_controller() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        write_wav(dir.path().join("beats.wav"), vec![0i16; 100], 1, 44100)?;
        let config = config::Host::parse(
            r#"
            audio:
              device: mock-device
            voices:
              - name: beats
                file: beats.wav
            "#,
            dir.path(),
        )?;
        let device = audio::get_device(config.audio())?;
        let host = MixerHost::new(&config, device, &SymphoniaDecoder::new())?;

        assert_eq!(apply(&host, Event::Start)?, Flow::Continue);
        assert_eq!(apply(&host, Event::Status)?, Flow::Continue);
        assert_eq!(apply(&host, Event::OutputGain(0.5))?, Flow::Continue);
        assert_eq!(apply(&host, Event::Quit)?, Flow::Quit);
        // Quitting leaves stopping to the controller loop.
        assert!(host.is_playing());
        assert!(apply(&host, Event::Enable { voice: 3, on: true }).is_err());

        host.stop()?;
        Ok(())
    }
}
