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
#[cfg(test)]
use std::error::Error;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::graph::GraphConfigError;
use super::mixer::Mixer;
use crate::session::{Session, SessionError, SessionEvent};

const MOCK_CHANNELS: u16 = 2;
const MOCK_PERIOD_FRAMES: usize = 512;
const MOCK_TICK: Duration = Duration::from_micros(250);

/// State shared between the device handle and its playback thread.
#[derive(Default)]
struct Shared {
    running: AtomicBool,
    active: AtomicBool,
    fail_activation: AtomicBool,
    /// Forces the negotiated hardware rate. 0 accepts the preferred rate.
    hardware_rate: AtomicU32,
    /// Render calls currently executing.
    in_flight: AtomicUsize,
    /// Periods rendered since the device was created.
    periods: AtomicU64,
    /// The most recently rendered period.
    last_period: Mutex<Vec<f32>>,
}

struct PlaybackThread {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// A mock device. Runs the mixer on a plain thread at a fixed tick instead of a hardware clock.
#[derive(Clone)]
pub struct Device {
    name: String,
    shared: Arc<Shared>,
    thread: Arc<Mutex<Option<PlaybackThread>>>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Device {
            name: name.to_string(),
            shared: Arc::new(Shared::default()),
            thread: Arc::new(Mutex::new(None)),
            events_tx,
            events_rx,
        }
    }

    /// Delivers a session event as if the platform had raised it.
    pub fn inject(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Makes the next activations fail.
    pub fn fail_activation(&self, fail: bool) {
        self.shared.fail_activation.store(fail, Ordering::Relaxed);
    }

    /// Makes activation negotiate the given rate regardless of the preferred one.
    pub fn force_hardware_rate(&self, rate: u32) {
        self.shared.hardware_rate.store(rate, Ordering::Relaxed);
    }

    /// Returns true if the session is active.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Number of render calls executing right now.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Number of periods rendered so far.
    pub fn periods(&self) -> u64 {
        self.shared.periods.load(Ordering::Acquire)
    }

    /// A copy of the most recently rendered period.
    pub fn last_period(&self) -> Vec<f32> {
        self.shared.last_period.lock().clone()
    }
}

impl Session for Device {
    fn activate(&self, preferred_sample_rate: u32) -> Result<u32, SessionError> {
        if self.shared.fail_activation.load(Ordering::Relaxed) {
            return Err(SessionError::Activation(format!(
                "{} refused activation",
                self.name
            )));
        }

        let rate = match self.shared.hardware_rate.load(Ordering::Relaxed) {
            0 => preferred_sample_rate,
            forced => forced,
        };
        self.shared.active.store(true, Ordering::Release);
        info!(device = self.name, sample_rate = rate, "Mock session activated");
        Ok(rate)
    }

    fn deactivate(&self) {
        self.shared.active.store(false, Ordering::Release);
    }

    fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }
}

impl crate::audio::Device for Device {
    fn start(&self, mut mixer: Mixer) -> Result<(), GraphConfigError> {
        let span = span!(Level::INFO, "start (mock)");
        let _enter = span.enter();

        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Err(GraphConfigError::AlreadyRunning);
        }
        if !self.is_active() {
            return Err(SessionError::Inactive.into());
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let shared = self.shared.clone();
        let channels = MOCK_CHANNELS as usize;
        shared.running.store(true, Ordering::Release);
        let handle = thread::spawn(move || {
            let mut buffer = vec![0.0f32; MOCK_PERIOD_FRAMES * channels];
            loop {
                match stop_rx.recv_timeout(MOCK_TICK) {
                    Err(RecvTimeoutError::Timeout) => {
                        shared.in_flight.fetch_add(1, Ordering::AcqRel);
                        mixer.process(&mut buffer, channels);
                        shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                        shared.periods.fetch_add(1, Ordering::AcqRel);
                        let mut last = shared.last_period.lock();
                        last.clear();
                        last.extend_from_slice(&buffer);
                    }
                    _ => break,
                }
            }
            // The mixer and its graph references go before the thread reports done.
            drop(mixer);
        });

        *slot = Some(PlaybackThread { stop_tx, handle });
        info!(device = self.name, "Mock playback started");
        Ok(())
    }

    fn stop(&self) -> Result<(), GraphConfigError> {
        let playback = match self.thread.lock().take() {
            Some(playback) => playback,
            None => return Ok(()),
        };

        let _ = playback.stop_tx.send(());
        let result = playback.handle.join();
        self.shared.running.store(false, Ordering::Release);
        result.map_err(|_| GraphConfigError::ThreadPanicked)?;
        info!(device = self.name, "Mock playback stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn channels(&self) -> u16 {
        MOCK_CHANNELS
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<Device>, Box<dyn Error>> {
        Ok(Arc::new(self.clone()))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::UNITY;
    use crate::audio::graph::{Graph, GraphConfig};
    use crate::audio::Device as _;
    use crate::samples::SampleStore;
    use crate::test::eventually;

    fn mixer() -> (Arc<Graph>, Mixer) {
        let mut store = SampleStore::new(1);
        store.load(0, vec![vec![UNITY / 2; 1000]], 1000).unwrap();
        let graph = Arc::new(Graph::new(store, &GraphConfig::new(1, 44100)).unwrap());
        (graph.clone(), Mixer::new(graph))
    }

    #[test]
    fn test_start_requires_active_session() {
        let device = Device::get("mock");
        let (_, mixer) = mixer();
        assert!(matches!(
            device.start(mixer),
            Err(GraphConfigError::Session(SessionError::Inactive))
        ));
        assert!(!device.is_running());
    }

    #[test]
    fn test_activation() {
        let device = Device::get("mock");
        assert_eq!(device.activate(48000).unwrap(), 48000);
        assert!(device.is_active());

        device.force_hardware_rate(44100);
        assert_eq!(device.activate(48000).unwrap(), 44100);

        device.fail_activation(true);
        assert!(device.activate(48000).is_err());

        device.deactivate();
        assert!(!device.is_active());
    }

    #[test]
    fn test_start_and_stop() {
        let device = Device::get("mock");
        device.activate(44100).unwrap();
        let (graph, mixer) = mixer();

        device.start(mixer).unwrap();
        assert!(device.is_running());
        let (_, second) = self::mixer();
        assert!(matches!(
            device.start(second),
            Err(GraphConfigError::AlreadyRunning)
        ));

        eventually(|| device.periods() > 2, "Mock never rendered");
        assert_eq!(device.last_period()[0], 0.5);

        device.stop().unwrap();
        assert!(!device.is_running());
        assert_eq!(device.in_flight(), 0);
        // The mixer is gone, so only the test holds the graph.
        assert_eq!(Arc::strong_count(&graph), 1);

        let periods = device.periods();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(device.periods(), periods);

        // Stopping twice is fine.
        device.stop().unwrap();
    }

    #[test]
    fn test_injected_events() {
        let device = Device::get("mock");
        let events = device.events();
        device.inject(SessionEvent::InterruptionBegan);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::InterruptionBegan);
    }
}
