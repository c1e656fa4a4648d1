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

//! The mixer graph: one input bus per voice feeding a single output.
//!
//! Everything in here that changes during playback is an atomic, so the control plane can
//! flip buses and gains while the real-time mixer reads them without locking.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::samples::{RenderEngine, SampleStore};
use crate::session::SessionError;

/// The largest slice the render path is ever asked for.
pub const DEFAULT_MAX_FRAMES_PER_SLICE: usize = 4096;

/// Marks a bus with no pending resync.
const NO_RESYNC: usize = usize::MAX;

/// Failures while building the graph or the output stream that drives it. These are fatal
/// to startup and nothing is left running when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum GraphConfigError {
    #[error("Graph needs at least one bus")]
    NoBuses,

    #[error("Graph has {buses} buses but the store holds {voices} voices")]
    BusCountMismatch { buses: usize, voices: usize },

    #[error("Maximum frames per slice must be greater than 0")]
    InvalidSliceSize,

    #[error("Sample rate must be greater than 0")]
    InvalidSampleRate,

    #[error("Bus {bus} does not exist (graph has {buses} buses)")]
    NoSuchBus { bus: usize, buses: usize },

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Unable to create output stream: {0}")]
    Stream(String),

    #[error("Output stream is already running")]
    AlreadyRunning,

    #[error("Output thread panicked")]
    ThreadPanicked,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The shape of the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    /// Number of input buses, one per voice.
    pub buses: usize,
    /// The largest number of frames a single render call is asked for.
    pub max_frames_per_slice: usize,
    /// The hardware sample rate the graph runs at.
    pub sample_rate: u32,
}

impl GraphConfig {
    pub fn new(buses: usize, sample_rate: u32) -> GraphConfig {
        GraphConfig {
            buses,
            max_frames_per_slice: DEFAULT_MAX_FRAMES_PER_SLICE,
            sample_rate,
        }
    }
}

/// A mixer input.
#[derive(Debug)]
pub struct Bus {
    enabled: AtomicBool,
    /// f32 bits.
    gain: AtomicU32,
    /// The voice whose cursor this bus picks up before its next render.
    resync_from: AtomicUsize,
}

impl Bus {
    fn new() -> Bus {
        Bus {
            enabled: AtomicBool::new(true),
            gain: AtomicU32::new(1.0f32.to_bits()),
            resync_from: AtomicUsize::new(NO_RESYNC),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    /// Returns the pending resync source, if any, clearing it.
    #[inline]
    fn take_resync(&self) -> Option<usize> {
        match self.resync_from.swap(NO_RESYNC, Ordering::AcqRel) {
            NO_RESYNC => None,
            source => Some(source),
        }
    }

    fn has_pending_resync(&self) -> bool {
        self.resync_from.load(Ordering::Acquire) != NO_RESYNC
    }
}

/// The render engine plus the per-bus and output parameters.
#[derive(Debug)]
pub struct Graph {
    engine: RenderEngine,
    buses: Box<[Bus]>,
    /// f32 bits.
    output_gain: AtomicU32,
    max_frames_per_slice: usize,
    sample_rate: u32,
}

impl Graph {
    /// Freezes the store and wires one bus per voice. All buses start enabled at unity gain.
    pub fn new(store: SampleStore, config: &GraphConfig) -> Result<Graph, GraphConfigError> {
        if config.buses == 0 {
            return Err(GraphConfigError::NoBuses);
        }
        if config.buses != store.voice_count() {
            return Err(GraphConfigError::BusCountMismatch {
                buses: config.buses,
                voices: store.voice_count(),
            });
        }
        if config.max_frames_per_slice == 0 {
            return Err(GraphConfigError::InvalidSliceSize);
        }
        if config.sample_rate == 0 {
            return Err(GraphConfigError::InvalidSampleRate);
        }

        info!(
            buses = config.buses,
            max_frames_per_slice = config.max_frames_per_slice,
            sample_rate = config.sample_rate,
            memory = store.memory_size(),
            "Mixer graph configured"
        );

        Ok(Graph {
            engine: RenderEngine::new(Arc::new(store)),
            buses: (0..config.buses).map(|_| Bus::new()).collect(),
            output_gain: AtomicU32::new(1.0f32.to_bits()),
            max_frames_per_slice: config.max_frames_per_slice,
            sample_rate: config.sample_rate,
        })
    }

    pub fn engine(&self) -> &RenderEngine {
        &self.engine
    }

    pub fn store(&self) -> &SampleStore {
        self.engine.store()
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn max_frames_per_slice(&self) -> usize {
        self.max_frames_per_slice
    }

    fn bus(&self, bus: usize) -> Result<&Bus, GraphConfigError> {
        self.buses.get(bus).ok_or(GraphConfigError::NoSuchBus {
            bus,
            buses: self.buses.len(),
        })
    }

    /// Turns a bus on or off. Turning a disabled bus on schedules a cursor resync from
    /// another usable voice so the loops stay aligned. Returns true if a resync was
    /// scheduled.
    pub fn set_bus_enabled(&self, bus: usize, enabled: bool) -> Result<bool, GraphConfigError> {
        let target = self.bus(bus)?;
        let was_enabled = target.is_enabled();

        let mut scheduled = false;
        if enabled && !was_enabled {
            if let Some(source) = self.store().other_usable_voice(bus) {
                // Must be visible before the bus is, so the mixer never renders the bus with
                // a stale cursor.
                target.resync_from.store(source, Ordering::Release);
                scheduled = true;
            }
        }
        target.enabled.store(enabled, Ordering::Release);

        debug!(bus, enabled, resync = scheduled, "Bus enable changed");
        Ok(scheduled)
    }

    /// Sets a bus's gain, clamped to [0.0, 1.0].
    pub fn set_input_gain(&self, bus: usize, gain: f32) -> Result<(), GraphConfigError> {
        let gain = clamp_gain(gain);
        self.bus(bus)?.gain.store(gain.to_bits(), Ordering::Relaxed);
        debug!(bus, gain, "Input gain changed");
        Ok(())
    }

    /// Sets the output gain, clamped to [0.0, 1.0].
    pub fn set_output_gain(&self, gain: f32) {
        let gain = clamp_gain(gain);
        self.output_gain.store(gain.to_bits(), Ordering::Relaxed);
        debug!(gain, "Output gain changed");
    }

    #[inline]
    pub fn output_gain(&self) -> f32 {
        f32::from_bits(self.output_gain.load(Ordering::Relaxed))
    }

    /// Copies the pending source cursor into the bus's voice, if a resync is pending.
    /// Only the thread that renders (or, while stopped, the control thread) may call this.
    #[inline]
    pub fn apply_pending_resync(&self, bus: usize) -> Option<usize> {
        let source = self.buses.get(bus)?.take_resync()?;
        let cursor = self.store().cursor_of(source)?;
        self.store().set_cursor(bus, cursor);
        Some(cursor)
    }

    /// Applies every pending resync.
    #[inline]
    pub fn apply_pending_resyncs(&self) {
        for bus in 0..self.buses.len() {
            self.apply_pending_resync(bus);
        }
    }

    /// Returns true if any bus still waits for a resync.
    pub fn has_pending_resync(&self) -> bool {
        self.buses.iter().any(Bus::has_pending_resync)
    }
}

fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        return 0.0;
    }
    gain.clamp(0.0, 1.0)
}
