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

//! The per-voice render callback.
//!
//! [`RenderEngine::render`] runs on the audio thread once per voice per period. It must not
//! allocate, lock, log or block. It copies samples untouched (gain is applied downstream by
//! the mixer) and loops back to frame 0 when the end of a voice is reached. Any problem with
//! the source or destination buffers degrades to silence and bumps a fault counter that the
//! control thread reads later.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::store::SampleStore;
use crate::audio::format::Sample;

/// Destination channel buffers for one bus. `None` stands for a null buffer pointer.
pub struct BusBuffers<'a> {
    pub left: Option<&'a mut [Sample]>,
    pub right: Option<&'a mut [Sample]>,
}

impl<'a> BusBuffers<'a> {
    pub fn new(left: &'a mut [Sample], right: &'a mut [Sample]) -> BusBuffers<'a> {
        BusBuffers {
            left: Some(left),
            right: Some(right),
        }
    }
}

/// A problem observed inside the render callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFault {
    /// The voice never loaded or is out of range.
    UnusableVoice,
    /// A destination channel buffer was missing.
    MissingDestination,
    /// A destination channel buffer was smaller than the requested frame count.
    ShortDestination,
}

/// The result of a render call. Faults are never fatal: the period is simply silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Rendered,
    Silenced(RenderFault),
}

/// Lock-free fault counters written by the audio thread.
#[derive(Debug, Default)]
pub struct RenderFaults {
    unusable_voice: AtomicU64,
    missing_destination: AtomicU64,
    short_destination: AtomicU64,
}

impl RenderFaults {
    #[inline]
    fn record(&self, fault: RenderFault) {
        let counter = match fault {
            RenderFault::UnusableVoice => &self.unusable_voice,
            RenderFault::MissingDestination => &self.missing_destination,
            RenderFault::ShortDestination => &self.short_destination,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of the counters.
    pub fn counts(&self) -> RenderFaultCounts {
        RenderFaultCounts {
            unusable_voice: self.unusable_voice.load(Ordering::Relaxed),
            missing_destination: self.missing_destination.load(Ordering::Relaxed),
            short_destination: self.short_destination.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of [`RenderFaults`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderFaultCounts {
    pub unusable_voice: u64,
    pub missing_destination: u64,
    pub short_destination: u64,
}

impl RenderFaultCounts {
    pub fn total(&self) -> u64 {
        self.unusable_voice + self.missing_destination + self.short_destination
    }

    /// Faults recorded since the given earlier snapshot.
    pub fn since(&self, earlier: &RenderFaultCounts) -> RenderFaultCounts {
        RenderFaultCounts {
            unusable_voice: self.unusable_voice.saturating_sub(earlier.unusable_voice),
            missing_destination: self
                .missing_destination
                .saturating_sub(earlier.missing_destination),
            short_destination: self
                .short_destination
                .saturating_sub(earlier.short_destination),
        }
    }
}

/// Reads loop buffers from the sample store into bus buffers.
#[derive(Debug)]
pub struct RenderEngine {
    store: Arc<SampleStore>,
    faults: RenderFaults,
}

impl RenderEngine {
    pub fn new(store: Arc<SampleStore>) -> RenderEngine {
        RenderEngine {
            store,
            faults: RenderFaults::default(),
        }
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn faults(&self) -> &RenderFaults {
        &self.faults
    }

    /// Fills `frames` frames of both destination channels from the voice, starting at its
    /// cursor, and advances the cursor. A mono voice is written to both channels.
    pub fn render(&self, voice: usize, frames: usize, dest: BusBuffers<'_>) -> RenderStatus {
        let BusBuffers { left, right } = dest;

        let source = match self.store.voice(voice) {
            Some(source) => source,
            None => return self.silence(RenderFault::UnusableVoice, left, right, frames),
        };

        let (out_left, out_right) = match (left, right) {
            (Some(l), Some(r)) if l.len() >= frames && r.len() >= frames => {
                (&mut l[..frames], &mut r[..frames])
            }
            (l, r) => {
                let fault = if l.is_none() || r.is_none() {
                    RenderFault::MissingDestination
                } else {
                    RenderFault::ShortDestination
                };
                return self.silence(fault, l, r, frames);
            }
        };

        let frame_count = source.frame_count();
        let in_left = source.left();
        let in_right = source.right().unwrap_or(in_left);

        let mut cursor = source.cursor();
        let mut written = 0;
        while written < frames {
            let run = (frames - written).min(frame_count - cursor);
            out_left[written..written + run].copy_from_slice(&in_left[cursor..cursor + run]);
            out_right[written..written + run].copy_from_slice(&in_right[cursor..cursor + run]);
            written += run;
            cursor += run;
            // Hard restart at the top of the loop.
            if cursor >= frame_count {
                cursor = 0;
            }
        }
        source.store_cursor(cursor);

        RenderStatus::Rendered
    }

    /// Zeroes whatever destination memory can be reached and records the fault.
    #[cold]
    fn silence(
        &self,
        fault: RenderFault,
        left: Option<&mut [Sample]>,
        right: Option<&mut [Sample]>,
        frames: usize,
    ) -> RenderStatus {
        for buffer in [left, right].into_iter().flatten() {
            let reachable = frames.min(buffer.len());
            buffer[..reachable].fill(0);
        }
        self.faults.record(fault);
        RenderStatus::Silenced(fault)
    }
}
