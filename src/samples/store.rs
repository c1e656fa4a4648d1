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

//! In-memory storage for looping voices.
//!
//! Every voice is decoded completely before playback starts. Loading needs a
//! mutable store, so once the store is shared with the real-time side behind an
//! `Arc` its buffers can no longer be reallocated or swapped. The only state
//! that changes during playback is each voice's cursor, which is a word-sized
//! atomic.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use super::error::LoadError;
use crate::audio::format::Sample;

/// One looping sound source.
pub struct Voice {
    /// Channel 0, or the only channel of a mono voice.
    left: Box<[Sample]>,
    /// Channel 1. Present iff the voice is stereo.
    right: Option<Box<[Sample]>>,
    /// The next frame to emit. Always less than the frame count.
    cursor: AtomicUsize,
}

impl Voice {
    /// Returns true if the voice has a right channel.
    pub fn is_stereo(&self) -> bool {
        self.right.is_some()
    }

    /// Total number of frames in the loop.
    pub fn frame_count(&self) -> usize {
        self.left.len()
    }

    pub fn left(&self) -> &[Sample] {
        &self.left
    }

    pub fn right(&self) -> Option<&[Sample]> {
        self.right.as_deref()
    }

    /// The next frame to be emitted.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Stores a new cursor, wrapped into the loop.
    pub(crate) fn store_cursor(&self, cursor: usize) {
        self.cursor
            .store(cursor % self.frame_count(), Ordering::Release);
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("stereo", &self.is_stereo())
            .field("frame_count", &self.frame_count())
            .field("cursor", &self.cursor())
            .finish()
    }
}

/// The state of a single voice slot.
#[derive(Debug)]
enum Slot {
    /// Nothing has been loaded yet.
    Empty,
    /// The voice loaded and may be rendered.
    Loaded(Voice),
    /// Loading failed. The reason is kept for status reporting.
    Unusable(String),
}

/// Owns the decoded loop buffers and the playback cursor of every voice.
#[derive(Debug)]
pub struct SampleStore {
    slots: Vec<Slot>,
}

impl SampleStore {
    /// Creates a store with the given number of empty voice slots.
    pub fn new(voice_count: usize) -> SampleStore {
        SampleStore {
            slots: (0..voice_count).map(|_| Slot::Empty).collect(),
        }
    }

    /// Number of voice slots, usable or not.
    pub fn voice_count(&self) -> usize {
        self.slots.len()
    }

    /// Takes ownership of decoded planar channels for a voice and resets its cursor to 0.
    ///
    /// On failure the voice is marked unusable and will never be handed to the renderer.
    pub fn load(
        &mut self,
        voice: usize,
        channels: Vec<Vec<Sample>>,
        frame_count: usize,
    ) -> Result<(), LoadError> {
        let voices = self.slots.len();
        let slot = self
            .slots
            .get_mut(voice)
            .ok_or(LoadError::NoSuchVoice { voice, voices })?;

        match Self::build_voice(channels, frame_count) {
            Ok(loaded) => {
                info!(
                    voice,
                    stereo = loaded.is_stereo(),
                    frames = loaded.frame_count(),
                    "Voice loaded"
                );
                *slot = Slot::Loaded(loaded);
                Ok(())
            }
            Err(e) => {
                warn!(voice, err = %e, "Voice is unusable");
                *slot = Slot::Unusable(e.to_string());
                Err(e)
            }
        }
    }

    fn build_voice(channels: Vec<Vec<Sample>>, frame_count: usize) -> Result<Voice, LoadError> {
        if channels.is_empty() || channels.len() > 2 {
            return Err(LoadError::UnsupportedChannels(channels.len()));
        }
        if frame_count == 0 {
            return Err(LoadError::Empty);
        }
        for (channel, samples) in channels.iter().enumerate() {
            if samples.len() != frame_count {
                return Err(LoadError::LengthMismatch {
                    channel,
                    expected: frame_count,
                    actual: samples.len(),
                });
            }
        }

        let mut channels = channels.into_iter().map(Vec::into_boxed_slice);
        let left = channels.next().ok_or(LoadError::UnsupportedChannels(0))?;
        let right = channels.next();

        Ok(Voice {
            left,
            right,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Marks a voice as unusable, dropping any buffers it held.
    pub fn mark_unusable(&mut self, voice: usize, reason: &LoadError) {
        if let Some(slot) = self.slots.get_mut(voice) {
            warn!(voice, err = %reason, "Voice is unusable");
            *slot = Slot::Unusable(reason.to_string());
        }
    }

    /// Returns the voice if it loaded successfully.
    #[inline]
    pub fn voice(&self, voice: usize) -> Option<&Voice> {
        match self.slots.get(voice) {
            Some(Slot::Loaded(loaded)) => Some(loaded),
            _ => None,
        }
    }

    /// Returns true if the voice loaded successfully.
    pub fn is_usable(&self, voice: usize) -> bool {
        self.voice(voice).is_some()
    }

    /// Returns why a voice is unusable, if it is.
    pub fn unusable_reason(&self, voice: usize) -> Option<&str> {
        match self.slots.get(voice) {
            Some(Slot::Unusable(reason)) => Some(reason),
            Some(Slot::Empty) => Some("not loaded"),
            _ => None,
        }
    }

    /// The current read position of a voice.
    pub fn cursor_of(&self, voice: usize) -> Option<usize> {
        self.voice(voice).map(Voice::cursor)
    }

    /// Overwrites a voice's cursor. The caller must make sure no render call is reading this
    /// voice at the same time. The value is wrapped into the voice's loop, so a cursor taken
    /// from a longer loop is still a valid position.
    pub fn set_cursor(&self, voice: usize, cursor: usize) -> bool {
        match self.voice(voice) {
            Some(loaded) => {
                loaded.store_cursor(cursor);
                true
            }
            None => false,
        }
    }

    /// Returns the first usable voice other than the given one.
    pub fn other_usable_voice(&self, voice: usize) -> Option<usize> {
        (0..self.slots.len()).find(|&other| other != voice && self.is_usable(other))
    }

    /// Total memory held by loop buffers, in bytes.
    pub fn memory_size(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Loaded(voice) => {
                    let channels = if voice.is_stereo() { 2 } else { 1 };
                    voice.frame_count() * channels * std::mem::size_of::<Sample>()
                }
                _ => 0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, offset: Sample) -> Vec<Sample> {
        (0..frames as Sample).map(|i| i + offset).collect()
    }

    #[test]
    fn test_load_stereo_and_mono() {
        let mut store = SampleStore::new(2);
        store
            .load(0, vec![ramp(8, 0), ramp(8, 100)], 8)
            .expect("stereo load");
        store.load(1, vec![ramp(5, 0)], 5).expect("mono load");

        let stereo = store.voice(0).unwrap();
        assert!(stereo.is_stereo());
        assert_eq!(stereo.frame_count(), 8);
        assert_eq!(stereo.right().unwrap()[3], 103);
        assert_eq!(stereo.cursor(), 0);

        let mono = store.voice(1).unwrap();
        assert!(!mono.is_stereo());
        assert_eq!(mono.frame_count(), 5);
        assert!(mono.right().is_none());

        assert_eq!(store.memory_size(), (8 * 2 + 5) * 4);
    }

    #[test]
    fn test_load_rejects_unsupported_channels() {
        let mut store = SampleStore::new(1);
        let result = store.load(0, vec![ramp(4, 0), ramp(4, 0), ramp(4, 0)], 4);
        assert!(matches!(result, Err(LoadError::UnsupportedChannels(3))));
        assert!(!store.is_usable(0));
        assert!(store.voice(0).is_none());
        assert!(store.unusable_reason(0).unwrap().contains("channel count 3"));

        let result = store.load(0, vec![], 4);
        assert!(matches!(result, Err(LoadError::UnsupportedChannels(0))));
    }

    #[test]
    fn test_load_rejects_empty_and_mismatched() {
        let mut store = SampleStore::new(1);
        assert!(matches!(
            store.load(0, vec![vec![]], 0),
            Err(LoadError::Empty)
        ));
        assert!(matches!(
            store.load(0, vec![ramp(4, 0), ramp(3, 0)], 4),
            Err(LoadError::LengthMismatch {
                channel: 1,
                expected: 4,
                actual: 3
            })
        ));
        assert!(!store.is_usable(0));
    }

    #[test]
    fn test_load_out_of_range() {
        let mut store = SampleStore::new(2);
        assert!(matches!(
            store.load(2, vec![ramp(4, 0)], 4),
            Err(LoadError::NoSuchVoice {
                voice: 2,
                voices: 2
            })
        ));
    }

    #[test]
    fn test_failed_reload_marks_voice_unusable() {
        let mut store = SampleStore::new(1);
        store.load(0, vec![ramp(4, 0)], 4).unwrap();
        assert!(store.is_usable(0));
        assert!(store.load(0, vec![ramp(4, 0)], 0).is_err());
        assert!(!store.is_usable(0));
        assert_eq!(store.cursor_of(0), None);
    }

    #[test]
    fn test_cursor_invariant_after_load() {
        let mut store = SampleStore::new(3);
        store.load(0, vec![ramp(10, 0)], 10).unwrap();
        let _ = store.load(1, vec![ramp(10, 0)], 0);
        store.mark_unusable(
            2,
            &LoadError::NoAudioTrack("missing.caf".to_string()),
        );

        for voice in 0..store.voice_count() {
            match store.voice(voice) {
                Some(loaded) => {
                    assert!(loaded.frame_count() > 0);
                    assert!(loaded.cursor() < loaded.frame_count());
                }
                None => assert!(store.unusable_reason(voice).is_some()),
            }
        }
    }

    #[test]
    fn test_set_cursor_wraps() {
        let mut store = SampleStore::new(2);
        store.load(0, vec![ramp(10, 0)], 10).unwrap();

        assert!(store.set_cursor(0, 7));
        assert_eq!(store.cursor_of(0), Some(7));

        // A cursor copied from a longer loop lands inside this one.
        assert!(store.set_cursor(0, 23));
        assert_eq!(store.cursor_of(0), Some(3));

        // Unloaded voices are never touched.
        assert!(!store.set_cursor(1, 4));
        assert_eq!(store.cursor_of(1), None);
    }

    #[test]
    fn test_other_usable_voice() {
        let mut store = SampleStore::new(3);
        store.load(1, vec![ramp(4, 0)], 4).unwrap();
        store.load(2, vec![ramp(4, 0)], 4).unwrap();

        assert_eq!(store.other_usable_voice(0), Some(1));
        assert_eq!(store.other_usable_voice(1), Some(2));
        assert_eq!(store.other_usable_voice(2), Some(1));

        let mut lonely = SampleStore::new(2);
        lonely.load(0, vec![ramp(4, 0)], 4).unwrap();
        assert_eq!(lonely.other_usable_voice(0), None);
    }
}
