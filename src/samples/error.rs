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
/// Errors that make a single voice unusable. None of these are fatal to the mixer.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Voice {voice} does not exist (store has {voices} voices)")]
    NoSuchVoice { voice: usize, voices: usize },

    #[error("Unsupported channel count {0}, only mono and stereo loops are supported")]
    UnsupportedChannels(usize),

    #[error("Loop contains no frames")]
    Empty,

    #[error("Channel {channel} has {actual} frames, expected {expected}")]
    LengthMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("No audio track found in {0}")]
    NoAudioTrack(String),

    #[error("Decode failed for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: symphonia::core::errors::Error,
    },

    #[error("Unable to resample loop from {source_rate} Hz to {target_rate} Hz")]
    Resample { source_rate: u32, target_rate: u32 },

    #[error("Unable to allocate loop buffers: {0}")]
    Allocation(#[from] std::collections::TryReserveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
