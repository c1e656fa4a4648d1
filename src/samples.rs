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

//! Looping voice storage and rendering.
//!
//! This module provides:
//! - Decoding of loop files into memory ahead of playback
//! - The sample store that owns loop buffers and cursors
//! - The render engine that copies loop data into bus buffers on the real-time thread

mod error;
mod loader;
mod render;
mod store;

pub use error::LoadError;
pub use loader::{load_voices, DecodedAudio, Decoder, SymphoniaDecoder, VoiceSource};
pub use render::{
    BusBuffers, RenderEngine, RenderFault, RenderFaultCounts, RenderFaults, RenderStatus,
};
pub use store::{SampleStore, Voice};
