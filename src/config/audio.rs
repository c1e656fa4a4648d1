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
use std::{error::Error, str::FromStr};

use serde::Deserialize;

use crate::audio::graph::DEFAULT_MAX_FRAMES_PER_SLICE;
use crate::audio::SampleFormat;

const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_BITS_PER_SAMPLE: u16 = 32;

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct Audio {
    /// The audio device.
    device: String,

    /// Preferred hardware sample rate in Hz (default: 44100)
    sample_rate: Option<u32>,

    /// Output stream sample format (default: "int")
    sample_format: Option<String>,

    /// Output stream bits per sample (default: 32)
    bits_per_sample: Option<u16>,

    /// The largest slice the render path is asked for (default: 4096)
    max_frames_per_slice: Option<usize>,
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: device.to_string(),
            sample_rate: None,
            sample_format: None,
            bits_per_sample: None,
            max_frames_per_slice: None,
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the preferred sample rate (default: 44100)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the output sample format (default: Int)
    pub fn sample_format(&self) -> Result<SampleFormat, Box<dyn Error>> {
        match self.sample_format.as_deref() {
            Some(format) => SampleFormat::from_str(format),
            None => Ok(SampleFormat::Int),
        }
    }

    /// Returns the output bits per sample (default: 32)
    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample.unwrap_or(DEFAULT_BITS_PER_SAMPLE)
    }

    /// Returns the maximum frames per slice (default: 4096)
    pub fn max_frames_per_slice(&self) -> usize {
        self.max_frames_per_slice
            .unwrap_or(DEFAULT_MAX_FRAMES_PER_SLICE)
    }
}
