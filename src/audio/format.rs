// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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

use std::{error::Error, fmt, str::FromStr};

/// The internal sample type: signed 8.24 fixed point.
pub type Sample = i32;

/// Number of fractional bits in a [`Sample`].
pub const FRACTION_BITS: u32 = 24;

/// The fixed point value that represents 1.0.
pub const UNITY: Sample = 1 << FRACTION_BITS;

/// Converts a float sample in [-1.0, 1.0] to fixed point. Values outside the range are clamped.
#[inline]
pub fn to_fixed(sample: f32) -> Sample {
    (sample.clamp(-1.0, 1.0) * UNITY as f32) as Sample
}

/// Converts a fixed point sample back to float.
#[inline]
pub fn to_float(sample: Sample) -> f32 {
    sample as f32 / UNITY as f32
}

/// Sample format of the device output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Integer samples (16-bit or 32-bit)
    Int,
    /// Floating point samples (32-bit)
    Float,
}

impl FromStr for SampleFormat {
    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "float" | "Float" => Ok(SampleFormat::Float),
            "int" | "Int" => Ok(SampleFormat::Int),
            _ => Err(format!("Unsupported sample format: {}", s).into()),
        }
    }

    type Err = Box<dyn Error>;
}

impl SampleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Float => "float",
            SampleFormat::Int => "int",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The format the output stream is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Sample format (integer or float)
    pub sample_format: SampleFormat,
    /// Bits per sample
    pub bits_per_sample: u16,
}

impl TargetFormat {
    /// Creates a new TargetFormat. Only 16/32-bit integer and 32-bit float streams are supported.
    pub fn new(
        sample_rate: u32,
        sample_format: SampleFormat,
        bits_per_sample: u16,
    ) -> Result<Self, Box<dyn Error>> {
        if sample_rate == 0 {
            return Err("Sample rate must be greater than 0".into());
        }

        match (sample_format, bits_per_sample) {
            (SampleFormat::Int, 16) | (SampleFormat::Int, 32) | (SampleFormat::Float, 32) => {}
            _ => {
                return Err(format!(
                    "Unsupported output format: {}-bit {}",
                    bits_per_sample, sample_format
                )
                .into())
            }
        }

        Ok(TargetFormat {
            sample_rate,
            sample_format,
            bits_per_sample,
        })
    }

    /// Returns a copy of this format at a different sample rate.
    pub fn with_sample_rate(&self, sample_rate: u32) -> TargetFormat {
        TargetFormat {
            sample_rate,
            ..self.clone()
        }
    }
}

impl Default for TargetFormat {
    /// 44.1kHz, 32-bit integer.
    fn default() -> Self {
        TargetFormat {
            sample_rate: 44100,
            sample_format: SampleFormat::Int,
            bits_per_sample: 32,
        }
    }
}
