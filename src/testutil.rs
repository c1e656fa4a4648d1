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
use std::{any::TypeId, error::Error, fs::File, path::PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

/// Writes interleaved samples to a WAV file. f32 samples produce a 32-bit float file, i16
/// and i32 samples produce integer files of matching width.
pub fn write_wav<S: hound::Sample + Copy + 'static>(
    path: PathBuf,
    samples: Vec<S>,
    channels: u16,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let (sample_format, bits_per_sample) = if TypeId::of::<S>() == TypeId::of::<f32>() {
        (SampleFormat::Float, 32)
    } else if TypeId::of::<S>() == TypeId::of::<i32>() {
        (SampleFormat::Int, 32)
    } else if TypeId::of::<S>() == TypeId::of::<i16>() {
        (SampleFormat::Int, 16)
    } else {
        return Err("Unsupported sample format".into());
    };

    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample,
            sample_format,
        },
    )?;
    for sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(())
}
