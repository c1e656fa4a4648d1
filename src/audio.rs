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
use std::{error::Error, fmt, sync::Arc};

use crate::config;
use crate::session::Session;

pub mod cpal;
pub mod format;
pub mod graph;
pub mod mixer;
pub mod mock;
pub mod thread_priority;

pub use format::{SampleFormat, TargetFormat};
pub use graph::{Graph, GraphConfig, GraphConfigError};
pub use mixer::Mixer;

/// An output device that drives a mixer from its hardware clock.
pub trait Device: Session + fmt::Display + std::marker::Send + std::marker::Sync {
    /// Starts pulling audio from the mixer. The session must be active.
    fn start(&self, mixer: Mixer) -> Result<(), GraphConfigError>;

    /// Stops the output stream. When this returns no render call is in flight and the mixer
    /// has been dropped. Stopping a stopped device does nothing.
    fn stop(&self) -> Result<(), GraphConfigError>;

    /// Returns true while the output stream is running.
    fn is_running(&self) -> bool;

    /// Number of interleaved channels the stream is opened with.
    fn channels(&self) -> u16;

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<mock::Device>, Box<dyn Error>>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets the device named in the audio configuration.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, GraphConfigError> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(device)));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_mock_device() {
        let device = get_device(&config::Audio::new("mock-output")).unwrap();
        assert_eq!(device.to_string(), "mock-output (Mock)");
        assert_eq!(device.channels(), 2);
        assert!(!device.is_running());
        assert!(device.to_mock().is_ok());
    }
}
