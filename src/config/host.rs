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
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::Deserialize;

use super::audio::Audio;
use super::error::ConfigError;
use super::voice::Voice;
use crate::audio::TargetFormat;
use crate::samples::VoiceSource;

/// The smallest input gain a voice can be set to. A bus at exactly zero gain is never pulled,
/// so its loop would stop advancing and drift out of sync.
const DEFAULT_MIN_INPUT_GAIN: f32 = 0.01;

/// The configuration for the mixer host.
#[derive(Deserialize, Clone, Debug)]
pub struct Host {
    /// The audio output configuration.
    audio: Audio,
    /// The looping voices, one mixer bus each.
    voices: Vec<Voice>,
    /// Lower bound for input gains (default: 0.01)
    min_input_gain: Option<f32>,
    /// Initial output gain (default: 1.0)
    output_gain: Option<f32>,
    /// Directory relative voice paths resolve against.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Host {
    /// Creates a new host configuration.
    pub fn new(audio: Audio, voices: Vec<Voice>) -> Host {
        Host {
            audio,
            voices,
            min_input_gain: None,
            output_gain: None,
            base_dir: PathBuf::new(),
        }
    }

    /// Parse a host configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Host, ConfigError> {
        let host = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Host>()?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        host.with_base_dir(base_dir).validate()
    }

    /// Parse a host configuration from a YAML string.
    pub fn parse(yaml: &str, base_dir: &Path) -> Result<Host, ConfigError> {
        let host = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Host>()?;
        host.with_base_dir(base_dir.to_path_buf()).validate()
    }

    fn with_base_dir(mut self, base_dir: PathBuf) -> Host {
        self.base_dir = base_dir;
        self
    }

    fn validate(self) -> Result<Host, ConfigError> {
        if self.voices.is_empty() {
            return Err(ConfigError::NoVoices);
        }
        self.target_format()?;
        Ok(self)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The output stream format at the preferred sample rate.
    pub fn target_format(&self) -> Result<TargetFormat, ConfigError> {
        let sample_format = self
            .audio
            .sample_format()
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        TargetFormat::new(
            self.audio.sample_rate(),
            sample_format,
            self.audio.bits_per_sample(),
        )
        .map_err(|e| ConfigError::InvalidFormat(e.to_string()))
    }

    /// Lower bound for input gains, within [0.0, 1.0] (default: 0.01)
    pub fn min_input_gain(&self) -> f32 {
        self.min_input_gain
            .unwrap_or(DEFAULT_MIN_INPUT_GAIN)
            .clamp(0.0, 1.0)
    }

    /// Initial output gain (default: 1.0)
    pub fn output_gain(&self) -> f32 {
        self.output_gain.unwrap_or(1.0)
    }

    /// The voices with their files resolved.
    pub fn voice_sources(&self) -> Vec<VoiceSource> {
        self.voices
            .iter()
            .map(|voice| VoiceSource {
                name: voice.name().to_string(),
                path: voice.path(&self.base_dir),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::audio::SampleFormat;

    const YAML: &str = r#"
        audio:
          device: mock-device
          sample_rate: 48000
          sample_format: float
          max_frames_per_slice: 1024
        output_gain: 0.8
        voices:
          - name: guitar
            file: guitarStereo.caf
            gain: 0.5
          - name: beats
            file: /loops/beatsMono.caf
            enabled: false
    "#;

    #[test]
    fn test_host_parse() {
        let host = Host::parse(YAML, Path::new("/etc/loopmix")).unwrap();

        assert_eq!(host.audio().device(), "mock-device");
        assert_eq!(host.audio().max_frames_per_slice(), 1024);
        assert_eq!(host.output_gain(), 0.8);
        assert_eq!(host.min_input_gain(), 0.01);

        let format = host.target_format().unwrap();
        assert_eq!(format.sample_rate, 48000);
        assert_eq!(format.sample_format, SampleFormat::Float);

        let voices = host.voices();
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].name(), "guitar");
        assert_eq!(voices[0].gain(), 0.5);
        assert!(voices[0].enabled());
        assert_eq!(voices[1].gain(), 1.0);
        assert!(!voices[1].enabled());

        let sources = host.voice_sources();
        assert_eq!(
            sources[0].path,
            PathBuf::from("/etc/loopmix/guitarStereo.caf")
        );
        assert_eq!(sources[1].path, PathBuf::from("/loops/beatsMono.caf"));
    }

    #[test]
    fn test_host_requires_voices() {
        let yaml = r#"
            audio:
              device: mock-device
            voices: []
        "#;
        assert!(matches!(
            Host::parse(yaml, Path::new(".")),
            Err(ConfigError::NoVoices)
        ));
    }

    #[test]
    fn test_host_rejects_bad_format() {
        let yaml = r#"
            audio:
              device: mock-device
              sample_format: float
              bits_per_sample: 16
            voices:
              - name: guitar
                file: guitar.caf
        "#;
        assert!(matches!(
            Host::parse(yaml, Path::new(".")),
            Err(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_host_missing_audio_section() {
        let yaml = r#"
            voices:
              - name: guitar
                file: guitar.caf
        "#;
        assert!(matches!(
            Host::parse(yaml, Path::new(".")),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_host_deserialize_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loopmix.yaml");
        fs::write(&path, YAML).unwrap();

        let host = Host::deserialize(&path).unwrap();
        assert_eq!(host.base_dir(), dir.path());
        assert_eq!(
            host.voice_sources()[0].path,
            dir.path().join("guitarStereo.caf")
        );

        assert!(matches!(
            Host::deserialize(&dir.path().join("missing.yaml")),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_min_input_gain_clamped() {
        let yaml = r#"
            audio:
              device: mock-device
            min_input_gain: 2.5
            voices:
              - name: guitar
                file: guitar.caf
        "#;
        let host = Host::parse(yaml, Path::new(".")).unwrap();
        assert_eq!(host.min_input_gain(), 1.0);
    }
}
