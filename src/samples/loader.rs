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

//! Decoding of loop files into fixed point sample buffers.
//!
//! Loops are decoded completely into memory before playback starts, resampled to the
//! graph sample rate if needed and converted to the internal fixed point format.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample as SymphoniaSample;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info};

use super::error::LoadError;
use super::store::SampleStore;
use crate::audio::format::{to_fixed, Sample};

/// A fully decoded loop in planar fixed point.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Sample rate of the decoded data.
    pub sample_rate: u32,
    /// One buffer per channel, all the same length.
    pub channels: Vec<Vec<Sample>>,
}

impl DecodedAudio {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

/// Turns a loop file into sample buffers at the requested sample rate.
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path, target_sample_rate: u32) -> Result<DecodedAudio, LoadError>;
}

/// A voice to load: which slot it goes into and where its file lives.
#[derive(Debug, Clone)]
pub struct VoiceSource {
    pub name: String,
    pub path: PathBuf,
}

/// Decodes every voice into the store. Failed voices are marked unusable and the rest
/// still load. Returns the number of voices that loaded.
pub fn load_voices(
    store: &mut SampleStore,
    decoder: &dyn Decoder,
    voices: &[VoiceSource],
    sample_rate: u32,
) -> usize {
    let mut loaded = 0;
    for (index, voice) in voices.iter().enumerate() {
        info!(voice = %voice.name, path = ?voice.path, "Reading loop into memory");
        let decoded = match decoder.decode(&voice.path, sample_rate) {
            Ok(decoded) => decoded,
            Err(e) => {
                store.mark_unusable(index, &e);
                continue;
            }
        };

        let frame_count = decoded.frame_count();
        // The store records its own rejections.
        if let Err(e) = store.load(index, decoded.channels, frame_count) {
            debug!(voice = %voice.name, err = %e, "Voice rejected by store");
            continue;
        }
        loaded += 1;
    }
    loaded
}

/// Decodes any format symphonia knows about (CAF, WAV, AIFF, FLAC, MP3, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> SymphoniaDecoder {
        SymphoniaDecoder
    }

    /// Decodes the first audio track of the file into planar f32.
    fn decode_planar(path: &Path) -> Result<(Vec<Vec<f32>>, u32), LoadError> {
        let file_path = path.display().to_string();
        let file = File::open(path).map_err(|e| {
            LoadError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", file_path, e),
            ))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let decode_err = |source| LoadError::Decode {
            path: file_path.clone(),
            source,
        };

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(decode_err)?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LoadError::NoAudioTrack(file_path.clone()))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(decode_err)?;

        let mut planar: Vec<Vec<f32>> = Vec::new();
        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(e) => return Err(decode_err(e)),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // A corrupt packet is skipped rather than failing the whole loop.
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(path = %file_path, err = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(decode_err(e)),
            };

            if sample_rate == 0 {
                sample_rate = decoded.spec().rate;
            }
            Self::append_planar(&mut planar, decoded)?;
        }

        if planar.is_empty() {
            return Err(LoadError::Empty);
        }
        Ok((planar, sample_rate))
    }

    fn append_planar(planar: &mut Vec<Vec<f32>>, decoded: AudioBufferRef) -> Result<(), LoadError> {
        match decoded {
            AudioBufferRef::F32(buf) => Self::append_buffer(planar, &buf, |s| s),
            AudioBufferRef::F64(buf) => Self::append_buffer(planar, &buf, |s| s as f32),
            AudioBufferRef::S8(buf) => {
                Self::append_buffer(planar, &buf, |s| s as f32 / (1i64 << 7) as f32)
            }
            AudioBufferRef::S16(buf) => {
                Self::append_buffer(planar, &buf, |s| s as f32 / (1i64 << 15) as f32)
            }
            AudioBufferRef::S24(buf) => Self::append_buffer(planar, &buf, |s| {
                s.inner() as f32 / (1i64 << 23) as f32
            }),
            AudioBufferRef::S32(buf) => {
                Self::append_buffer(planar, &buf, |s| s as f32 / (1i64 << 31) as f32)
            }
            AudioBufferRef::U8(buf) => {
                Self::append_buffer(planar, &buf, |s| (s as f32 / u8::MAX as f32) * 2.0 - 1.0)
            }
            AudioBufferRef::U16(buf) => Self::append_buffer(planar, &buf, |s| {
                (s as f32 / u16::MAX as f32) * 2.0 - 1.0
            }),
            AudioBufferRef::U24(buf) => Self::append_buffer(planar, &buf, |s| {
                (s.inner() as f32 / ((1u32 << 24) - 1) as f32) * 2.0 - 1.0
            }),
            AudioBufferRef::U32(buf) => Self::append_buffer(planar, &buf, |s| {
                (s as f32 / u32::MAX as f32) * 2.0 - 1.0
            }),
        }
    }

    fn append_buffer<T, F>(
        planar: &mut Vec<Vec<f32>>,
        buf: &AudioBuffer<T>,
        convert: F,
    ) -> Result<(), LoadError>
    where
        T: SymphoniaSample,
        F: Fn(T) -> f32,
    {
        let channels = buf.spec().channels.count();
        if planar.is_empty() {
            planar.resize_with(channels, Vec::new);
        } else if planar.len() != channels {
            return Err(LoadError::UnsupportedChannels(channels));
        }

        for (ch, out) in planar.iter_mut().enumerate() {
            let samples = buf.chan(ch);
            out.try_reserve(samples.len())?;
            out.extend(samples.iter().map(|&s| convert(s)));
        }
        Ok(())
    }
}

impl Decoder for SymphoniaDecoder {
    fn decode(&self, path: &Path, target_sample_rate: u32) -> Result<DecodedAudio, LoadError> {
        let (planar, source_rate) = Self::decode_planar(path)?;

        let planar = if source_rate != 0 && source_rate != target_sample_rate {
            info!(
                path = ?path,
                source_rate,
                target_rate = target_sample_rate,
                "Resampling loop"
            );
            resample(&planar, source_rate, target_sample_rate)?
        } else {
            planar
        };

        let mut channels = Vec::with_capacity(planar.len());
        for channel in planar {
            let mut fixed = Vec::new();
            fixed.try_reserve_exact(channel.len())?;
            fixed.extend(channel.into_iter().map(to_fixed));
            channels.push(fixed);
        }

        let decoded = DecodedAudio {
            sample_rate: target_sample_rate,
            channels,
        };
        info!(
            path = ?path,
            channels = decoded.channel_count(),
            frames = decoded.frame_count(),
            duration_ms = decoded.duration().as_millis(),
            "Loop decoded"
        );
        Ok(decoded)
    }
}

/// Frames fed to the resampler per call.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Resamples planar audio with a sinc resampler. The result is exactly
/// `ceil(frames * target / source)` frames long, so the loop length stays sample accurate.
fn resample(
    planar: &[Vec<f32>],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<Vec<f32>>, LoadError> {
    let resample_err = |_| LoadError::Resample {
        source_rate,
        target_rate,
    };

    let frames = planar.first().map(Vec::len).unwrap_or(0);
    let ratio = target_rate as f64 / source_rate as f64;
    let target_frames = (frames as f64 * ratio).ceil() as usize;

    let sinc_params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, sinc_params, RESAMPLE_CHUNK_FRAMES, planar.len())
            .map_err(|_| LoadError::Resample {
                source_rate,
                target_rate,
            })?;
    let delay = resampler.output_delay();
    let mut scratch = resampler.output_buffer_allocate(true);

    let mut output: Vec<Vec<f32>> = Vec::with_capacity(planar.len());
    for _ in planar {
        let mut channel = Vec::new();
        channel.try_reserve_exact(target_frames + delay)?;
        output.push(channel);
    }
    let append = |output: &mut Vec<Vec<f32>>, scratch: &[Vec<f32>], frames: usize| {
        for (out, resampled) in output.iter_mut().zip(scratch) {
            out.extend_from_slice(&resampled[..frames]);
        }
    };

    let mut position = 0;
    while frames - position >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planar
            .iter()
            .map(|channel| &channel[position..position + needed])
            .collect();
        let (consumed, produced) = resampler
            .process_into_buffer(&chunk, &mut scratch, None)
            .map_err(resample_err)?;
        position += consumed;
        append(&mut output, &scratch, produced);
    }

    let rest: Vec<&[f32]> = planar.iter().map(|channel| &channel[position..]).collect();
    let (_, produced) = resampler
        .process_partial_into_buffer(Some(rest.as_slice()), &mut scratch, None)
        .map_err(resample_err)?;
    append(&mut output, &scratch, produced);

    // Flush the delay line until the tail of the loop has come out.
    while output.first().map(Vec::len).unwrap_or(0) < target_frames + delay {
        let (_, produced) = resampler
            .process_partial_into_buffer(None::<&[&[f32]]>, &mut scratch, None)
            .map_err(resample_err)?;
        if produced == 0 {
            break;
        }
        append(&mut output, &scratch, produced);
    }

    for channel in output.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.resize(target_frames, 0.0);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;
    use crate::audio::format::UNITY;
    use crate::testutil::write_wav;

    #[test]
    fn test_decode_stereo_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // Interleaved L/R pairs.
        write_wav(path.clone(), vec![0.5f32, -0.5, 0.25, -0.25, 0.0, 1.0], 2, 44100).unwrap();

        let decoded = SymphoniaDecoder::new().decode(&path, 44100).unwrap();
        assert_eq!(decoded.channel_count(), 2);
        assert_eq!(decoded.frame_count(), 3);
        assert_eq!(decoded.channels[0], vec![UNITY / 2, UNITY / 4, 0]);
        assert_eq!(decoded.channels[1], vec![-UNITY / 2, -UNITY / 4, UNITY]);
    }

    #[test]
    fn test_decode_mono_int_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(path.clone(), vec![0i16, 16384, -16384, 32767], 1, 44100).unwrap();

        let decoded = SymphoniaDecoder::new().decode(&path, 44100).unwrap();
        assert_eq!(decoded.channel_count(), 1);
        assert_eq!(decoded.frame_count(), 4);
        assert_eq!(decoded.channels[0][1], UNITY / 2);
        assert_eq!(decoded.channels[0][2], -UNITY / 2);
    }

    #[test]
    fn test_decode_resamples_to_target_rate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slow.wav");
        write_wav(path.clone(), vec![0.0f32; 2205], 1, 22050).unwrap();

        let decoded = SymphoniaDecoder::new().decode(&path, 44100).unwrap();
        assert_eq!(decoded.sample_rate, 44100);
        assert_eq!(decoded.frame_count(), 4410);
    }

    #[test]
    fn test_decode_missing_file() {
        let result = SymphoniaDecoder::new().decode(Path::new("/nonexistent/loop.caf"), 44100);
        assert!(matches!(result, Err(LoadError::Io(_))));
    }

    #[test]
    fn test_decode_garbage_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"this is not audio at all").unwrap();

        let result = SymphoniaDecoder::new().decode(&path, 44100);
        assert!(matches!(result, Err(LoadError::Decode { .. })));
    }

    #[test]
    fn test_resample_keeps_loop_length() {
        let sine: Vec<f32> = (0..4800)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 440.0 / 48000.0).sin() * 0.5)
            .collect();
        let planar = vec![sine.clone(), sine];

        let down = resample(&planar, 48000, 44100).unwrap();
        assert_eq!(down.len(), 2);
        assert!(down.iter().all(|channel| channel.len() == 4410));
        assert_eq!(down[0], down[1]);
        // The signal survives: peaks are near the source amplitude.
        let peak = down[0][100..4300]
            .iter()
            .fold(0.0f32, |peak, s| peak.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak was {}", peak);

        let up = resample(&planar[..1], 22050, 44100).unwrap();
        assert_eq!(up[0].len(), 9600);
    }

    #[test]
    fn test_resample_short_loop() {
        let planar = vec![vec![0.25f32; 10]];
        let up = resample(&planar, 44100, 48000).unwrap();
        assert_eq!(up[0].len(), 11);
    }

    /// Serves canned results, keyed by file name.
    struct CannedDecoder {
        results: HashMap<String, Vec<Vec<Sample>>>,
    }

    impl Decoder for CannedDecoder {
        fn decode(&self, path: &Path, target_sample_rate: u32) -> Result<DecodedAudio, LoadError> {
            let name = path.display().to_string();
            match self.results.get(&name) {
                Some(channels) => Ok(DecodedAudio {
                    sample_rate: target_sample_rate,
                    channels: channels.clone(),
                }),
                None => Err(LoadError::NoAudioTrack(name)),
            }
        }
    }

    #[test]
    fn test_load_voices_isolates_failures() {
        let decoder = CannedDecoder {
            results: HashMap::from([
                ("guitar".to_string(), vec![vec![1, 2, 3], vec![4, 5, 6]]),
                ("surround".to_string(), vec![vec![1], vec![2], vec![3]]),
                ("beats".to_string(), vec![vec![7, 8]]),
            ]),
        };
        let voices: Vec<VoiceSource> = ["guitar", "missing", "surround", "beats"]
            .iter()
            .map(|name| VoiceSource {
                name: name.to_string(),
                path: PathBuf::from(name),
            })
            .collect();

        let mut store = SampleStore::new(voices.len());
        let loaded = load_voices(&mut store, &decoder, &voices, 44100);

        assert_eq!(loaded, 2);
        assert!(store.voice(0).unwrap().is_stereo());
        assert!(!store.is_usable(1));
        assert!(store.unusable_reason(1).unwrap().contains("missing"));
        assert!(!store.is_usable(2));
        assert_eq!(store.voice(3).unwrap().frame_count(), 2);
    }
}
