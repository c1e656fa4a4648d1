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
// Real-time mixing logic shared by the CPAL and mock devices.
use std::sync::Arc;

use cpal::{FromSample, SizedSample};

use super::format::{to_float, Sample};
use super::graph::Graph;
use crate::samples::{BusBuffers, RenderStatus};

/// Pulls every enabled bus through the render engine and mixes the result into the
/// device buffer. Owned by the output callback; all buffers are allocated up front.
pub struct Mixer {
    graph: Arc<Graph>,
    /// Per-bus render targets, `max_frames_per_slice` long.
    bus_left: Box<[Box<[Sample]>]>,
    bus_right: Box<[Box<[Sample]>]>,
    /// Mixed output for the current slice.
    mix_left: Box<[f32]>,
    mix_right: Box<[f32]>,
    /// The gain of every bus that is pulled in the current slice.
    audible: Box<[Option<f32>]>,
}

impl Mixer {
    /// Creates a new mixer for the graph.
    pub fn new(graph: Arc<Graph>) -> Mixer {
        let slice = graph.max_frames_per_slice();
        let buses = graph.bus_count();
        let scratch = || -> Box<[Box<[Sample]>]> {
            (0..buses)
                .map(|_| vec![0; slice].into_boxed_slice())
                .collect()
        };

        Mixer {
            bus_left: scratch(),
            bus_right: scratch(),
            mix_left: vec![0.0; slice].into_boxed_slice(),
            mix_right: vec![0.0; slice].into_boxed_slice(),
            audible: vec![None; buses].into_boxed_slice(),
            graph,
        }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Fills an interleaved device buffer with `channels` channels. Mono devices receive the
    /// average of left and right, channels past the second are silent.
    pub fn process<T>(&mut self, out: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        let silence = T::from_sample(0.0f32);
        if channels == 0 {
            out.fill(silence);
            return;
        }

        let slice = self.graph.max_frames_per_slice();
        for chunk in out.chunks_mut(slice * channels) {
            let frames = chunk.len() / channels;
            self.mix_slice(frames);

            let output_gain = self.graph.output_gain();
            let mixed = self.mix_left[..frames]
                .iter()
                .zip(self.mix_right[..frames].iter());
            for (frame, (&left, &right)) in chunk.chunks_exact_mut(channels).zip(mixed) {
                let left = (left * output_gain).clamp(-1.0, 1.0);
                let right = (right * output_gain).clamp(-1.0, 1.0);
                if channels == 1 {
                    frame[0] = T::from_sample((left + right) * 0.5);
                    continue;
                }
                frame[0] = T::from_sample(left);
                frame[1] = T::from_sample(right);
                frame[2..].fill(silence);
            }

            // A trailing partial frame can't be addressed by channel.
            let remainder = chunk.len() % channels;
            if remainder != 0 {
                let len = chunk.len();
                chunk[len - remainder..].fill(silence);
            }
        }
    }

    /// Mixes `frames` frames of every audible bus into the mix buffers.
    fn mix_slice(&mut self, frames: usize) {
        let Mixer {
            graph,
            bus_left,
            bus_right,
            mix_left,
            mix_right,
            audible,
        } = self;

        let mix_left = &mut mix_left[..frames];
        let mix_right = &mut mix_right[..frames];
        mix_left.fill(0.0);
        mix_right.fill(0.0);

        for (index, bus) in graph.buses().iter().enumerate() {
            // A silent bus is not pulled at all, so its cursor stands still.
            let gain = bus.gain();
            audible[index] = (bus.is_enabled() && gain != 0.0 && graph.store().is_usable(index))
                .then_some(gain);
        }

        // A resync is published before its bus is enabled, so every bus seen enabled above
        // has its pending resync visible here. All of them land before any bus renders, so
        // source and target start the slice at the same position.
        for (index, gain) in audible.iter().enumerate() {
            if gain.is_some() {
                graph.apply_pending_resync(index);
            }
        }

        for (index, gain) in audible.iter().enumerate() {
            let gain = match gain {
                Some(gain) => *gain,
                None => continue,
            };

            let left = &mut bus_left[index][..frames];
            let right = &mut bus_right[index][..frames];
            let status = graph
                .engine()
                .render(index, frames, BusBuffers::new(left, right));
            if status != RenderStatus::Rendered {
                continue;
            }

            for (mixed, &sample) in mix_left.iter_mut().zip(bus_left[index][..frames].iter()) {
                *mixed += to_float(sample) * gain;
            }
            for (mixed, &sample) in mix_right.iter_mut().zip(bus_right[index][..frames].iter()) {
                *mixed += to_float(sample) * gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::UNITY;
    use crate::audio::graph::GraphConfig;
    use crate::samples::SampleStore;

    fn graph(voices: Vec<Vec<Vec<Sample>>>, max_frames_per_slice: usize) -> Arc<Graph> {
        let mut store = SampleStore::new(voices.len());
        for (voice, channels) in voices.into_iter().enumerate() {
            let frames = channels[0].len();
            store.load(voice, channels, frames).unwrap();
        }
        let mut config = GraphConfig::new(store.voice_count(), 44100);
        config.max_frames_per_slice = max_frames_per_slice;
        Arc::new(Graph::new(store, &config).unwrap())
    }

    #[test]
    fn test_mix_stereo_and_mono() {
        let half = UNITY / 2;
        let quarter = UNITY / 4;
        let graph = graph(
            vec![
                vec![vec![half; 8], vec![0; 8]],
                vec![vec![quarter; 8]],
            ],
            64,
        );
        let mut mixer = Mixer::new(graph.clone());

        let mut out = vec![0.0f32; 8];
        mixer.process(&mut out, 2);
        assert_eq!(out, vec![0.75, 0.25, 0.75, 0.25, 0.75, 0.25, 0.75, 0.25]);
        assert_eq!(graph.store().cursor_of(0), Some(4));
        assert_eq!(graph.store().cursor_of(1), Some(4));
    }

    #[test]
    fn test_gains() {
        let graph = graph(vec![vec![vec![UNITY / 2; 4]]], 64);
        let mut mixer = Mixer::new(graph.clone());

        graph.set_input_gain(0, 0.5).unwrap();
        graph.set_output_gain(0.5);
        let mut out = vec![0.0f32; 4];
        mixer.process(&mut out, 2);
        assert_eq!(out, vec![0.125; 4]);
    }

    #[test]
    fn test_disabled_and_silent_buses_are_not_rendered() {
        let graph = graph(vec![vec![vec![UNITY / 2; 16]], vec![vec![UNITY / 2; 16]]], 64);
        let mut mixer = Mixer::new(graph.clone());

        graph.set_bus_enabled(0, false).unwrap();
        graph.set_input_gain(1, 0.0).unwrap();
        let mut out = vec![1.0f32; 8];
        mixer.process(&mut out, 2);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(graph.store().cursor_of(0), Some(0));
        assert_eq!(graph.store().cursor_of(1), Some(0));
    }

    #[test]
    fn test_unusable_voice_is_skipped() {
        let mut store = SampleStore::new(2);
        store.load(0, vec![vec![UNITY / 2; 4]], 4).unwrap();
        let graph = Arc::new(Graph::new(store, &GraphConfig::new(2, 44100)).unwrap());
        let mut mixer = Mixer::new(graph.clone());

        let mut out = vec![0.0f32; 4];
        mixer.process(&mut out, 2);
        assert_eq!(out, vec![0.5; 4]);
        assert_eq!(graph.engine().faults().counts().total(), 0);
    }

    #[test]
    fn test_device_buffer_split_into_slices() {
        let ramp: Vec<Sample> = (0..10).map(|i| i * (UNITY / 16)).collect();
        let graph = graph(vec![vec![ramp]], 3);
        let mut mixer = Mixer::new(graph.clone());

        let mut out = vec![0.0f32; 14];
        mixer.process(&mut out, 1);
        let expected: Vec<f32> = (0..14).map(|i| (i % 10) as f32 / 16.0).collect();
        assert_eq!(out, expected);
        assert_eq!(graph.store().cursor_of(0), Some(4));
    }

    #[test]
    fn test_extra_channels_are_silent() {
        let graph = graph(vec![vec![vec![UNITY / 2; 4], vec![UNITY / 4; 4]]], 64);
        let mut mixer = Mixer::new(graph);

        let mut out = vec![1.0f32; 8];
        mixer.process(&mut out, 4);
        assert_eq!(out, vec![0.5, 0.25, 0.0, 0.0, 0.5, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_integer_output() {
        let graph = graph(vec![vec![vec![UNITY / 2; 4]]], 64);
        let mut mixer = Mixer::new(graph);

        let mut out = vec![0i16; 4];
        mixer.process(&mut out, 2);
        assert_eq!(out, vec![16384; 4]);
    }

    #[test]
    fn test_enable_resyncs_before_render() {
        let ramp: Vec<Sample> = (0..200).collect();
        let graph = graph(vec![vec![ramp.clone()], vec![ramp]], 4096);
        let mut mixer = Mixer::new(graph.clone());

        graph.set_bus_enabled(1, false).unwrap();
        graph.store().set_cursor(0, 80);
        graph.store().set_cursor(1, 40);

        let mut out = vec![0.0f32; 80];
        mixer.process(&mut out, 2);
        assert_eq!(graph.store().cursor_of(0), Some(120));
        assert_eq!(graph.store().cursor_of(1), Some(40));

        graph.set_bus_enabled(1, true).unwrap();
        mixer.process(&mut out, 2);
        // Both voices started the period at 120.
        assert_eq!(graph.store().cursor_of(0), Some(160));
        assert_eq!(graph.store().cursor_of(1), Some(160));
    }
}
