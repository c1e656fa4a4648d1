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
use std::{fmt, sync::Arc};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info, span, warn, Level, Span};

use crate::audio::{self, Graph, GraphConfig, GraphConfigError, Mixer};
use crate::config;
use crate::samples::{load_voices, Decoder, RenderFaultCounts, SampleStore};
use crate::session::{RouteChangeReason, SessionEvent};

/// Notifications for whoever presents playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started,
    Stopped,
    /// Playback stopped because another party took the audio hardware.
    Interrupted,
    /// Playback restarted after an interruption.
    Resumed,
    /// Playback stopped because the output device went away.
    RouteLost,
}

impl fmt::Display for PlaybackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let event = match self {
            PlaybackEvent::Started => "started",
            PlaybackEvent::Stopped => "stopped",
            PlaybackEvent::Interrupted => "interrupted",
            PlaybackEvent::Resumed => "resumed",
            PlaybackEvent::RouteLost => "route lost",
        };
        f.write_str(event)
    }
}

#[derive(Debug, Default)]
struct PlaybackState {
    playing: bool,
    /// Set when an interruption stopped playback, so the end of the interruption restarts it.
    interrupted_during_playback: bool,
}

/// A snapshot of one voice.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceStatus {
    pub name: String,
    pub loaded: bool,
    /// Why the voice can't play, if it can't.
    pub unusable_reason: Option<String>,
    pub stereo: bool,
    pub frame_count: usize,
    pub cursor: usize,
    pub enabled: bool,
    pub gain: f32,
}

/// A snapshot of the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostStatus {
    pub playing: bool,
    pub interrupted_during_playback: bool,
    pub sample_rate: u32,
    pub output_gain: f32,
    pub voices: Vec<VoiceStatus>,
    pub faults: RenderFaultCounts,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} at {} Hz, output gain {:.2}",
            if self.playing { "Playing" } else { "Stopped" },
            self.sample_rate,
            self.output_gain
        )?;
        for (index, voice) in self.voices.iter().enumerate() {
            if !voice.loaded {
                writeln!(
                    f,
                    "  {} {}: unusable ({})",
                    index,
                    voice.name,
                    voice.unusable_reason.as_deref().unwrap_or("unknown")
                )?;
                continue;
            }
            writeln!(
                f,
                "  {} {}: {} {}, gain {:.2}, frame {} of {}",
                index,
                voice.name,
                if voice.enabled { "on" } else { "off" },
                if voice.stereo { "stereo" } else { "mono" },
                voice.gain,
                voice.cursor,
                voice.frame_count
            )?;
        }
        write!(
            f,
            "  render faults: {} unusable voice, {} missing destination, {} short destination",
            self.faults.unusable_voice, self.faults.missing_destination, self.faults.short_destination
        )
    }
}

/// Owns the mixer graph and the output device and drives playback: start, stop, voice
/// enabling, gains, and the reactions to session interruptions and route changes.
pub struct MixerHost {
    /// The device the graph plays through.
    device: Arc<dyn audio::Device>,
    /// The mixer graph. The output stream holds the other references while it runs.
    graph: Arc<Graph>,
    /// The rate asked for when (re)activating the session.
    preferred_sample_rate: u32,
    /// Input gains never go below this.
    min_input_gain: f32,
    voice_names: Vec<String>,
    state: Mutex<PlaybackState>,
    /// Fault counts at the last check.
    last_faults: Mutex<RenderFaultCounts>,
    events_tx: Sender<PlaybackEvent>,
    events_rx: Receiver<PlaybackEvent>,
    /// The logging span.
    span: Span,
}

impl MixerHost {
    /// Activates the device's session, decodes every voice at the negotiated rate and builds
    /// the graph. Voices that fail to load are kept as unusable buses.
    pub fn new(
        config: &config::Host,
        device: Arc<dyn audio::Device>,
        decoder: &dyn Decoder,
    ) -> Result<MixerHost, GraphConfigError> {
        let span = span!(Level::INFO, "mixer host");
        let _enter = span.enter();

        let preferred_sample_rate = config.audio().sample_rate();
        let sample_rate = device.activate(preferred_sample_rate)?;
        if sample_rate != preferred_sample_rate {
            warn!(
                preferred = preferred_sample_rate,
                actual = sample_rate,
                "Hardware sample rate differs from the preferred rate"
            );
        }

        let sources = config.voice_sources();
        let mut store = SampleStore::new(sources.len());
        let loaded = load_voices(&mut store, decoder, &sources, sample_rate);
        info!(
            loaded,
            voices = sources.len(),
            sample_rate,
            "Voices loaded"
        );

        let graph_config = GraphConfig {
            buses: sources.len(),
            max_frames_per_slice: config.audio().max_frames_per_slice(),
            sample_rate,
        };
        let graph = Arc::new(Graph::new(store, &graph_config)?);

        let min_input_gain = config.min_input_gain();
        for (bus, voice) in config.voices().iter().enumerate() {
            graph.set_input_gain(bus, voice.gain().max(min_input_gain))?;
            graph.set_bus_enabled(bus, voice.enabled())?;
        }
        graph.set_output_gain(config.output_gain());

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        drop(_enter);
        Ok(MixerHost {
            device,
            graph,
            preferred_sample_rate,
            min_input_gain,
            voice_names: sources.into_iter().map(|source| source.name).collect(),
            state: Mutex::new(PlaybackState::default()),
            last_faults: Mutex::new(RenderFaultCounts::default()),
            events_tx,
            events_rx,
            span,
        })
    }

    /// Starts playback. Does nothing if already playing.
    pub fn start(&self) -> Result<(), GraphConfigError> {
        let _enter = self.span.enter();
        let mut state = self.state.lock();
        if state.playing {
            info!("Already playing");
            return Ok(());
        }

        self.start_output(&mut state)?;
        self.notify(PlaybackEvent::Started);
        Ok(())
    }

    /// Stops playback. Does nothing if not playing.
    pub fn stop(&self) -> Result<(), GraphConfigError> {
        let _enter = self.span.enter();
        let mut state = self.state.lock();
        if !state.playing {
            return Ok(());
        }

        self.stop_output(&mut state)?;
        self.notify(PlaybackEvent::Stopped);
        Ok(())
    }

    fn start_output(&self, state: &mut PlaybackState) -> Result<(), GraphConfigError> {
        let sample_rate = self.device.activate(self.preferred_sample_rate)?;
        if sample_rate != self.graph.sample_rate() {
            warn!(
                graph = self.graph.sample_rate(),
                hardware = sample_rate,
                "Hardware sample rate no longer matches the graph"
            );
        }

        // No callback is running, so the control thread is the only cursor writer.
        self.graph.apply_pending_resyncs();
        self.device.start(Mixer::new(self.graph.clone()))?;
        state.playing = true;
        info!(device = %self.device, "Playback started");
        Ok(())
    }

    fn stop_output(&self, state: &mut PlaybackState) -> Result<(), GraphConfigError> {
        let result = self.device.stop();
        state.playing = false;
        result?;
        info!(device = %self.device, "Playback stopped");
        Ok(())
    }

    /// Turns a voice on or off. A voice that is turned on picks up the position of another
    /// playing voice, so the loops stay aligned.
    pub fn enable(&self, voice: usize, on: bool) -> Result<(), GraphConfigError> {
        let _enter = self.span.enter();
        let state = self.state.lock();

        let scheduled = self.graph.set_bus_enabled(voice, on)?;
        if scheduled && !state.playing {
            self.graph.apply_pending_resync(voice);
        }
        info!(voice = self.voice_name(voice), on, "Voice toggled");
        Ok(())
    }

    /// Sets a voice's input gain, clamped to the configured minimum. Returns the gain applied.
    pub fn set_input_gain(&self, voice: usize, gain: f32) -> Result<f32, GraphConfigError> {
        let gain = if gain.is_nan() {
            self.min_input_gain
        } else {
            gain.clamp(self.min_input_gain, 1.0)
        };
        self.graph.set_input_gain(voice, gain)?;
        Ok(gain)
    }

    /// Sets the output gain.
    pub fn set_output_gain(&self, gain: f32) {
        self.graph.set_output_gain(gain);
    }

    /// Reacts to an interruption or a route change.
    pub fn handle_session_event(&self, event: SessionEvent) {
        let _enter = self.span.enter();
        match event {
            SessionEvent::InterruptionBegan => self.interruption_began(),
            SessionEvent::InterruptionEnded { should_resume } => {
                self.interruption_ended(should_resume)
            }
            SessionEvent::RouteChanged(reason) => self.route_changed(reason),
        }
    }

    fn interruption_began(&self) {
        let mut state = self.state.lock();
        if !state.playing {
            info!("Audio session interrupted while stopped");
            return;
        }

        info!("Audio session interrupted during playback");
        state.interrupted_during_playback = true;
        if let Err(e) = self.stop_output(&mut state) {
            error!(err = %e, "Unable to stop playback for interruption");
        }
        self.device.deactivate();
        self.notify(PlaybackEvent::Interrupted);
    }

    fn interruption_ended(&self, should_resume: bool) {
        if !should_resume {
            info!("Audio session interruption ended without resume");
            return;
        }

        if let Err(e) = self.device.activate(self.preferred_sample_rate) {
            error!(err = %e, "Unable to reactivate audio session");
            return;
        }

        let mut state = self.state.lock();
        if !state.interrupted_during_playback {
            info!("Audio session interruption ended");
            return;
        }

        state.interrupted_during_playback = false;
        match self.start_output(&mut state) {
            Ok(()) => {
                info!("Playback resumed after interruption");
                self.notify(PlaybackEvent::Resumed);
            }
            Err(e) => error!(err = %e, "Unable to resume playback after interruption"),
        }
    }

    fn route_changed(&self, reason: RouteChangeReason) {
        let mut state = self.state.lock();
        if reason != RouteChangeReason::OldDeviceUnavailable || !state.playing {
            info!(%reason, playing = state.playing, "Audio route changed");
            return;
        }

        warn!(%reason, "Output device lost, stopping playback");
        if let Err(e) = self.stop_output(&mut state) {
            error!(err = %e, "Unable to stop playback after route change");
        }
        self.notify(PlaybackEvent::RouteLost);
    }

    fn notify(&self, event: PlaybackEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Playback notifications. Every call returns a receiver for the same stream.
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    /// Session events from the device, to be fed back into
    /// [`handle_session_event`](Self::handle_session_event).
    pub fn session_events(&self) -> Receiver<SessionEvent> {
        self.device.events()
    }

    /// Handles every session event that is already queued.
    pub fn drain_session_events(&self) -> usize {
        let events = self.device.events();
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_session_event(event);
            handled += 1;
        }
        handled
    }

    /// Logs render faults that happened since the last check and returns them.
    pub fn check_faults(&self) -> RenderFaultCounts {
        let counts = self.graph.engine().faults().counts();
        let mut last = self.last_faults.lock();
        let delta = counts.since(&last);
        *last = counts;

        if delta.total() > 0 {
            let _enter = self.span.enter();
            warn!(
                unusable_voice = delta.unusable_voice,
                missing_destination = delta.missing_destination,
                short_destination = delta.short_destination,
                "Render faults substituted silence"
            );
        }
        delta
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn voice_count(&self) -> usize {
        self.voice_names.len()
    }

    fn voice_name(&self, voice: usize) -> &str {
        self.voice_names
            .get(voice)
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// A snapshot of playback and every voice.
    pub fn status(&self) -> HostStatus {
        let state = self.state.lock();
        let store = self.graph.store();
        let voices = self
            .graph
            .buses()
            .iter()
            .enumerate()
            .map(|(index, bus)| {
                let voice = store.voice(index);
                VoiceStatus {
                    name: self.voice_name(index).to_string(),
                    loaded: voice.is_some(),
                    unusable_reason: store.unusable_reason(index).map(str::to_string),
                    stereo: voice.map(|v| v.is_stereo()).unwrap_or(false),
                    frame_count: voice.map(|v| v.frame_count()).unwrap_or(0),
                    cursor: voice.map(|v| v.cursor()).unwrap_or(0),
                    enabled: bus.is_enabled(),
                    gain: bus.gain(),
                }
            })
            .collect();

        HostStatus {
            playing: state.playing,
            interrupted_during_playback: state.interrupted_during_playback,
            sample_rate: self.graph.sample_rate(),
            output_gain: self.graph.output_gain(),
            voices,
            faults: self.graph.engine().faults().counts(),
        }
    }
}

impl Drop for MixerHost {
    fn drop(&mut self) {
        // The stream must release its graph references before the buffers can go.
        if let Err(e) = self.device.stop() {
            error!(err = %e, "Unable to stop output device");
        }
        self.device.deactivate();
    }
}
