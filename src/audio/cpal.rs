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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use thread_priority::ThreadPriorityValue;
use tracing::{error, info, span, warn, Level};

use super::graph::GraphConfigError;
use super::mixer::Mixer;
use super::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled, PriorityReport,
};
use crate::{
    audio::{Device as AudioDevice, SampleFormat, TargetFormat},
    config,
    session::{RouteChangeReason, Session, SessionError, SessionEvent},
};

/// How long the output thread waits before reporting the callback thread's priority.
const PRIORITY_REPORT_DELAY: Duration = Duration::from_millis(500);

/// A small wrapper around a cpal::Device that owns the output stream and the session state.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The format the stream is opened with. The sample rate is replaced on activation.
    target_format: TargetFormat,
    /// The hardware rate negotiated by the last activation.
    sample_rate: AtomicU32,
    active: AtomicBool,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    /// The thread that owns the running stream.
    output: Mutex<Option<OutputThread>>,
}

/// cpal streams aren't `Send` on every host, so each one lives and dies on its own thread.
struct OutputThread {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// Builds the data callback around the mixer. The thread priority is raised on the first call.
fn create_callback<T>(
    mut mixer: Mixer,
    channels: usize,
    priority: ThreadPriorityValue,
    rt_audio: bool,
    report: Arc<PriorityReport>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: SizedSample + FromSample<f32>,
{
    let mut priority_set = false;
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        if let Some(outcome) =
            configure_audio_thread_priority(priority, rt_audio, &mut priority_set)
        {
            report.publish(outcome);
        }
        mixer.process(data, channels);
    }
}

/// Builds the error callback. A vanished device is reported to the session.
fn create_error_callback(
    events_tx: Sender<SessionEvent>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| match err {
        cpal::StreamError::DeviceNotAvailable => {
            warn!("Output device is no longer available");
            let _ = events_tx.try_send(SessionEvent::RouteChanged(
                RouteChangeReason::OldDeviceUnavailable,
            ));
        }
        other => error!(err = %other, "CPAL output stream error"),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Mixer,
    events_tx: Sender<SessionEvent>,
    report: Arc<PriorityReport>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let callback = create_callback::<T>(
        mixer,
        config.channels as usize,
        callback_thread_priority(),
        rt_audio_enabled(),
        report,
    );
    device.build_output_stream(config, callback, create_error_callback(events_tx), None)
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let output_configs = match device.supported_output_configs() {
                    Ok(output_configs) => output_configs,
                    Err(_) => continue,
                };
                let max_channels = output_configs
                    .map(|output_config| output_config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device::new(
                        device.name()?,
                        max_channels,
                        host_id,
                        device,
                        TargetFormat::default(),
                    ));
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    fn new(
        name: String,
        max_channels: u16,
        host_id: cpal::HostId,
        device: cpal::Device,
        target_format: TargetFormat,
    ) -> Device {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Device {
            name,
            max_channels,
            host_id,
            device,
            sample_rate: AtomicU32::new(target_format.sample_rate),
            target_format,
            active: AtomicBool::new(false),
            events_tx,
            events_rx,
            output: Mutex::new(None),
        }
    }

    /// Gets the given cpal device. `default` picks the default output device of the default host.
    pub fn get(config: &config::Audio) -> Result<Device, GraphConfigError> {
        let target_format = TargetFormat::new(
            config.sample_rate(),
            config
                .sample_format()
                .map_err(|e| GraphConfigError::UnsupportedFormat(e.to_string()))?,
            config.bits_per_sample(),
        )
        .map_err(|e| GraphConfigError::UnsupportedFormat(e.to_string()))?;

        let name = config.device();
        if name == "default" {
            return Device::default_device(target_format);
        }

        match Device::list_cpal_devices()
            .map_err(|e| GraphConfigError::DeviceNotFound(e.to_string()))?
            .into_iter()
            .find(|device| device.name.trim() == name)
        {
            Some(mut device) => {
                device.sample_rate = AtomicU32::new(target_format.sample_rate);
                device.target_format = target_format;
                Ok(device)
            }
            None => Err(GraphConfigError::DeviceNotFound(name.to_string())),
        }
    }

    fn default_device(target_format: TargetFormat) -> Result<Device, GraphConfigError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| GraphConfigError::DeviceNotFound("default".to_string()))?;
        let max_channels = device
            .supported_output_configs()
            .map_err(|e| GraphConfigError::DeviceNotFound(e.to_string()))?
            .map(|output_config| output_config.channels())
            .max()
            .unwrap_or(0);
        if max_channels == 0 {
            return Err(GraphConfigError::DeviceNotFound(
                "default device has no outputs".to_string(),
            ));
        }
        let name = device
            .name()
            .map_err(|e| GraphConfigError::DeviceNotFound(e.to_string()))?;

        Ok(Device::new(
            name,
            max_channels,
            host.id(),
            device,
            target_format,
        ))
    }

    /// Picks the preferred rate if any output config covers it, otherwise the device default.
    fn negotiate_sample_rate(&self, preferred: u32) -> Result<u32, SessionError> {
        let to_session_error = |e: &dyn Error| SessionError::SampleRate {
            preferred,
            reason: e.to_string(),
        };

        let supported = self
            .device
            .supported_output_configs()
            .map_err(|e| to_session_error(&e))?
            .filter(|range| range.channels() >= self.channels())
            .any(|range| {
                range.min_sample_rate() <= preferred && preferred <= range.max_sample_rate()
            });
        if supported {
            return Ok(preferred);
        }

        let fallback = self
            .device
            .default_output_config()
            .map_err(|e| to_session_error(&e))?
            .sample_rate();
        warn!(
            device = self.name,
            preferred, fallback, "Preferred sample rate unsupported, using device default"
        );
        Ok(fallback)
    }
}

impl Session for Device {
    fn activate(&self, preferred_sample_rate: u32) -> Result<u32, SessionError> {
        let rate = self.negotiate_sample_rate(preferred_sample_rate)?;
        self.sample_rate.store(rate, Ordering::Release);
        self.active.store(true, Ordering::Release);
        info!(device = self.name, sample_rate = rate, "Audio session activated");
        Ok(rate)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        info!(device = self.name, "Audio session deactivated");
    }

    fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }
}

impl AudioDevice for Device {
    fn start(&self, mixer: Mixer) -> Result<(), GraphConfigError> {
        let span = span!(Level::INFO, "start output (cpal)");
        let _enter = span.enter();

        let mut output = self.output.lock();
        if output.is_some() {
            return Err(GraphConfigError::AlreadyRunning);
        }
        if !self.active.load(Ordering::Acquire) {
            return Err(SessionError::Inactive.into());
        }

        let format = self
            .target_format
            .with_sample_rate(self.sample_rate.load(Ordering::Acquire));
        let config = cpal::StreamConfig {
            channels: self.channels(),
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let device = self.device.clone();
        let events_tx = self.events_tx.clone();
        let name = self.name.clone();
        let stream_format = format.clone();
        let stream_config = config.clone();

        let handle = thread::spawn(move || {
            let (format, config) = (stream_format, stream_config);
            let report = Arc::new(PriorityReport::new());
            let stream_result = match (format.sample_format, format.bits_per_sample) {
                (SampleFormat::Float, _) => {
                    build_stream::<f32>(&device, &config, mixer, events_tx, report.clone())
                }
                (SampleFormat::Int, 16) => {
                    build_stream::<i16>(&device, &config, mixer, events_tx, report.clone())
                }
                (SampleFormat::Int, _) => {
                    build_stream::<i32>(&device, &config, mixer, events_tx, report.clone())
                }
            };

            let stream = match stream_result {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            if let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(PRIORITY_REPORT_DELAY) {
                report.log();
                let _ = stop_rx.recv();
            }

            // Dropping the stream joins the callback, taking the mixer with it.
            drop(stream);
            info!(device = name, "CPAL output stream stopped");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    device = self.name,
                    sample_rate = format.sample_rate,
                    sample_format = %format.sample_format,
                    bits_per_sample = format.bits_per_sample,
                    channels = config.channels,
                    "CPAL output stream started"
                );
                *output = Some(OutputThread { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                error!(device = self.name, err = %e, "Failed to start CPAL stream");
                Err(GraphConfigError::Stream(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(GraphConfigError::ThreadPanicked)
            }
        }
    }

    fn stop(&self) -> Result<(), GraphConfigError> {
        let output = match self.output.lock().take() {
            Some(output) => output,
            None => return Ok(()),
        };

        let _ = output.stop_tx.send(());
        output
            .handle
            .join()
            .map_err(|_| GraphConfigError::ThreadPanicked)
    }

    fn is_running(&self) -> bool {
        self.output.lock().is_some()
    }

    fn channels(&self) -> u16 {
        self.max_channels.min(2)
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<super::mock::Device>, Box<dyn Error>> {
        Err("not a mock".into())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(device = self.name, err = %e, "Unable to stop output stream");
        }
    }
}
