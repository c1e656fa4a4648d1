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

//! The platform audio session: activation, hardware sample rate negotiation and the
//! interruption/route change events the session delivers to the host.

use std::fmt;

use crossbeam_channel::Receiver;

/// Why the output route changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChangeReason {
    /// The device playback was using went away (headphones unplugged, interface removed).
    OldDeviceUnavailable,
    /// A new output device appeared.
    NewDeviceAvailable,
    /// The session category changed.
    CategoryChange,
    Other,
}

impl fmt::Display for RouteChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RouteChangeReason::OldDeviceUnavailable => "old device unavailable",
            RouteChangeReason::NewDeviceAvailable => "new device available",
            RouteChangeReason::CategoryChange => "category change",
            RouteChangeReason::Other => "other",
        };
        f.write_str(reason)
    }
}

/// Asynchronous notifications from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Another party took the audio hardware.
    InterruptionBegan,
    /// The interruption is over. `should_resume` is the session's hint that playback may
    /// continue.
    InterruptionEnded { should_resume: bool },
    /// The output route changed.
    RouteChanged(RouteChangeReason),
}

/// Failures negotiating with the session. Playback does not start when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Unable to activate audio session: {0}")]
    Activation(String),

    #[error("Unable to negotiate sample rate (preferred {preferred} Hz): {reason}")]
    SampleRate { preferred: u32, reason: String },

    #[error("Audio session is not active")]
    Inactive,
}

/// The audio session of an output device.
pub trait Session {
    /// Activates the session, asking for the preferred hardware sample rate. Returns the rate
    /// the hardware actually runs at.
    fn activate(&self, preferred_sample_rate: u32) -> Result<u32, SessionError>;

    /// Deactivates the session.
    fn deactivate(&self);

    /// A stream of session events. Every call returns a receiver for the same stream.
    fn events(&self) -> Receiver<SessionEvent>;
}
