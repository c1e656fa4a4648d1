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

use std::sync::atomic::{AtomicU8, Ordering};

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the audio callback thread when LOOPMIX_THREAD_PRIORITY is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

const PRIORITY_ENV: &str = "LOOPMIX_THREAD_PRIORITY";
const DISABLE_RT_ENV: &str = "LOOPMIX_DISABLE_RT_AUDIO";

/// Reads LOOPMIX_THREAD_PRIORITY (0-99) once; used when building the callback so the env is
/// never touched on the audio thread.
pub fn callback_thread_priority() -> ThreadPriorityValue {
    std::env::var(PRIORITY_ENV)
        .ok()
        .and_then(|v| {
            let n = v.parse::<u8>().ok()?;
            (n < 100).then(|| ThreadPriorityValue::try_from(n).ok())?
        })
        .unwrap_or_else(default_priority)
}

fn default_priority() -> ThreadPriorityValue {
    ThreadPriorityValue::try_from(DEFAULT_CALLBACK_THREAD_PRIORITY).unwrap()
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for the audio callback thread.
/// Default: enabled. Opt out with LOOPMIX_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !env_flag(DISABLE_RT_ENV)
}

/// What happened when the callback thread tried to raise its priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PriorityOutcome {
    /// The callback hasn't run yet.
    Pending = 0,
    /// The cross-platform priority was applied, RT scheduling was not attempted.
    Raised = 1,
    /// SCHED_FIFO is active.
    Realtime = 2,
    /// RT scheduling was requested and refused.
    RealtimeRefused = 3,
}

/// Publishes the outcome from the audio thread so it can be logged elsewhere.
#[derive(Debug, Default)]
pub struct PriorityReport(AtomicU8);

impl PriorityReport {
    pub fn new() -> PriorityReport {
        PriorityReport(AtomicU8::new(PriorityOutcome::Pending as u8))
    }

    pub fn publish(&self, outcome: PriorityOutcome) {
        self.0.store(outcome as u8, Ordering::Release);
    }

    pub fn outcome(&self) -> PriorityOutcome {
        match self.0.load(Ordering::Acquire) {
            1 => PriorityOutcome::Raised,
            2 => PriorityOutcome::Realtime,
            3 => PriorityOutcome::RealtimeRefused,
            _ => PriorityOutcome::Pending,
        }
    }

    /// Logs the outcome. Never call this from the audio thread.
    pub fn log(&self) {
        match self.outcome() {
            PriorityOutcome::Pending => {}
            PriorityOutcome::Raised => info!("Raised audio callback thread priority"),
            PriorityOutcome::Realtime => info!("Enabled RT SCHED_FIFO for audio callback thread"),
            PriorityOutcome::RealtimeRefused => {
                warn!("Failed to set RT SCHED_FIFO for audio callback thread")
            }
        }
    }
}

/// Raises the priority of the calling thread once. Does not log, so it is safe to call from
/// the audio callback.
pub fn configure_audio_thread_priority(
    priority: ThreadPriorityValue,
    rt_audio: bool,
    priority_set: &mut bool,
) -> Option<PriorityOutcome> {
    if *priority_set {
        return None;
    }
    *priority_set = true;

    let tp = ThreadPriority::Crossplatform(priority);
    let _ = set_current_thread_priority(tp);

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        return Some(
            match set_thread_priority_and_policy(
                tid,
                tp,
                ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
            ) {
                Ok(()) => PriorityOutcome::Realtime,
                Err(_) => PriorityOutcome::RealtimeRefused,
            },
        );
    }

    #[cfg(not(unix))]
    let _ = rt_audio;

    Some(PriorityOutcome::Raised)
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_callback_thread_priority_from_env() {
        std::env::remove_var(PRIORITY_ENV);
        assert_eq!(callback_thread_priority(), default_priority());

        std::env::set_var(PRIORITY_ENV, "42");
        assert_eq!(
            callback_thread_priority(),
            ThreadPriorityValue::try_from(42u8).unwrap()
        );

        std::env::set_var(PRIORITY_ENV, "150");
        assert_eq!(callback_thread_priority(), default_priority());

        std::env::set_var(PRIORITY_ENV, "high");
        assert_eq!(callback_thread_priority(), default_priority());
        std::env::remove_var(PRIORITY_ENV);
    }

    #[test]
    #[serial]
    fn test_rt_audio_opt_out() {
        std::env::remove_var(DISABLE_RT_ENV);
        assert!(rt_audio_enabled());
        for value in ["1", "true", "YES", "on"] {
            std::env::set_var(DISABLE_RT_ENV, value);
            assert!(!rt_audio_enabled(), "{} should disable RT audio", value);
        }
        std::env::set_var(DISABLE_RT_ENV, "0");
        assert!(rt_audio_enabled());
        std::env::remove_var(DISABLE_RT_ENV);
    }

    #[test]
    fn test_configure_runs_once() {
        let mut priority_set = false;
        let first = configure_audio_thread_priority(default_priority(), false, &mut priority_set);
        assert_eq!(first, Some(PriorityOutcome::Raised));
        assert!(priority_set);
        assert_eq!(
            configure_audio_thread_priority(default_priority(), false, &mut priority_set),
            None
        );
    }

    #[test]
    fn test_priority_report() {
        let report = PriorityReport::new();
        assert_eq!(report.outcome(), PriorityOutcome::Pending);
        report.publish(PriorityOutcome::RealtimeRefused);
        assert_eq!(report.outcome(), PriorityOutcome::RealtimeRefused);
    }
}
