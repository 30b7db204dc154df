//! Non-fatal conditions raised inside a tick.
//!
//! Faults are values handed to a [`FaultSink`](crate::control_loop::FaultSink);
//! none of them stops the control loop.

use crate::channel::{CommandChannel, DeviceId};
use crate::device::DeviceError;
use crate::telemetry::TelemetryField;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// A drained command value the policy refuses to apply (non-finite).
    InvalidCommand { channel: CommandChannel, value: f64 },
    /// The adapter rejected a drained command.
    ApplyFailed {
        channel: CommandChannel,
        error: DeviceError,
    },
    /// A telemetry field could not be read; the previous value was republished.
    ReadFailed {
        device: DeviceId,
        field: TelemetryField,
        error: DeviceError,
    },
    /// `stop_motor` failed during an emergency-stop broadcast.
    EstopFailed { device: DeviceId, error: DeviceError },
    /// A tick took longer than the configured period.
    TickOverrun {
        tick: u64,
        elapsed: Duration,
        period: Duration,
    },
}

impl Fault {
    pub const fn kind(&self) -> &'static str {
        match self {
            Fault::InvalidCommand { .. } => "invalid_command",
            Fault::ApplyFailed { .. } => "apply_failed",
            Fault::ReadFailed { .. } => "read_failed",
            Fault::EstopFailed { .. } => "estop_failed",
            Fault::TickOverrun { .. } => "tick_overrun",
        }
    }

    pub fn device(&self) -> Option<DeviceId> {
        match self {
            Fault::InvalidCommand { channel, .. } | Fault::ApplyFailed { channel, .. } => {
                Some(channel.device)
            }
            Fault::ReadFailed { device, .. } | Fault::EstopFailed { device, .. } => Some(*device),
            Fault::TickOverrun { .. } => None,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::InvalidCommand { channel, value } => {
                write!(f, "dropped invalid value {value} on {channel}")
            }
            Fault::ApplyFailed { channel, error } => {
                write!(f, "failed to apply {channel}: {error}")
            }
            Fault::ReadFailed {
                device,
                field,
                error,
            } => write!(f, "failed to read {}: {error}", field.topic(*device)),
            Fault::EstopFailed { device, error } => {
                write!(f, "emergency stop of device {device} failed: {error}")
            }
            Fault::TickOverrun {
                tick,
                elapsed,
                period,
            } => write!(f, "tick {tick} took {elapsed:?}, period is {period:?}"),
        }
    }
}
