use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Topic carrying the fleet-wide emergency stop flag.
pub const ESTOP_TOPIC: &str = "emergencyStop";

/// Stable small integer identifying one physical controller.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Speed,
    Position,
    Stop,
    Reset,
}

impl ChannelKind {
    /// Order in which a tick drains and applies the channels of one device.
    /// Stop and reset come last so they override a speed or position posted
    /// in the same burst.
    pub const DRAIN_ORDER: [ChannelKind; 4] = [
        ChannelKind::Speed,
        ChannelKind::Position,
        ChannelKind::Stop,
        ChannelKind::Reset,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ChannelKind::Speed => "desiredSpeed",
            ChannelKind::Position => "newPosition",
            ChannelKind::Stop => "stop",
            ChannelKind::Reset => "reset",
        }
    }

    /// Whether the channel carries a boolean level rather than a float.
    pub const fn is_flag(self) -> bool {
        matches!(self, ChannelKind::Stop | ChannelKind::Reset)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command channel `{0}`")]
pub struct UnknownChannel(pub String);

impl FromStr for ChannelKind {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelKind::DRAIN_ORDER
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// One controllable quantity of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandChannel {
    pub device: DeviceId,
    pub kind: ChannelKind,
}

impl CommandChannel {
    pub const fn new(device: DeviceId, kind: ChannelKind) -> Self {
        Self { device, kind }
    }

    pub fn topic(&self) -> String {
        format!("{}/commands/{}", self.device, self.kind.name())
    }
}

impl fmt::Display for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/commands/{}", self.device, self.kind.name())
    }
}

/// A remote write addressed to one channel of a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Output fraction in `-1.0..=1.0`.
    Speed(f64),
    /// Encoder position in rotations.
    Position(f64),
    Stop(bool),
    Reset(bool),
}

impl Command {
    pub const fn kind(&self) -> ChannelKind {
        match self {
            Command::Speed(_) => ChannelKind::Speed,
            Command::Position(_) => ChannelKind::Position,
            Command::Stop(_) => ChannelKind::Stop,
            Command::Reset(_) => ChannelKind::Reset,
        }
    }
}
