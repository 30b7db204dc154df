use bench_core::{
    ChannelKind, Command, DeviceId, StaleFields, TelemetrySample, UnknownChannel,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("line is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no `type` field")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("malformed `{msg_type}` message: {source}")]
    Malformed {
        msg_type: &'static str,
        source: serde_json::Error,
    },
    #[error(transparent)]
    UnknownChannel(#[from] UnknownChannel),
    #[error("channel {channel} expects a {expected} value")]
    ValueType {
        channel: ChannelKind,
        expected: &'static str,
    },
}

/// Raw value of a remote write. Numeric strings let a client send values
/// JSON cannot carry, such as `"NaN"` or `"-inf"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CommandValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CommandValue {
    fn as_float(&self) -> Option<f64> {
        match self {
            CommandValue::Number(value) => Some(*value),
            CommandValue::Text(text) => text.trim().parse().ok(),
            CommandValue::Bool(_) => None,
        }
    }

    fn as_flag(&self) -> Option<bool> {
        match self {
            CommandValue::Bool(value) => Some(*value),
            CommandValue::Text(text) => text.trim().parse().ok(),
            CommandValue::Number(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandMsg {
    pub device_id: u32,
    pub channel: String,
    pub value: CommandValue,
}

impl CommandMsg {
    /// Resolve the addressed device and the typed command.
    pub fn to_command(&self) -> Result<(DeviceId, Command), ProtocolError> {
        let kind: ChannelKind = self.channel.parse()?;
        let command = match kind {
            ChannelKind::Speed => Command::Speed(self.float(kind)?),
            ChannelKind::Position => Command::Position(self.float(kind)?),
            ChannelKind::Stop => Command::Stop(self.flag(kind)?),
            ChannelKind::Reset => Command::Reset(self.flag(kind)?),
        };
        Ok((DeviceId(self.device_id), command))
    }

    fn float(&self, channel: ChannelKind) -> Result<f64, ProtocolError> {
        self.value.as_float().ok_or(ProtocolError::ValueType {
            channel,
            expected: "numeric",
        })
    }

    fn flag(&self, channel: ChannelKind) -> Result<bool, ProtocolError> {
        self.value.as_flag().ok_or(ProtocolError::ValueType {
            channel,
            expected: "boolean",
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EstopMsg {
    pub value: bool,
}

#[derive(Debug, Deserialize)]
pub struct HelloMsg {
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug)]
pub enum IncomingMessage {
    Hello(HelloMsg),
    Command(CommandMsg),
    Estop(EstopMsg),
}

impl IncomingMessage {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let msg_type = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        match msg_type {
            "command" => serde_json::from_value(value)
                .map(IncomingMessage::Command)
                .map_err(|source| ProtocolError::Malformed {
                    msg_type: "command",
                    source,
                }),
            "estop" => serde_json::from_value(value)
                .map(IncomingMessage::Estop)
                .map_err(|source| ProtocolError::Malformed {
                    msg_type: "estop",
                    source,
                }),
            "hello" => serde_json::from_value(value)
                .map(IncomingMessage::Hello)
                .map_err(|source| ProtocolError::Malformed {
                    msg_type: "hello",
                    source,
                }),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// One device's telemetry as sent to the remote side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub sequence: u64,
    #[serde(rename = "device_id")]
    pub device_id: DeviceId,
    pub tick: u64,
    #[serde(rename = "timestamp_us")]
    pub timestamp_us: u64,
    pub bus_voltage: Option<f64>,
    pub output_current: Option<f64>,
    pub temperature: Option<f64>,
    pub velocity: Option<f64>,
    pub set_speed: Option<f64>,
    pub position: Option<f64>,
    pub stale: StaleFields,
}

impl StatsMsg {
    pub fn from_sample(sequence: u64, sample: &TelemetrySample) -> Self {
        Self {
            msg_type: "stats",
            sequence,
            device_id: sample.device,
            tick: sample.tick,
            timestamp_us: sample.timestamp_us,
            bus_voltage: finite(sample.bus_voltage),
            output_current: finite(sample.output_current),
            temperature: finite(sample.temperature),
            velocity: finite(sample.velocity),
            set_speed: finite(sample.commanded_speed),
            position: finite(sample.position),
            stale: sample.stale,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EstopStateMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub value: bool,
}

impl EstopStateMsg {
    pub fn new(value: bool) -> Self {
        Self {
            msg_type: "estop_state",
            value,
        }
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
