//! Handle through which the remote substrate reaches the bridges.
//!
//! Built once at registration and passed explicitly to every component that
//! posts commands or reads telemetry.

use crate::channel::{Command, DeviceId};
use crate::estop::EstopSignal;
use crate::latch::CommandLatch;
use crate::telemetry::{TelemetryExchange, TelemetrySample};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("no device registered with id {0}")]
    UnknownDevice(DeviceId),
}

#[derive(Debug, Clone)]
pub struct DeviceChannels {
    pub id: DeviceId,
    pub latch: Arc<CommandLatch>,
    pub telemetry: Arc<TelemetryExchange>,
}

#[derive(Debug)]
pub struct ChannelHub {
    devices: Vec<DeviceChannels>,
    estop: Arc<EstopSignal>,
}

impl ChannelHub {
    pub(crate) fn new(devices: Vec<DeviceChannels>, estop: Arc<EstopSignal>) -> Self {
        Self { devices, estop }
    }

    fn channels(&self, device: DeviceId) -> Result<&DeviceChannels, HubError> {
        self.devices
            .iter()
            .find(|channels| channels.id == device)
            .ok_or(HubError::UnknownDevice(device))
    }

    /// Deliver one remote write. Safe from any thread, never blocks.
    pub fn post(&self, device: DeviceId, command: Command) -> Result<(), HubError> {
        self.channels(device)?.latch.post(command);
        Ok(())
    }

    pub fn set_estop(&self, asserted: bool) {
        self.estop.set(asserted);
    }

    pub fn estop_asserted(&self) -> bool {
        self.estop.is_asserted()
    }

    pub fn latest(&self, device: DeviceId) -> Result<Option<TelemetrySample>, HubError> {
        Ok(self.channels(device)?.telemetry.latest())
    }

    /// Latest sample of every device that has published, in registration order.
    pub fn snapshot(&self) -> Vec<TelemetrySample> {
        self.devices
            .iter()
            .filter_map(|channels| channels.telemetry.latest())
            .collect()
    }

    /// Registered devices in registration order.
    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.iter().map(|channels| channels.id)
    }

    pub fn latch(&self, device: DeviceId) -> Result<&Arc<CommandLatch>, HubError> {
        Ok(&self.channels(device)?.latch)
    }
}
