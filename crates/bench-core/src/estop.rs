use crate::bridge::MotorBridge;
use crate::channel::DeviceId;
use crate::device::DeviceAdapter;
use crate::fault::Fault;
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fleet-wide emergency stop level. Last write wins; no acknowledgement.
#[derive(Debug, Default)]
pub struct EstopSignal {
    asserted: AtomicBool,
}

impl EstopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, asserted: bool) {
        self.asserted.store(asserted, Ordering::Release);
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EstopOutcome {
    pub asserted: bool,
    /// Devices whose `stop_motor` was invoked, in registration order.
    pub stopped: Vec<DeviceId>,
}

/// Broadcasts a stop to every registered device while the signal is asserted,
/// bypassing the per-device command latches.
#[derive(Debug, Clone)]
pub struct EmergencyStopCoordinator {
    signal: Arc<EstopSignal>,
}

impl EmergencyStopCoordinator {
    pub fn new(signal: Arc<EstopSignal>) -> Self {
        Self { signal }
    }

    pub fn signal(&self) -> &Arc<EstopSignal> {
        &self.signal
    }

    /// Reads the signal once. When asserted, calls `stop_motor` on every
    /// bridge exactly once; pending latched commands are left alone.
    pub fn tick<D: DeviceAdapter>(
        &self,
        bridges: &mut [MotorBridge<D>],
        faults: &mut Vec<Fault>,
    ) -> EstopOutcome {
        if !self.signal.is_asserted() {
            return EstopOutcome::default();
        }

        let mut stopped = Vec::with_capacity(bridges.len());
        for bridge in bridges.iter_mut() {
            let device = bridge.id();
            stopped.push(device);
            if let Err(error) = bridge.stop_motor() {
                warn!("Emergency stop of device {} failed: {}", device, error);
                faults.push(Fault::EstopFailed { device, error });
            }
        }

        EstopOutcome {
            asserted: true,
            stopped,
        }
    }
}
