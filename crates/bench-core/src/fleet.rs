use crate::bridge::{MotorBridge, TickContext};
use crate::channel::DeviceId;
use crate::device::DeviceAdapter;
use crate::estop::{EmergencyStopCoordinator, EstopSignal};
use crate::fault::Fault;
use crate::hub::{ChannelHub, DeviceChannels};
use crate::latch::CommandLatch;
use crate::telemetry::TelemetryExchange;
use log::info;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FleetError {
    #[error("device {0} is already registered")]
    DuplicateDevice(DeviceId),
}

/// Registration phase: devices are added before any thread starts.
pub struct FleetBuilder<D: DeviceAdapter> {
    bridges: Vec<MotorBridge<D>>,
    estop: Arc<EstopSignal>,
}

impl<D: DeviceAdapter> FleetBuilder<D> {
    pub fn new() -> Self {
        Self {
            bridges: Vec::new(),
            estop: Arc::new(EstopSignal::new()),
        }
    }

    /// Creates the device's latch and telemetry slot. Registration order is
    /// the order devices are ticked and emergency-stopped.
    pub fn register(&mut self, device: D) -> Result<&mut Self, FleetError> {
        let id = device.id();
        if self.bridges.iter().any(|bridge| bridge.id() == id) {
            return Err(FleetError::DuplicateDevice(id));
        }

        info!("Registering device {}", id);
        self.bridges.push(MotorBridge::new(
            device,
            Arc::new(CommandLatch::new()),
            Arc::new(TelemetryExchange::new(id)),
        ));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn build(self) -> (Fleet<D>, Arc<ChannelHub>) {
        let channels = self
            .bridges
            .iter()
            .map(|bridge| DeviceChannels {
                id: bridge.id(),
                latch: Arc::clone(bridge.latch()),
                telemetry: Arc::clone(bridge.exchange()),
            })
            .collect();
        let hub = Arc::new(ChannelHub::new(channels, Arc::clone(&self.estop)));
        let fleet = Fleet {
            bridges: self.bridges,
            coordinator: EmergencyStopCoordinator::new(self.estop),
        };
        (fleet, hub)
    }
}

impl<D: DeviceAdapter> Default for FleetBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetReport {
    pub estop: bool,
    pub stopped: Vec<DeviceId>,
    pub applied: u32,
    pub dropped: u32,
    pub published: u32,
}

/// Every registered bridge plus the emergency-stop coordinator, driven from
/// the tick thread.
pub struct Fleet<D: DeviceAdapter> {
    bridges: Vec<MotorBridge<D>>,
    coordinator: EmergencyStopCoordinator,
}

impl<D: DeviceAdapter> Fleet<D> {
    /// One tick for the whole fleet.
    ///
    /// While the emergency stop is asserted every device is stopped and its
    /// latch is left as is; a command latched before the stop is applied on
    /// the first tick after release unless superseded.
    pub fn tick(&mut self, ctx: &TickContext, faults: &mut Vec<Fault>) -> FleetReport {
        let outcome = self.coordinator.tick(&mut self.bridges, faults);

        let mut report = FleetReport {
            estop: outcome.asserted,
            stopped: outcome.stopped,
            ..FleetReport::default()
        };

        for bridge in &mut self.bridges {
            let tick = if outcome.asserted {
                bridge.hold(ctx, faults)
            } else {
                bridge.tick(ctx, faults)
            };
            report.applied += tick.applied;
            report.dropped += tick.dropped;
            report.published += 1;
        }
        report
    }

    pub fn bridges(&self) -> &[MotorBridge<D>] {
        &self.bridges
    }

    pub fn bridges_mut(&mut self) -> &mut [MotorBridge<D>] {
        &mut self.bridges
    }

    pub fn estop(&self) -> &Arc<EstopSignal> {
        self.coordinator.signal()
    }

    /// Stop every device regardless of the signal. Used on shutdown.
    pub fn stop_all(&mut self, faults: &mut Vec<Fault>) {
        for bridge in &mut self.bridges {
            if let Err(error) = bridge.stop_motor() {
                faults.push(Fault::EstopFailed {
                    device: bridge.id(),
                    error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::tests::{Call, RecordingMotor};
    use crate::channel::{ChannelKind, Command};
    use std::sync::Mutex;

    fn ctx(tick: u64) -> TickContext {
        TickContext {
            tick,
            timestamp_us: tick * 20_000,
            dt_s: 0.02,
        }
    }

    fn fleet_of(
        ids: &[u32],
        calls: &Arc<Mutex<Vec<Call>>>,
    ) -> (Fleet<RecordingMotor>, Arc<ChannelHub>) {
        let mut builder = FleetBuilder::new();
        for id in ids {
            builder
                .register(RecordingMotor::new(*id, Arc::clone(calls)))
                .unwrap();
        }
        builder.build()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut builder = FleetBuilder::new();
        builder
            .register(RecordingMotor::new(1, Arc::clone(&calls)))
            .unwrap();
        let err = builder
            .register(RecordingMotor::new(1, Arc::clone(&calls)))
            .err();
        assert_eq!(err, Some(FleetError::DuplicateDevice(DeviceId(1))));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn hub_routes_posts_to_the_right_device() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut fleet, hub) = fleet_of(&[1, 2], &calls);
        let mut faults = Vec::new();

        hub.post(DeviceId(2), Command::Speed(0.25)).unwrap();
        assert!(hub.post(DeviceId(9), Command::Speed(0.25)).is_err());
        fleet.tick(&ctx(1), &mut faults);

        assert_eq!(*calls.lock().unwrap(), vec![Call::SetSpeed(DeviceId(2), 0.25)]);
        let sample = hub.latest(DeviceId(2)).unwrap().unwrap();
        assert_eq!(sample.commanded_speed, 0.25);
        assert_eq!(hub.snapshot().len(), 2);
    }

    #[test]
    fn estop_stops_every_device_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut fleet, hub) = fleet_of(&[3, 1, 2], &calls);
        let mut faults = Vec::new();

        hub.set_estop(true);
        let report = fleet.tick(&ctx(1), &mut faults);

        assert!(report.estop);
        assert_eq!(report.stopped, vec![DeviceId(3), DeviceId(1), DeviceId(2)]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::Stop(DeviceId(3)),
                Call::Stop(DeviceId(1)),
                Call::Stop(DeviceId(2))
            ]
        );
        assert_eq!(report.published, 3);
    }

    #[test]
    fn estop_does_not_clear_latched_commands_and_rearms_on_release() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut fleet, hub) = fleet_of(&[1, 2, 3], &calls);
        let mut faults = Vec::new();

        hub.post(DeviceId(1), Command::Speed(0.6)).unwrap();
        hub.set_estop(true);
        fleet.tick(&ctx(1), &mut faults);
        assert!(hub.latch(DeviceId(1)).unwrap().is_pending(ChannelKind::Speed));

        hub.set_estop(false);
        calls.lock().unwrap().clear();
        let report = fleet.tick(&ctx(2), &mut faults);

        assert!(!report.estop);
        assert_eq!(report.applied, 1);
        assert_eq!(*calls.lock().unwrap(), vec![Call::SetSpeed(DeviceId(1), 0.6)]);
    }

    #[test]
    fn estop_is_repeated_every_asserted_tick() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut fleet, hub) = fleet_of(&[1], &calls);
        let mut faults = Vec::new();

        hub.set_estop(true);
        fleet.tick(&ctx(1), &mut faults);
        fleet.tick(&ctx(2), &mut faults);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn failed_estop_on_one_device_still_stops_the_rest() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut fleet, hub) = fleet_of(&[1, 2], &calls);
        fleet.bridges_mut()[0].device_mut().fail_writes = true;
        let mut faults = Vec::new();

        hub.set_estop(true);
        let report = fleet.tick(&ctx(1), &mut faults);

        assert_eq!(report.stopped, vec![DeviceId(1), DeviceId(2)]);
        assert!(matches!(
            faults.as_slice(),
            [Fault::EstopFailed { device: DeviceId(1), .. }]
        ));
    }
}
