use crate::channel::{Command, CommandChannel, DeviceId};
use crate::device::{DeviceAdapter, DeviceError};
use crate::fault::Fault;
use crate::latch::CommandLatch;
use crate::telemetry::{TelemetryExchange, TelemetryPublisher, TelemetrySample};
use log::{debug, warn};
use std::sync::Arc;

/// Timing of the tick being executed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickContext {
    pub tick: u64,
    pub timestamp_us: u64,
    pub dt_s: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BridgePhase {
    #[default]
    Idle,
    Draining,
    Applying,
    Publishing,
}

#[derive(Debug, Clone, Copy)]
pub struct TickReport {
    pub applied: u32,
    pub dropped: u32,
    pub published: TelemetrySample,
}

/// Couples one device to its command latch and telemetry slot.
///
/// Owns the adapter, so only the thread driving the bridge ever touches the
/// hardware.
pub struct MotorBridge<D: DeviceAdapter> {
    device: D,
    id: DeviceId,
    latch: Arc<CommandLatch>,
    exchange: Arc<TelemetryExchange>,
    publisher: TelemetryPublisher,
    phase: BridgePhase,
}

impl<D: DeviceAdapter> MotorBridge<D> {
    pub fn new(device: D, latch: Arc<CommandLatch>, exchange: Arc<TelemetryExchange>) -> Self {
        let id = device.id();
        Self {
            device,
            id,
            latch,
            exchange,
            publisher: TelemetryPublisher::new(id),
            phase: BridgePhase::Idle,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn latch(&self) -> &Arc<CommandLatch> {
        &self.latch
    }

    pub fn exchange(&self) -> &Arc<TelemetryExchange> {
        &self.exchange
    }

    /// Normal tick: drain, apply, publish.
    pub fn tick(&mut self, ctx: &TickContext, faults: &mut Vec<Fault>) -> TickReport {
        self.device.step(ctx.dt_s);

        self.phase = BridgePhase::Draining;
        let pending = self.latch.drain_all();

        self.phase = BridgePhase::Applying;
        let mut applied = 0;
        let mut dropped = 0;
        for command in pending.in_order() {
            match self.apply(command, faults) {
                Applied::Yes => applied += 1,
                Applied::Dropped => dropped += 1,
                Applied::Ignored | Applied::Failed => {}
            }
        }

        let published = self.publish(ctx, faults);
        TickReport {
            applied,
            dropped,
            published,
        }
    }

    /// Emergency-stop tick: the latch is left untouched, telemetry still flows.
    pub fn hold(&mut self, ctx: &TickContext, faults: &mut Vec<Fault>) -> TickReport {
        self.device.step(ctx.dt_s);
        let published = self.publish(ctx, faults);
        TickReport {
            applied: 0,
            dropped: 0,
            published,
        }
    }

    pub fn stop_motor(&mut self) -> Result<(), DeviceError> {
        self.device.stop_motor()
    }

    fn publish(&mut self, ctx: &TickContext, faults: &mut Vec<Fault>) -> TelemetrySample {
        self.phase = BridgePhase::Publishing;
        let sample = self.publisher.publish(
            &self.device,
            &self.exchange,
            ctx.tick,
            ctx.timestamp_us,
            faults,
        );
        self.phase = BridgePhase::Idle;
        sample
    }

    fn apply(&mut self, command: Command, faults: &mut Vec<Fault>) -> Applied {
        let channel = CommandChannel::new(self.id, command.kind());
        let result = match command {
            Command::Speed(value) | Command::Position(value) if !value.is_finite() => {
                warn!("Dropping non-finite value {} on {}", value, channel);
                faults.push(Fault::InvalidCommand { channel, value });
                return Applied::Dropped;
            }
            Command::Speed(fraction) => self.device.set_speed(fraction.clamp(-1.0, 1.0)),
            Command::Position(rotations) => self.device.set_position(rotations),
            // A false level is not an "un-stop"; only true is actioned.
            Command::Stop(false) | Command::Reset(false) => return Applied::Ignored,
            Command::Stop(true) => self.device.stop_motor(),
            Command::Reset(true) => self.device.reset_position(),
        };

        match result {
            Ok(()) => {
                debug!("Applied {:?} on {}", command, channel);
                Applied::Yes
            }
            Err(error) => {
                warn!("Failed to apply {:?} on {}: {}", command, channel, error);
                faults.push(Fault::ApplyFailed { channel, error });
                Applied::Failed
            }
        }
    }
}

impl<D: DeviceAdapter + std::fmt::Debug> std::fmt::Debug for MotorBridge<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorBridge")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("phase", &self.phase)
            .finish()
    }
}

enum Applied {
    Yes,
    Dropped,
    Ignored,
    Failed,
}
