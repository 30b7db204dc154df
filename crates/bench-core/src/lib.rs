pub mod bridge;
pub mod channel;
pub mod control_loop;
pub mod device;
pub mod estop;
pub mod fault;
pub mod fleet;
pub mod hub;
pub mod latch;
mod latch_proptest;
#[cfg(feature = "simulation")]
pub mod sim;
pub mod telemetry;
pub mod timebase;

pub use bridge::{BridgePhase, MotorBridge, TickContext, TickReport};
pub use channel::{ChannelKind, Command, CommandChannel, DeviceId, UnknownChannel, ESTOP_TOPIC};
pub use control_loop::{ControlConfig, ControlLoop, ExecutionStats, FaultSink};
pub use device::{DeviceAdapter, DeviceError};
pub use estop::{EmergencyStopCoordinator, EstopOutcome, EstopSignal};
pub use fault::Fault;
pub use fleet::{Fleet, FleetBuilder, FleetError, FleetReport};
pub use hub::{ChannelHub, HubError};
pub use latch::{CommandLatch, LatchCell, Latchable, PendingCommands};
#[cfg(feature = "simulation")]
pub use sim::{AbsoluteEncoderMotor, SimulatedMotor};
pub use telemetry::{StaleFields, TelemetryExchange, TelemetryField, TelemetryPublisher, TelemetrySample};
pub use timebase::{TickSchedule, TimeBase};
