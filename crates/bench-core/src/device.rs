use crate::channel::DeviceId;
use crate::telemetry::TelemetryField;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("{operation} is not supported by this controller")]
    Unsupported { operation: &'static str },
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("controller disconnected")]
    Disconnected,
    #[error("controller fault: {0}")]
    Fault(String),
}

/// Capability surface of one motor controller as driven by the bridge.
///
/// Only the tick thread calls these methods, so implementations need no
/// internal locking. Units are the controller's own: volts, amps, degrees
/// Celsius, RPM, output fraction and rotations.
pub trait DeviceAdapter: Send {
    fn id(&self) -> DeviceId;

    /// Advance simulated hardware by one tick. Real controllers ignore it.
    fn step(&mut self, _dt_s: f64) {}

    fn bus_voltage(&self) -> Result<f64, DeviceError>;
    fn output_current(&self) -> Result<f64, DeviceError>;
    fn temperature(&self) -> Result<f64, DeviceError>;
    fn velocity(&self) -> Result<f64, DeviceError>;
    fn position(&self) -> Result<f64, DeviceError>;

    /// The output fraction currently applied by the controller.
    fn commanded_speed(&self) -> Result<f64, DeviceError>;

    fn set_speed(&mut self, fraction: f64) -> Result<(), DeviceError>;
    fn set_position(&mut self, rotations: f64) -> Result<(), DeviceError>;

    /// Return the encoder to its zero reference. Controllers whose zero is
    /// not a plain position write override this.
    fn reset_position(&mut self) -> Result<(), DeviceError> {
        self.set_position(0.0)
    }

    fn stop_motor(&mut self) -> Result<(), DeviceError>;

    fn read(&self, field: TelemetryField) -> Result<f64, DeviceError> {
        match field {
            TelemetryField::BusVoltage => self.bus_voltage(),
            TelemetryField::OutputCurrent => self.output_current(),
            TelemetryField::Temperature => self.temperature(),
            TelemetryField::Velocity => self.velocity(),
            TelemetryField::CommandedSpeed => self.commanded_speed(),
            TelemetryField::Position => self.position(),
        }
    }
}

impl<D: DeviceAdapter + ?Sized> DeviceAdapter for Box<D> {
    fn id(&self) -> DeviceId {
        (**self).id()
    }

    fn step(&mut self, dt_s: f64) {
        (**self).step(dt_s)
    }

    fn bus_voltage(&self) -> Result<f64, DeviceError> {
        (**self).bus_voltage()
    }

    fn output_current(&self) -> Result<f64, DeviceError> {
        (**self).output_current()
    }

    fn temperature(&self) -> Result<f64, DeviceError> {
        (**self).temperature()
    }

    fn velocity(&self) -> Result<f64, DeviceError> {
        (**self).velocity()
    }

    fn position(&self) -> Result<f64, DeviceError> {
        (**self).position()
    }

    fn commanded_speed(&self) -> Result<f64, DeviceError> {
        (**self).commanded_speed()
    }

    fn set_speed(&mut self, fraction: f64) -> Result<(), DeviceError> {
        (**self).set_speed(fraction)
    }

    fn set_position(&mut self, rotations: f64) -> Result<(), DeviceError> {
        (**self).set_position(rotations)
    }

    fn reset_position(&mut self) -> Result<(), DeviceError> {
        (**self).reset_position()
    }

    fn stop_motor(&mut self) -> Result<(), DeviceError> {
        (**self).stop_motor()
    }
}
