use crate::channel::DeviceId;
use crate::device::{DeviceAdapter, DeviceError};

/// Simulated brushless motor with a relative encoder and thermal dynamics.
#[derive(Debug, Clone)]
pub struct SimulatedMotor {
    id: DeviceId,

    commanded: f64,
    velocity_rpm: f64,
    position_rot: f64,
    current_a: f64,
    temperature_c: f64,

    free_speed_rpm: f64,
    time_constant_s: f64,
    stall_current_a: f64,
    supply_voltage: f64,
    internal_resistance: f64,
    thermal_mass: f64,
    heat_per_amp2: f64,
    cooling_rate: f64,
    ambient_temp: f64,
}

impl SimulatedMotor {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            commanded: 0.0,
            velocity_rpm: 0.0,
            position_rot: 0.0,
            current_a: 0.0,
            temperature_c: 25.0,
            free_speed_rpm: 5676.0,
            time_constant_s: 0.08,
            stall_current_a: 105.0,
            supply_voltage: 12.6,
            internal_resistance: 0.015,
            thermal_mass: 120.0,
            heat_per_amp2: 0.02,
            cooling_rate: 0.5,
            ambient_temp: 25.0,
        }
    }

    /// Raw encoder count in rotations, unaffected by re-seeding.
    pub fn rotations(&self) -> f64 {
        self.position_rot
    }
}

impl DeviceAdapter for SimulatedMotor {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn step(&mut self, dt_s: f64) {
        // Velocity response.
        let target_rpm = self.commanded * self.free_speed_rpm;
        let error = target_rpm - self.velocity_rpm;
        self.velocity_rpm += error * (1.0 - (-dt_s / self.time_constant_s).exp());
        self.position_rot += self.velocity_rpm / 60.0 * dt_s;

        // Current: back-EMF limited share of stall current.
        let back_emf = self.velocity_rpm / self.free_speed_rpm;
        self.current_a = (self.commanded - back_emf).abs() * self.stall_current_a;

        // Thermal dynamics.
        let heat_in = self.heat_per_amp2 * self.current_a * self.current_a;
        let heat_out = self.cooling_rate * (self.temperature_c - self.ambient_temp);
        self.temperature_c += (heat_in - heat_out) * dt_s / self.thermal_mass;
    }

    fn bus_voltage(&self) -> Result<f64, DeviceError> {
        Ok(self.supply_voltage - self.internal_resistance * self.current_a)
    }

    fn output_current(&self) -> Result<f64, DeviceError> {
        Ok(self.current_a)
    }

    fn temperature(&self) -> Result<f64, DeviceError> {
        Ok(self.temperature_c)
    }

    fn velocity(&self) -> Result<f64, DeviceError> {
        Ok(self.velocity_rpm)
    }

    fn position(&self) -> Result<f64, DeviceError> {
        Ok(self.position_rot)
    }

    fn commanded_speed(&self) -> Result<f64, DeviceError> {
        Ok(self.commanded)
    }

    fn set_speed(&mut self, fraction: f64) -> Result<(), DeviceError> {
        self.commanded = fraction.clamp(-1.0, 1.0);
        Ok(())
    }

    fn set_position(&mut self, rotations: f64) -> Result<(), DeviceError> {
        self.position_rot = rotations;
        Ok(())
    }

    fn stop_motor(&mut self) -> Result<(), DeviceError> {
        self.commanded = 0.0;
        Ok(())
    }
}

/// Simulated motor read through an absolute encoder.
///
/// The encoder reports one turn and cannot be re-seeded, so `set_position`
/// is rejected; resetting captures the current reading as the zero reference.
#[derive(Debug, Clone)]
pub struct AbsoluteEncoderMotor {
    motor: SimulatedMotor,
    zero_offset: f64,
}

impl AbsoluteEncoderMotor {
    pub fn new(id: DeviceId) -> Self {
        Self {
            motor: SimulatedMotor::new(id),
            zero_offset: 0.0,
        }
    }

    fn absolute(&self) -> f64 {
        self.motor.rotations().rem_euclid(1.0)
    }
}

impl DeviceAdapter for AbsoluteEncoderMotor {
    fn id(&self) -> DeviceId {
        self.motor.id
    }

    fn step(&mut self, dt_s: f64) {
        self.motor.step(dt_s);
    }

    fn bus_voltage(&self) -> Result<f64, DeviceError> {
        self.motor.bus_voltage()
    }

    fn output_current(&self) -> Result<f64, DeviceError> {
        self.motor.output_current()
    }

    fn temperature(&self) -> Result<f64, DeviceError> {
        self.motor.temperature()
    }

    fn velocity(&self) -> Result<f64, DeviceError> {
        self.motor.velocity()
    }

    fn position(&self) -> Result<f64, DeviceError> {
        Ok((self.absolute() - self.zero_offset).rem_euclid(1.0))
    }

    fn commanded_speed(&self) -> Result<f64, DeviceError> {
        self.motor.commanded_speed()
    }

    fn set_speed(&mut self, fraction: f64) -> Result<(), DeviceError> {
        self.motor.set_speed(fraction)
    }

    fn set_position(&mut self, _rotations: f64) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported {
            operation: "set_position on an absolute encoder",
        })
    }

    fn reset_position(&mut self) -> Result<(), DeviceError> {
        self.zero_offset = self.absolute();
        Ok(())
    }

    fn stop_motor(&mut self) -> Result<(), DeviceError> {
        self.motor.stop_motor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(motor: &mut impl DeviceAdapter, seconds: f64) {
        let dt = 0.02;
        let steps = (seconds / dt) as usize;
        for _ in 0..steps {
            motor.step(dt);
        }
    }

    #[test]
    fn velocity_follows_command() {
        let mut motor = SimulatedMotor::new(DeviceId(1));
        motor.set_speed(0.5).unwrap();
        run(&mut motor, 1.0);
        let rpm = motor.velocity().unwrap();
        assert!((rpm - 0.5 * 5676.0).abs() < 1.0, "rpm = {rpm}");
        assert!(motor.position().unwrap() > 0.0);
    }

    #[test]
    fn stop_zeroes_command_and_spins_down() {
        let mut motor = SimulatedMotor::new(DeviceId(1));
        motor.set_speed(-1.0).unwrap();
        run(&mut motor, 0.5);
        motor.stop_motor().unwrap();
        assert_eq!(motor.commanded_speed().unwrap(), 0.0);
        run(&mut motor, 2.0);
        assert!(motor.velocity().unwrap().abs() < 1.0);
    }

    #[test]
    fn reset_position_defaults_to_zero() {
        let mut motor = SimulatedMotor::new(DeviceId(1));
        motor.set_position(7.25).unwrap();
        motor.reset_position().unwrap();
        assert_eq!(motor.position().unwrap(), 0.0);
    }

    #[test]
    fn absolute_encoder_rejects_seeding_but_can_rezero() {
        let mut motor = AbsoluteEncoderMotor::new(DeviceId(3));
        motor.set_speed(0.3).unwrap();
        run(&mut motor, 0.37);
        assert!(matches!(
            motor.set_position(0.0),
            Err(DeviceError::Unsupported { .. })
        ));

        motor.stop_motor().unwrap();
        run(&mut motor, 3.0);
        motor.reset_position().unwrap();
        let position = motor.position().unwrap();
        assert!(position.abs() < 1e-3 || (1.0 - position).abs() < 1e-3);
    }

    #[test]
    fn current_draw_sags_bus_voltage() {
        let mut motor = SimulatedMotor::new(DeviceId(1));
        let idle = motor.bus_voltage().unwrap();
        motor.set_speed(1.0).unwrap();
        motor.step(0.02);
        assert!(motor.output_current().unwrap() > 0.0);
        assert!(motor.bus_voltage().unwrap() < idle);
    }
}
