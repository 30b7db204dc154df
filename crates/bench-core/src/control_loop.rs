use crate::bridge::TickContext;
use crate::device::DeviceAdapter;
use crate::fault::Fault;
use crate::fleet::{Fleet, FleetReport};
use crate::timebase::{TickSchedule, TimeBase};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct ControlConfig {
    pub cycle_time: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_time: Duration::from_millis(20),
        }
    }
}

#[derive(Clone, Default, Debug)]
pub struct ExecutionStats {
    pub ticks_executed: u64,
    pub ticks_overrun: u64,
    pub max_overrun_us: u64,
    pub last_tick_us: u64,
    pub commands_applied: u64,
    pub commands_dropped: u64,
    pub apply_failures: u64,
    pub read_failures: u64,
    pub estop_ticks: u64,
}

impl ExecutionStats {
    fn record(&mut self, report: &FleetReport, faults: &[Fault]) {
        self.ticks_executed += 1;
        self.commands_applied += u64::from(report.applied);
        self.commands_dropped += u64::from(report.dropped);
        if report.estop {
            self.estop_ticks += 1;
        }
        for fault in faults {
            match fault {
                Fault::ApplyFailed { .. } | Fault::EstopFailed { .. } => self.apply_failures += 1,
                Fault::ReadFailed { .. } => self.read_failures += 1,
                Fault::InvalidCommand { .. } | Fault::TickOverrun { .. } => {}
            }
        }
    }
}

/// Receives every fault raised by the tick thread.
pub trait FaultSink: Send {
    fn report(&mut self, fault: &Fault);

    /// Called once per tick after the fleet ran, with the tick's outcome.
    fn tick_complete(&mut self, _report: &FleetReport, _elapsed: Duration) {}
}

impl FaultSink for Vec<Fault> {
    fn report(&mut self, fault: &Fault) {
        self.push(fault.clone());
    }
}

/// Fixed-rate driver: one thread, strictly periodic, ticks never overlap.
pub struct ControlLoop<D: DeviceAdapter, S: FaultSink> {
    fleet: Fleet<D>,
    config: ControlConfig,
    sink: S,
    stats: ExecutionStats,
    timebase: TimeBase,
    faults: Vec<Fault>,
}

impl<D: DeviceAdapter, S: FaultSink> ControlLoop<D, S> {
    pub fn new(fleet: Fleet<D>, config: ControlConfig, sink: S, timebase: TimeBase) -> Self {
        Self {
            fleet,
            config,
            sink,
            stats: ExecutionStats::default(),
            timebase,
            faults: Vec::new(),
        }
    }

    /// Runs until `stop` is set. No fault ends the loop.
    pub fn run(&mut self, stop: &AtomicBool) {
        let mut schedule = TickSchedule::new(self.config.cycle_time);

        while !stop.load(Ordering::Relaxed) {
            schedule.wait();
            let started = Instant::now();
            self.tick_once();

            if let Some(elapsed) = schedule.finish(started) {
                let overrun = elapsed.saturating_sub(self.config.cycle_time);
                self.stats.ticks_overrun += 1;
                self.stats.max_overrun_us =
                    self.stats.max_overrun_us.max(overrun.as_micros() as u64);
                warn!(
                    "Tick {} overran its {:?} period by {:?}",
                    self.stats.ticks_executed, self.config.cycle_time, overrun
                );
                self.sink.report(&Fault::TickOverrun {
                    tick: self.stats.ticks_executed,
                    elapsed,
                    period: self.config.cycle_time,
                });
            }
        }

        self.shutdown();
    }

    /// Executes exactly one tick: emergency stop check, then drain, apply and
    /// publish for every device.
    pub fn tick_once(&mut self) -> FleetReport {
        let started = Instant::now();
        let ctx = TickContext {
            tick: self.stats.ticks_executed + 1,
            timestamp_us: self.timebase.now_us(),
            dt_s: self.config.cycle_time.as_secs_f64(),
        };

        self.faults.clear();
        let report = self.fleet.tick(&ctx, &mut self.faults);
        self.stats.record(&report, &self.faults);
        for fault in &self.faults {
            self.sink.report(fault);
        }

        let elapsed = started.elapsed();
        self.stats.last_tick_us = elapsed.as_micros() as u64;
        self.sink.tick_complete(&report, elapsed);
        report
    }

    fn shutdown(&mut self) {
        self.faults.clear();
        self.fleet.stop_all(&mut self.faults);
        for fault in &self.faults {
            self.sink.report(fault);
        }
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn fleet(&self) -> &Fleet<D> {
        &self.fleet
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::tests::{Call, RecordingMotor};
    use crate::channel::{Command, DeviceId};
    use crate::device::DeviceError;
    use crate::fleet::FleetBuilder;
    use crate::telemetry::TelemetryField;
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Wraps a motor and makes every tick take `delay`.
    struct SlowMotor {
        inner: RecordingMotor,
        delay: Duration,
    }

    impl DeviceAdapter for SlowMotor {
        fn id(&self) -> DeviceId {
            self.inner.id()
        }

        fn step(&mut self, _dt_s: f64) {
            thread::sleep(self.delay);
        }

        fn bus_voltage(&self) -> Result<f64, DeviceError> {
            self.inner.bus_voltage()
        }

        fn output_current(&self) -> Result<f64, DeviceError> {
            self.inner.output_current()
        }

        fn temperature(&self) -> Result<f64, DeviceError> {
            self.inner.temperature()
        }

        fn velocity(&self) -> Result<f64, DeviceError> {
            self.inner.velocity()
        }

        fn position(&self) -> Result<f64, DeviceError> {
            self.inner.position()
        }

        fn commanded_speed(&self) -> Result<f64, DeviceError> {
            self.inner.commanded_speed()
        }

        fn set_speed(&mut self, fraction: f64) -> Result<(), DeviceError> {
            self.inner.set_speed(fraction)
        }

        fn set_position(&mut self, rotations: f64) -> Result<(), DeviceError> {
            self.inner.set_position(rotations)
        }

        fn stop_motor(&mut self) -> Result<(), DeviceError> {
            self.inner.stop_motor()
        }
    }

    fn control_loop(
        calls: &Arc<Mutex<Vec<Call>>>,
    ) -> (
        ControlLoop<RecordingMotor, Vec<Fault>>,
        Arc<crate::hub::ChannelHub>,
    ) {
        let mut builder = FleetBuilder::new();
        builder
            .register(RecordingMotor::new(1, Arc::clone(calls)))
            .unwrap();
        let (fleet, hub) = builder.build();
        let control = ControlLoop::new(fleet, ControlConfig::default(), Vec::new(), TimeBase::new());
        (control, hub)
    }

    #[test]
    fn tick_once_publishes_and_counts() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut control, hub) = control_loop(&calls);

        hub.post(DeviceId(1), Command::Speed(0.5)).unwrap();
        control.tick_once();
        control.tick_once();

        let stats = control.stats();
        assert_eq!(stats.ticks_executed, 2);
        assert_eq!(stats.commands_applied, 1);
        assert_eq!(hub.latest(DeviceId(1)).unwrap().map(|s| s.tick), Some(2));
    }

    #[test]
    fn faults_reach_the_sink() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut control, hub) = control_loop(&calls);

        hub.post(DeviceId(1), Command::Position(f64::INFINITY)).unwrap();
        control.tick_once();

        assert_eq!(control.stats().commands_dropped, 1);
        assert_eq!(control.sink().len(), 1);
        assert_eq!(control.sink()[0].kind(), "invalid_command");
    }

    #[test]
    fn read_failures_are_counted_and_loop_continues() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut motor = RecordingMotor::new(1, Arc::clone(&calls));
        motor.fail_reads = vec![TelemetryField::Temperature, TelemetryField::BusVoltage];
        let mut builder = FleetBuilder::new();
        builder.register(motor).unwrap();
        let (fleet, _hub) = builder.build();
        let mut control =
            ControlLoop::new(fleet, ControlConfig::default(), Vec::new(), TimeBase::new());

        control.tick_once();
        control.tick_once();
        assert_eq!(control.stats().read_failures, 4);
        assert_eq!(control.stats().ticks_executed, 2);
    }

    #[test]
    fn run_reports_overruns_without_stopping() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut builder = FleetBuilder::new();
        builder
            .register(SlowMotor {
                inner: RecordingMotor::new(1, Arc::clone(&calls)),
                delay: Duration::from_millis(4),
            })
            .unwrap();
        let (fleet, hub) = builder.build();
        let config = ControlConfig {
            cycle_time: Duration::from_millis(1),
        };
        let mut control = ControlLoop::new(fleet, config, Vec::new(), TimeBase::new());

        let stop = Arc::new(AtomicBool::new(false));
        let stopper = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(60));
                stop.store(true, Ordering::Relaxed);
            })
        };
        control.run(&stop);
        stopper.join().unwrap();

        let stats = control.stats();
        assert!(stats.ticks_executed >= 2);
        assert_eq!(stats.ticks_overrun, stats.ticks_executed);
        assert!(control
            .sink()
            .iter()
            .any(|fault| matches!(fault, Fault::TickOverrun { .. })));
        assert_eq!(
            hub.latest(DeviceId(1)).unwrap().map(|s| s.tick),
            Some(stats.ticks_executed)
        );
        // Shutdown stops every device.
        assert_eq!(calls.lock().unwrap().last(), Some(&Call::Stop(DeviceId(1))));
    }
}
