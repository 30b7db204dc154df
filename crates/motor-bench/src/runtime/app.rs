use crate::infra::audit::{AuditEventType, AuditLogger, FaultDetails};
use crate::runtime::config::{ConfigError, DeviceSpec, EncoderKind, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use bench_core::{
    AbsoluteEncoderMotor, ControlConfig, ControlLoop, DeviceAdapter, DeviceError, DeviceId, Fault,
    FaultSink, FleetBuilder, FleetError, FleetReport, SimulatedMotor, TimeBase,
};
use bench_io::bridge::{run_bridge, BridgeConfig, BridgeError};
use bench_io::metrics::{
    APPLY_FAILURES, COMMANDS_APPLIED, COMMANDS_DROPPED, ESTOP_ASSERTED, ESTOP_TICKS,
    READ_FAILURES, TICKS_EXECUTED, TICKS_OVERRUN, TICK_DURATION_US,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fleet(#[from] FleetError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("failed to open audit log {path}: {source}")]
    Audit { path: PathBuf, source: io::Error },
    #[error("failed to spawn {name} thread: {source}")]
    Spawn { name: &'static str, source: io::Error },
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

/// Devices the bench can register, dispatched by match.
enum BenchMotor {
    Relative(SimulatedMotor),
    Absolute(AbsoluteEncoderMotor),
}

impl From<&DeviceSpec> for BenchMotor {
    fn from(spec: &DeviceSpec) -> Self {
        match spec.encoder {
            EncoderKind::Relative => Self::Relative(SimulatedMotor::new(spec.id)),
            EncoderKind::Absolute => Self::Absolute(AbsoluteEncoderMotor::new(spec.id)),
        }
    }
}

impl DeviceAdapter for BenchMotor {
    fn id(&self) -> DeviceId {
        match self {
            Self::Relative(m) => m.id(),
            Self::Absolute(m) => m.id(),
        }
    }

    fn step(&mut self, dt_s: f64) {
        match self {
            Self::Relative(m) => m.step(dt_s),
            Self::Absolute(m) => m.step(dt_s),
        }
    }

    fn bus_voltage(&self) -> Result<f64, DeviceError> {
        match self {
            Self::Relative(m) => m.bus_voltage(),
            Self::Absolute(m) => m.bus_voltage(),
        }
    }

    fn output_current(&self) -> Result<f64, DeviceError> {
        match self {
            Self::Relative(m) => m.output_current(),
            Self::Absolute(m) => m.output_current(),
        }
    }

    fn temperature(&self) -> Result<f64, DeviceError> {
        match self {
            Self::Relative(m) => m.temperature(),
            Self::Absolute(m) => m.temperature(),
        }
    }

    fn velocity(&self) -> Result<f64, DeviceError> {
        match self {
            Self::Relative(m) => m.velocity(),
            Self::Absolute(m) => m.velocity(),
        }
    }

    fn position(&self) -> Result<f64, DeviceError> {
        match self {
            Self::Relative(m) => m.position(),
            Self::Absolute(m) => m.position(),
        }
    }

    fn commanded_speed(&self) -> Result<f64, DeviceError> {
        match self {
            Self::Relative(m) => m.commanded_speed(),
            Self::Absolute(m) => m.commanded_speed(),
        }
    }

    fn set_speed(&mut self, fraction: f64) -> Result<(), DeviceError> {
        match self {
            Self::Relative(m) => m.set_speed(fraction),
            Self::Absolute(m) => m.set_speed(fraction),
        }
    }

    fn set_position(&mut self, rotations: f64) -> Result<(), DeviceError> {
        match self {
            Self::Relative(m) => m.set_position(rotations),
            Self::Absolute(m) => m.set_position(rotations),
        }
    }

    fn reset_position(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Relative(m) => m.reset_position(),
            Self::Absolute(m) => m.reset_position(),
        }
    }

    fn stop_motor(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Relative(m) => m.stop_motor(),
            Self::Absolute(m) => m.stop_motor(),
        }
    }
}

/// Routes tick faults and outcomes to tracing, Prometheus and the audit log.
struct FaultReporter {
    audit: Option<Arc<AuditLogger>>,
    timebase: TimeBase,
    estop_asserted: bool,
}

impl FaultReporter {
    fn audit(&self, event_type: AuditEventType, details: serde_json::Value) {
        if let Some(logger) = &self.audit {
            record_audit(logger, &self.timebase, event_type, details);
        }
    }
}

/// Append one audit entry stamped from `timebase`; failures are logged, not fatal.
fn record_audit(
    logger: &AuditLogger,
    timebase: &TimeBase,
    event_type: AuditEventType,
    details: serde_json::Value,
) -> bool {
    match logger.log_event(timebase.now_us(), timebase.unix_us(), event_type, details) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, ?event_type, "Failed to write audit entry");
            false
        }
    }
}

/// Block until `stop` is set or `limit` has elapsed.
fn wait_for_stop(stop: &AtomicBool, limit: Duration) {
    let deadline = Instant::now() + limit;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

impl FaultSink for FaultReporter {
    fn report(&mut self, fault: &Fault) {
        match fault {
            Fault::InvalidCommand { .. } => {}
            Fault::ApplyFailed { .. } | Fault::EstopFailed { .. } => APPLY_FAILURES.inc(),
            Fault::ReadFailed { .. } => READ_FAILURES.inc(),
            Fault::TickOverrun { .. } => TICKS_OVERRUN.inc(),
        }

        match fault {
            Fault::ReadFailed { .. } => debug!(kind = fault.kind(), "{}", fault),
            _ => warn!(kind = fault.kind(), "{}", fault),
        }

        if let Some(event_type) = AuditEventType::for_fault(fault) {
            let details = serde_json::to_value(FaultDetails::from(fault))
                .unwrap_or(serde_json::Value::Null);
            self.audit(event_type, details);
        }
    }

    fn tick_complete(&mut self, report: &FleetReport, elapsed: Duration) {
        TICKS_EXECUTED.inc();
        TICK_DURATION_US.observe(elapsed.as_micros() as f64);
        COMMANDS_APPLIED.inc_by(u64::from(report.applied));
        COMMANDS_DROPPED.inc_by(u64::from(report.dropped));
        if report.estop {
            ESTOP_TICKS.inc();
        }

        if report.estop != self.estop_asserted {
            self.estop_asserted = report.estop;
            ESTOP_ASSERTED.set(if report.estop { 1.0 } else { 0.0 });
            if report.estop {
                let stopped: Vec<u32> = report.stopped.iter().map(|id| id.0).collect();
                warn!(?stopped, "Emergency stop asserted");
                self.audit(
                    AuditEventType::EmergencyStopAsserted,
                    serde_json::json!({ "stopped": stopped }),
                );
            } else {
                info!("Emergency stop released");
                self.audit(AuditEventType::EmergencyStopReleased, serde_json::json!({}));
            }
        }
    }
}

pub fn run_from_args() -> Result<(), RuntimeError> {
    let config = RuntimeConfig::from_env()?;
    if config.show_help {
        RuntimeConfig::print_help();
        return Ok(());
    }
    run(config)
}

pub fn run(config: RuntimeConfig) -> Result<(), RuntimeError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());

    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let mut builder = FleetBuilder::new();
    for spec in config.fleet() {
        builder.register(BenchMotor::from(spec))?;
    }
    let device_ids: Vec<u32> = config.fleet().iter().map(|spec| spec.id.0).collect();
    let (fleet, hub) = builder.build();

    let timebase = TimeBase::new();
    let audit_logger = init_audit_logger(config.audit_path.as_deref())?;

    if let Some(ref logger) = audit_logger {
        record_audit(
            logger,
            &timebase,
            AuditEventType::SystemStart,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "devices": device_ids,
                "cycle_ms": config.cycle_time.as_millis() as u64,
                "bridge_enabled": config.bridge_enabled,
            }),
        );
    }

    let stop = Arc::new(AtomicBool::new(false));

    info!(
        cycle_time_ms = config.cycle_time.as_millis() as u64,
        devices = ?device_ids,
        "Starting control tick thread"
    );

    let reporter = FaultReporter {
        audit: audit_logger.clone(),
        timebase,
        estop_asserted: false,
    };
    let control_config = ControlConfig {
        cycle_time: config.cycle_time,
    };
    let stop_control = Arc::clone(&stop);
    let control_handle = thread::Builder::new()
        .name("control-tick".to_string())
        .spawn(move || {
            let mut control = ControlLoop::new(fleet, control_config, reporter, timebase);
            control.run(&stop_control);
            control.stats().clone()
        })
        .map_err(|source| RuntimeError::Spawn {
            name: "control-tick",
            source,
        })?;

    let updater_handle = config.metrics_addr.as_ref().map(|_| {
        telemetry::start_metrics_updater(Arc::clone(&hub), Arc::clone(&stop))
    });

    let bridge_handle = if config.bridge_enabled {
        let hub_bridge = Arc::clone(&hub);
        let stop_bridge = Arc::clone(&stop);
        let bridge_config = BridgeConfig {
            bind_addr: config.bind_addr.clone(),
            publish_interval: config.publish_interval,
        };
        info!(addr = %bridge_config.bind_addr, "Starting bridge");
        let handle = thread::Builder::new()
            .name("bridge".to_string())
            .spawn(move || {
                let result = run_bridge(hub_bridge, bridge_config, Arc::clone(&stop_bridge));
                if let Err(ref e) = result {
                    error!(error = %e, "Bridge failed, stopping the bench");
                    stop_bridge.store(true, Ordering::Relaxed);
                }
                result
            })
            .map_err(|source| RuntimeError::Spawn {
                name: "bridge",
                source,
            })?;
        Some(handle)
    } else {
        info!("Bridge disabled");
        None
    };

    info!("Motor bench running");

    if let Some(seconds) = config.run_seconds {
        info!(seconds, "Running for limited duration");
        wait_for_stop(&stop, Duration::from_secs(seconds));
        stop.store(true, Ordering::Relaxed);
    }

    let stats = control_handle
        .join()
        .map_err(|_| RuntimeError::ThreadPanicked("control-tick"))?;
    stop.store(true, Ordering::Relaxed);

    let bridge_result = match bridge_handle {
        Some(handle) => handle
            .join()
            .map_err(|_| RuntimeError::ThreadPanicked("bridge"))?,
        None => Ok(()),
    };
    if let Some(handle) = updater_handle {
        let _ = handle.join();
    }

    info!(
        ticks_executed = stats.ticks_executed,
        ticks_overrun = stats.ticks_overrun,
        max_overrun_us = stats.max_overrun_us,
        commands_applied = stats.commands_applied,
        commands_dropped = stats.commands_dropped,
        apply_failures = stats.apply_failures,
        read_failures = stats.read_failures,
        estop_ticks = stats.estop_ticks,
        "Run complete"
    );

    if let Some(ref logger) = audit_logger {
        record_audit(
            logger,
            &timebase,
            AuditEventType::SystemShutdown,
            serde_json::json!({
                "ticks_executed": stats.ticks_executed,
                "ticks_overrun": stats.ticks_overrun,
                "commands_applied": stats.commands_applied,
                "commands_dropped": stats.commands_dropped,
            }),
        );
    }

    bridge_result?;
    Ok(())
}

fn init_audit_logger(audit_path: Option<&Path>) -> Result<Option<Arc<AuditLogger>>, RuntimeError> {
    audit_path
        .map(|path| match AuditLogger::new(path) {
            Ok(logger) => {
                info!(path = %path.display(), "Audit logging enabled");
                Ok(Arc::new(logger))
            }
            Err(source) => Err(RuntimeError::Audit {
                path: path.to_path_buf(),
                source,
            }),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_motor_dispatches_by_encoder() {
        let mut absolute = BenchMotor::from(&DeviceSpec {
            id: DeviceId(3),
            encoder: EncoderKind::Absolute,
        });
        assert_eq!(absolute.id(), DeviceId(3));
        assert!(matches!(
            absolute.set_position(1.0),
            Err(DeviceError::Unsupported { .. })
        ));
        assert!(absolute.reset_position().is_ok());

        let mut relative = BenchMotor::from(&DeviceSpec {
            id: DeviceId(1),
            encoder: EncoderKind::Relative,
        });
        relative.set_position(2.5).unwrap();
        assert_eq!(relative.position().unwrap(), 2.5);
    }

    #[test]
    fn duplicate_devices_fail_registration() {
        let mut builder = FleetBuilder::new();
        let spec = DeviceSpec {
            id: DeviceId(5),
            encoder: EncoderKind::Relative,
        };
        builder.register(BenchMotor::from(&spec)).unwrap();
        let err = builder.register(BenchMotor::from(&spec)).err().map(RuntimeError::from);
        assert!(matches!(err, Some(RuntimeError::Fleet(FleetError::DuplicateDevice(_)))));
    }

    #[test]
    fn reporter_audits_estop_transitions_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut reporter = FaultReporter {
            audit: Some(Arc::new(AuditLogger::new(&path).unwrap())),
            timebase: TimeBase::new(),
            estop_asserted: false,
        };

        let asserted = FleetReport {
            estop: true,
            stopped: vec![DeviceId(1), DeviceId(2)],
            ..FleetReport::default()
        };
        reporter.tick_complete(&asserted, Duration::from_micros(50));
        reporter.tick_complete(&asserted, Duration::from_micros(50));
        reporter.tick_complete(&FleetReport::default(), Duration::from_micros(50));

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event_type"], "emergency_stop_asserted");
        assert_eq!(events[0]["details"]["stopped"], serde_json::json!([1, 2]));
        assert_eq!(events[1]["event_type"], "emergency_stop_released");
    }

    #[test]
    fn audit_writes_report_success() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(&dir.path().join("audit.jsonl")).unwrap();
        assert!(record_audit(
            &logger,
            &TimeBase::new(),
            AuditEventType::SystemStart,
            serde_json::Value::Null,
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_audit_device_does_not_abort_the_run() {
        let logger = AuditLogger::new(Path::new("/dev/full")).unwrap();
        assert!(!record_audit(
            &logger,
            &TimeBase::new(),
            AuditEventType::SystemShutdown,
            serde_json::json!({"ticks_executed": 1}),
        ));
    }

    #[test]
    fn timed_wait_returns_when_stopped() {
        let stop = Arc::new(AtomicBool::new(false));
        let setter = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                stop.store(true, Ordering::Relaxed);
            })
        };
        let started = Instant::now();
        wait_for_stop(&stop, Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(5));
        setter.join().unwrap();
    }

    #[test]
    fn timed_wait_honours_the_limit() {
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        wait_for_stop(&stop, Duration::from_millis(120));
        assert!(started.elapsed() >= Duration::from_millis(120));
    }
}
