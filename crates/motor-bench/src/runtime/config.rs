use bench_core::DeviceId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{flag} expects a value")]
    MissingValue { flag: &'static str },
    #[error("invalid value `{value}` for {flag}")]
    InvalidValue { flag: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    Relative,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    pub id: DeviceId,
    pub encoder: EncoderKind,
}

impl DeviceSpec {
    fn parse(raw: &str) -> Option<Self> {
        let (id, encoder) = match raw.split_once(':') {
            Some((id, "abs")) => (id, EncoderKind::Absolute),
            Some((id, "rel")) => (id, EncoderKind::Relative),
            Some(_) => return None,
            None => (raw, EncoderKind::Relative),
        };
        Some(Self {
            id: DeviceId(id.parse().ok()?),
            encoder,
        })
    }
}

/// The bench wiring: four controllers, the third read through an absolute
/// encoder.
pub static DEFAULT_FLEET: [DeviceSpec; 4] = [
    DeviceSpec {
        id: DeviceId(1),
        encoder: EncoderKind::Relative,
    },
    DeviceSpec {
        id: DeviceId(2),
        encoder: EncoderKind::Relative,
    },
    DeviceSpec {
        id: DeviceId(3),
        encoder: EncoderKind::Absolute,
    },
    DeviceSpec {
        id: DeviceId(4),
        encoder: EncoderKind::Relative,
    },
];

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub bind_addr: String,
    pub bridge_enabled: bool,
    pub cycle_time: Duration,
    pub publish_interval: Duration,
    pub devices: Vec<DeviceSpec>,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            bind_addr: "127.0.0.1:7100".to_string(),
            bridge_enabled: true,
            cycle_time: Duration::from_millis(20),
            publish_interval: Duration::from_millis(100),
            devices: Vec::new(),
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            audit_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--run-seconds" => {
                    cfg.run_seconds = Some(parse_value(args, &mut i, "--run-seconds")?);
                }
                "--bind" => {
                    cfg.bind_addr = take_value(args, &mut i, "--bind")?.to_string();
                }
                "--no-bridge" => {
                    cfg.bridge_enabled = false;
                }
                "--cycle-ms" => {
                    cfg.cycle_time = millis(args, &mut i, "--cycle-ms")?;
                }
                "--publish-ms" => {
                    cfg.publish_interval = millis(args, &mut i, "--publish-ms")?;
                }
                "--device" => {
                    let raw = take_value(args, &mut i, "--device")?;
                    let spec = DeviceSpec::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
                        flag: "--device",
                        value: raw.to_string(),
                    })?;
                    cfg.devices.push(spec);
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    cfg.log_dir = Some(PathBuf::from(take_value(args, &mut i, "--log-dir")?));
                }
                "--metrics-addr" => {
                    cfg.metrics_addr = Some(take_value(args, &mut i, "--metrics-addr")?.to_string());
                }
                "--audit-log" => {
                    cfg.audit_path = Some(PathBuf::from(take_value(args, &mut i, "--audit-log")?));
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        Ok(cfg)
    }

    /// Devices to register, in registration order.
    pub fn fleet(&self) -> &[DeviceSpec] {
        if self.devices.is_empty() {
            &DEFAULT_FLEET[..]
        } else {
            self.devices.as_slice()
        }
    }

    pub fn print_help() {
        println!(
            r#"motor-bench - Multi-motor test bench controller

USAGE:
    motor-bench [OPTIONS]

OPTIONS:
    --bind <ADDR>           Bridge TCP bind address [default: 127.0.0.1:7100]
    --no-bridge             Disable the TCP bridge (standalone simulation)
    --run-seconds <SECS>    Run for a fixed duration then exit
    --cycle-ms <MS>         Control tick period in milliseconds [default: 20]
    --publish-ms <MS>       Telemetry publish interval to the bridge client [default: 100]
    --device <ID>[:abs]     Register a simulated device; `:abs` reads it through an
                            absolute encoder. Repeatable [default: 1 2 3:abs 4]
    --json-logs             Output logs in JSON format (for log aggregation)
    --log-dir <PATH>        Also write JSON logs to a daily rolling file in PATH
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>      Enable audit logging to specified JSONL file
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,bench_core=trace)

EXAMPLES:
    # Bench with metrics
    motor-bench --metrics-addr 0.0.0.0:9090

    # Two devices, fast ticks, audit trail
    motor-bench --device 1 --device 7:abs --cycle-ms 5 --audit-log /var/log/motor-bench/audit.jsonl

    # Short test run
    motor-bench --run-seconds 10 --no-bridge
"#
        );
    }
}

fn take_value<'a>(
    args: &'a [String],
    i: &mut usize,
    flag: &'static str,
) -> Result<&'a str, ConfigError> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or(ConfigError::MissingValue { flag })
}

fn parse_value<T: std::str::FromStr>(
    args: &[String],
    i: &mut usize,
    flag: &'static str,
) -> Result<T, ConfigError> {
    let raw = take_value(args, i, flag)?;
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        flag,
        value: raw.to_string(),
    })
}

fn millis(args: &[String], i: &mut usize, flag: &'static str) -> Result<Duration, ConfigError> {
    match parse_value::<u64>(args, i, flag)? {
        0 => Err(ConfigError::InvalidValue {
            flag,
            value: "0".to_string(),
        }),
        ms => Ok(Duration::from_millis(ms)),
    }
}
