//! Audit trail for bench events that affect what the motors do.
//!
//! One JSON object per line, appended across runs.

use bench_core::Fault;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Types of events that are logged in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SystemStart,
    SystemShutdown,
    EmergencyStopAsserted,
    EmergencyStopReleased,
    /// A drained command was refused (non-finite value)
    CommandDropped,
    /// A device rejected a write, including an emergency stop
    ApplyFailure,
    TickOverrun,
}

impl AuditEventType {
    /// Event recorded for a tick fault, if the fault is audited at all.
    pub fn for_fault(fault: &Fault) -> Option<Self> {
        match fault {
            Fault::InvalidCommand { .. } => Some(Self::CommandDropped),
            Fault::ApplyFailed { .. } | Fault::EstopFailed { .. } => Some(Self::ApplyFailure),
            Fault::TickOverrun { .. } => Some(Self::TickOverrun),
            Fault::ReadFailed { .. } => None,
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic timestamp in microseconds
    pub timestamp_us: u64,
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub event_type: AuditEventType,
    pub details: serde_json::Value,
}

/// Thread-safe audit logger that writes to a JSONL file
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLogger {
    /// Open `path` in append mode, creating parent directories.
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
        })
    }

    pub fn log(&self, entry: AuditEntry) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("audit writer poisoned"))?;
        serde_json::to_writer(&mut *writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn log_event(
        &self,
        timestamp_us: u64,
        unix_us: u64,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> io::Result<()> {
        self.log(AuditEntry {
            timestamp_us,
            unix_us,
            event_type,
            details,
        })
    }
}

/// Details recorded for an audited fault
#[derive(Debug, Clone, Serialize)]
pub struct FaultDetails {
    pub kind: &'static str,
    pub device: Option<u32>,
    pub message: String,
}

impl From<&Fault> for FaultDetails {
    fn from(fault: &Fault) -> Self {
        Self {
            kind: fault.kind(),
            device: fault.device().map(|device| device.0),
            message: fault.to_string(),
        }
    }
}
