use crate::channel::DeviceId;
use crate::device::DeviceAdapter;
use crate::fault::Fault;
use serde::{Serialize, Serializer};
use std::sync::atomic::{fence, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryField {
    BusVoltage,
    OutputCurrent,
    Temperature,
    Velocity,
    CommandedSpeed,
    Position,
}

impl TelemetryField {
    pub const ALL: [TelemetryField; 6] = [
        TelemetryField::BusVoltage,
        TelemetryField::OutputCurrent,
        TelemetryField::Temperature,
        TelemetryField::Velocity,
        TelemetryField::CommandedSpeed,
        TelemetryField::Position,
    ];

    /// Name under the device's `stats/` namespace.
    pub const fn key(self) -> &'static str {
        match self {
            TelemetryField::BusVoltage => "busVoltage",
            TelemetryField::OutputCurrent => "outputCurrent",
            TelemetryField::Temperature => "temperature",
            TelemetryField::Velocity => "velocity",
            TelemetryField::CommandedSpeed => "setSpeed",
            TelemetryField::Position => "position",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            TelemetryField::BusVoltage => "volts",
            TelemetryField::OutputCurrent => "amps",
            TelemetryField::Temperature => "celsius",
            TelemetryField::Velocity => "rpm",
            TelemetryField::CommandedSpeed => "fraction",
            TelemetryField::Position => "rotations",
        }
    }

    pub fn topic(self, device: DeviceId) -> String {
        format!("{}/stats/{}", device, self.key())
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl std::fmt::Display for TelemetryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Fields whose hardware read failed this tick and carry the previous value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleFields(u8);

impl StaleFields {
    pub fn insert(&mut self, field: TelemetryField) {
        self.0 |= field.bit();
    }

    pub fn contains(&self, field: TelemetryField) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = TelemetryField> + '_ {
        TelemetryField::ALL
            .into_iter()
            .filter(|field| self.contains(*field))
    }
}

impl Serialize for StaleFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(TelemetryField::key))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub device: DeviceId,
    pub tick: u64,
    pub timestamp_us: u64,
    pub bus_voltage: f64,
    pub output_current: f64,
    pub temperature: f64,
    pub velocity: f64,
    pub commanded_speed: f64,
    pub position: f64,
    pub stale: StaleFields,
}

impl TelemetrySample {
    pub fn empty(device: DeviceId) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }

    pub fn get(&self, field: TelemetryField) -> f64 {
        match field {
            TelemetryField::BusVoltage => self.bus_voltage,
            TelemetryField::OutputCurrent => self.output_current,
            TelemetryField::Temperature => self.temperature,
            TelemetryField::Velocity => self.velocity,
            TelemetryField::CommandedSpeed => self.commanded_speed,
            TelemetryField::Position => self.position,
        }
    }

    fn set(&mut self, field: TelemetryField, value: f64) {
        match field {
            TelemetryField::BusVoltage => self.bus_voltage = value,
            TelemetryField::OutputCurrent => self.output_current = value,
            TelemetryField::Temperature => self.temperature = value,
            TelemetryField::Velocity => self.velocity = value,
            TelemetryField::CommandedSpeed => self.commanded_speed = value,
            TelemetryField::Position => self.position = value,
        }
    }
}

const WORDS: usize = 9;

/// Last published sample of one device, shared with any number of readers.
///
/// Single publisher (the tick thread). Readers never block it: a read that
/// races a publish is retried.
pub struct TelemetryExchange {
    device: DeviceId,
    sequence: AtomicU64,
    words: [AtomicU64; WORDS],
}

impl TelemetryExchange {
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            sequence: AtomicU64::new(0),
            words: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Called by the tick thread every tick (non-blocking).
    pub fn publish(&self, sample: &TelemetrySample) {
        let seq = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        let encoded = encode(sample);
        for (word, bits) in self.words.iter().zip(encoded) {
            word.store(bits, Ordering::Relaxed);
        }

        self.sequence.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Most recent complete sample; `None` before the first publish.
    pub fn latest(&self) -> Option<TelemetrySample> {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before == 0 {
                return None;
            }
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let mut bits = [0u64; WORDS];
            for (slot, word) in bits.iter_mut().zip(&self.words) {
                *slot = word.load(Ordering::Relaxed);
            }
            fence(Ordering::Acquire);

            if self.sequence.load(Ordering::Relaxed) == before {
                return Some(decode(self.device, bits));
            }
            std::hint::spin_loop();
        }
    }

    pub fn publish_count(&self) -> u64 {
        self.sequence.load(Ordering::Acquire) / 2
    }
}

impl std::fmt::Debug for TelemetryExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryExchange")
            .field("device", &self.device)
            .field("publish_count", &self.publish_count())
            .finish()
    }
}

fn encode(sample: &TelemetrySample) -> [u64; WORDS] {
    [
        sample.tick,
        sample.timestamp_us,
        sample.bus_voltage.to_bits(),
        sample.output_current.to_bits(),
        sample.temperature.to_bits(),
        sample.velocity.to_bits(),
        sample.commanded_speed.to_bits(),
        sample.position.to_bits(),
        u64::from(sample.stale.0),
    ]
}

fn decode(device: DeviceId, bits: [u64; WORDS]) -> TelemetrySample {
    TelemetrySample {
        device,
        tick: bits[0],
        timestamp_us: bits[1],
        bus_voltage: f64::from_bits(bits[2]),
        output_current: f64::from_bits(bits[3]),
        temperature: f64::from_bits(bits[4]),
        velocity: f64::from_bits(bits[5]),
        commanded_speed: f64::from_bits(bits[6]),
        position: f64::from_bits(bits[7]),
        stale: StaleFields(bits[8] as u8),
    }
}

/// Samples a device and republishes unconditionally every tick.
///
/// No retries: a field whose read fails keeps its last good value and is
/// flagged stale for this tick.
#[derive(Debug)]
pub struct TelemetryPublisher {
    last: TelemetrySample,
}

impl TelemetryPublisher {
    pub fn new(device: DeviceId) -> Self {
        Self {
            last: TelemetrySample::empty(device),
        }
    }

    pub fn sample<D: DeviceAdapter + ?Sized>(
        &mut self,
        device: &D,
        tick: u64,
        timestamp_us: u64,
        faults: &mut Vec<Fault>,
    ) -> TelemetrySample {
        let mut sample = TelemetrySample {
            tick,
            timestamp_us,
            stale: StaleFields::default(),
            ..self.last
        };

        for field in TelemetryField::ALL {
            match device.read(field) {
                Ok(value) => sample.set(field, value),
                Err(error) => {
                    sample.stale.insert(field);
                    faults.push(Fault::ReadFailed {
                        device: sample.device,
                        field,
                        error,
                    });
                }
            }
        }

        self.last = sample;
        sample
    }

    pub fn publish<D: DeviceAdapter + ?Sized>(
        &mut self,
        device: &D,
        exchange: &TelemetryExchange,
        tick: u64,
        timestamp_us: u64,
        faults: &mut Vec<Fault>,
    ) -> TelemetrySample {
        let sample = self.sample(device, tick, timestamp_us, faults);
        exchange.publish(&sample);
        sample
    }

    pub fn last(&self) -> &TelemetrySample {
        &self.last
    }
}
