use crate::channel::{ChannelKind, Command};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// A value that fits in one atomic word next to a reserved "clean" pattern.
///
/// `encode` must never return [`Latchable::VACANT`].
pub trait Latchable: Copy {
    const VACANT: u64;

    fn encode(self) -> u64;
    fn decode(bits: u64) -> Self;
}

impl Latchable for f64 {
    // Signalling NaN with a payload no arithmetic produces.
    const VACANT: u64 = 0x7FF4_0000_DEAD_BEEF;

    fn encode(self) -> u64 {
        if self.is_nan() {
            f64::NAN.to_bits()
        } else {
            self.to_bits()
        }
    }

    fn decode(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

impl Latchable for bool {
    const VACANT: u64 = u64::MAX;

    fn encode(self) -> u64 {
        self as u64
    }

    fn decode(bits: u64) -> Self {
        bits != 0
    }
}

/// Single-slot, last-write-wins cell between async writers and the tick thread.
///
/// The pending value and the dirty flag live in the same word: the slot holds
/// either `T::VACANT` (clean) or the encoded value (dirty). A post is one
/// release store, a drain is one swap, so a write is seen dirty by exactly one
/// drain and the value is always visible together with its flag.
pub struct LatchCell<T: Latchable> {
    slot: AtomicU64,
    _value: PhantomData<fn() -> T>,
}

impl<T: Latchable> LatchCell<T> {
    pub const fn new() -> Self {
        Self {
            slot: AtomicU64::new(T::VACANT),
            _value: PhantomData,
        }
    }

    /// Called from any writer thread. Never blocks, never fails.
    pub fn post(&self, value: T) {
        self.slot.store(value.encode(), Ordering::Release);
    }

    /// Called by the tick thread. Returns the last value posted since the
    /// previous drain, or `None` when nothing was posted.
    pub fn drain(&self) -> Option<T> {
        let bits = self.slot.swap(T::VACANT, Ordering::AcqRel);
        (bits != T::VACANT).then(|| T::decode(bits))
    }

    pub fn is_dirty(&self) -> bool {
        self.slot.load(Ordering::Acquire) != T::VACANT
    }
}

impl<T: Latchable> Default for LatchCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Latchable + std::fmt::Debug> std::fmt::Debug for LatchCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bits = self.slot.load(Ordering::Acquire);
        let pending = (bits != T::VACANT).then(|| T::decode(bits));
        f.debug_struct("LatchCell").field("pending", &pending).finish()
    }
}

/// Commands drained in one tick, in drain order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PendingCommands {
    pub speed: Option<f64>,
    pub position: Option<f64>,
    pub stop: Option<bool>,
    pub reset: Option<bool>,
}

impl PendingCommands {
    pub fn is_empty(&self) -> bool {
        self.speed.is_none() && self.position.is_none() && self.stop.is_none() && self.reset.is_none()
    }

    /// Present commands in the fixed per-tick order.
    pub fn in_order(&self) -> impl Iterator<Item = Command> {
        [
            self.speed.map(Command::Speed),
            self.position.map(Command::Position),
            self.stop.map(Command::Stop),
            self.reset.map(Command::Reset),
        ]
        .into_iter()
        .flatten()
    }
}

/// The four command cells of one device. Created at registration and kept for
/// the lifetime of the device.
#[derive(Debug, Default)]
pub struct CommandLatch {
    speed: LatchCell<f64>,
    position: LatchCell<f64>,
    stop: LatchCell<bool>,
    reset: LatchCell<bool>,
}

impl CommandLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a remote write. Supersedes any undrained value on the same
    /// channel; no history is kept.
    pub fn post(&self, command: Command) {
        match command {
            Command::Speed(v) => self.speed.post(v),
            Command::Position(v) => self.position.post(v),
            Command::Stop(v) => self.stop.post(v),
            Command::Reset(v) => self.reset.post(v),
        }
    }

    pub fn drain(&self, kind: ChannelKind) -> Option<Command> {
        match kind {
            ChannelKind::Speed => self.speed.drain().map(Command::Speed),
            ChannelKind::Position => self.position.drain().map(Command::Position),
            ChannelKind::Stop => self.stop.drain().map(Command::Stop),
            ChannelKind::Reset => self.reset.drain().map(Command::Reset),
        }
    }

    /// Drain every channel in [`ChannelKind::DRAIN_ORDER`].
    pub fn drain_all(&self) -> PendingCommands {
        PendingCommands {
            speed: self.speed.drain(),
            position: self.position.drain(),
            stop: self.stop.drain(),
            reset: self.reset.drain(),
        }
    }

    pub fn is_pending(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Speed => self.speed.is_dirty(),
            ChannelKind::Position => self.position.is_dirty(),
            ChannelKind::Stop => self.stop.is_dirty(),
            ChannelKind::Reset => self.reset.is_dirty(),
        }
    }
}
