use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Monotonic microseconds since start.
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Wall-clock microseconds since Unix epoch (for cross-process logs only).
    pub fn unix_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-period deadlines for the tick thread.
///
/// A late tick pushes every following deadline back; missed periods are
/// never run in a burst.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    period: Duration,
    next: Instant,
}

impl TickSchedule {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next deadline.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if now < self.next {
            std::thread::sleep(self.next - now);
        }
    }

    /// Close the tick that started at `started`. Returns the elapsed time when
    /// it exceeded the period.
    ///
    /// Deadlines advance by whole periods from the previous deadline, so sleep
    /// latency does not accumulate into the rate.
    pub fn finish(&mut self, started: Instant) -> Option<Duration> {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(started);
        if elapsed > self.period {
            self.next = now;
            return Some(elapsed);
        }

        self.next += self.period;
        // More than a full period behind: resume from now rather than burst.
        if self.next + self.period < now {
            self.next = now;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_tick_advances_from_previous_deadline() {
        let mut schedule = TickSchedule::new(Duration::from_millis(50));
        let first = schedule.next;
        assert_eq!(schedule.finish(Instant::now()), None);
        assert_eq!(schedule.next, first + Duration::from_millis(50));
        assert_eq!(schedule.finish(Instant::now()), None);
        assert_eq!(schedule.next, first + Duration::from_millis(100));
    }

    #[test]
    fn cadence_holds_over_a_fixed_window() {
        let period = Duration::from_millis(1);
        let window = Duration::from_millis(500);
        let mut schedule = TickSchedule::new(period);
        let mut ticks = 0u32;
        let mut overruns = 0u32;

        let end = Instant::now() + window;
        while Instant::now() < end {
            schedule.wait();
            let started = Instant::now();
            ticks += 1;
            if schedule.finish(started).is_some() {
                overruns += 1;
            }
        }

        // 500 deadlines fit in the window; sleep latency must not eat into them.
        assert!(ticks >= 450, "ticks = {ticks}, overruns = {overruns}");
    }

    #[test]
    fn slow_tick_is_reported_and_rebased() {
        let mut schedule = TickSchedule::new(Duration::from_millis(1));
        let started = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        let overrun = schedule.finish(started);
        assert!(overrun.is_some_and(|elapsed| elapsed >= Duration::from_millis(5)));
        assert!(schedule.next >= started + Duration::from_millis(5));
    }
}
