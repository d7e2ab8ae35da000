use libm::expf;

/// Exponential moving average over oversampled raw readings.
///
/// Technically a single-pole infinite-impulse response low-pass filter. It
/// stores no sample history, only the fractional running value, which makes
/// it suitable for targets without dynamic allocation.
///
/// The filter is driven by the caller's monotonic microsecond clock: all
/// methods that depend on time take `now_us` as an argument. Elapsed time is
/// computed with wrapping arithmetic, so the filter stays correct across a
/// timer rollover.
///
/// The smoothing factor is recalculated on every absorbed sample from the
/// interval that actually elapsed, because the driving loop cannot guarantee
/// an exact sampling cadence. This keeps the effective time constant of the
/// filter correct even when polling jitters. If the filter is polled much
/// slower than the configured interval the time constant still holds, but
/// the effective sampling rate, and with it the noise rejection, degrades.
#[derive(Debug, Clone)]
pub struct Ema {
    interval_us: u32,
    /// Cut-off frequency rescaled to 1/µs, fixed at construction.
    rate: f32,
    output: f32,
    seeding: bool,
    tick_us: u32,
    obtained_interval_us: u32,
}

impl Ema {
    /// Default oversampling interval in µs.
    pub const DEFAULT_INTERVAL_US: u32 = 2000;

    /// Default low-pass cut-off frequency in Hz.
    pub const DEFAULT_CUTOFF_HZ: f32 = 10.0;

    /// Returns a filter that samples every `interval_us` microseconds and
    /// low-passes the readings with the given cut-off frequency in Hz.
    ///
    /// The filter treats construction as time zero on the caller's clock:
    /// the first sample becomes due one interval later. Until a sample has
    /// been absorbed, [`output`](Ema::output) is `NAN`, the same sentinel a
    /// fault reading produces.
    pub fn new(interval_us: u32, cutoff_hz: f32) -> Self {
        Self {
            interval_us,
            rate: cutoff_hz * 1e-6,
            output: f32::NAN,
            seeding: true,
            tick_us: 0,
            obtained_interval_us: 0,
        }
    }

    /// Returns whether enough time has passed since the last absorbed sample
    /// for a new one to be taken.
    pub fn due(&self, now_us: u32) -> bool {
        now_us.wrapping_sub(self.tick_us) >= self.interval_us
    }

    /// Blends one raw sample taken at `now_us` into the running value.
    ///
    /// The very first sample seeds the running value exactly, without
    /// blending, so the average does not start out biased toward an
    /// arbitrary initial value. Subsequent samples are blended with a
    /// smoothing factor derived from the obtained interval.
    pub fn absorb(&mut self, now_us: u32, raw: u16) {
        // The loop rarely hits the configured interval exactly, so the
        // smoothing factor is derived from the obtained interval each time.
        self.obtained_interval_us = now_us.wrapping_sub(self.tick_us);
        let alpha = 1.0 - expf(-(self.obtained_interval_us as f32) * self.rate);

        if self.seeding {
            self.seeding = false;
            self.output = raw as f32;
        } else {
            self.output += alpha * (raw as f32 - self.output);
        }

        self.tick_us = now_us;
    }

    /// The fractional running value, or `NAN` if no sample has been absorbed
    /// yet.
    pub fn output(&self) -> f32 {
        self.output
    }

    /// The interval in µs between the two most recent absorbed samples.
    /// Diagnostic only.
    pub fn last_obtained_interval_us(&self) -> u32 {
        self.obtained_interval_us
    }
}

impl Default for Ema {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL_US, Self::DEFAULT_CUTOFF_HZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL_US: u32 = 1000;
    const CUTOFF_HZ: f32 = 1000.0;

    fn alpha(obtained_us: u32) -> f32 {
        1.0 - expf(-(obtained_us as f32) * (CUTOFF_HZ * 1e-6))
    }

    fn filter() -> Ema {
        Ema::new(INTERVAL_US, CUTOFF_HZ)
    }

    #[test]
    fn output_is_nan_before_first_sample() {
        assert!(filter().output().is_nan());
    }

    #[test]
    fn due_one_interval_after_time_zero() {
        assert!(!filter().due(INTERVAL_US - 1));
        assert!(filter().due(INTERVAL_US));
    }

    #[test]
    fn not_due_before_interval_elapses() {
        let mut ema = filter();
        ema.absorb(1000, 100);

        assert!(!ema.due(1001));
        assert!(!ema.due(1999));
        assert!(ema.due(2000));
    }

    #[test]
    fn first_sample_seeds_exactly() {
        let mut ema = filter();
        ema.absorb(1000, 873);
        assert_eq!(ema.output(), 873.0);
    }

    #[test]
    fn second_sample_blends() {
        let mut ema = filter();
        ema.absorb(1000, 800);
        ema.absorb(2000, 864);

        assert_eq!(ema.output(), 800.0 + alpha(1000) * (864.0 - 800.0));
    }

    #[test]
    fn converges_toward_constant_input() {
        let mut ema = filter();
        let mut now = 0;
        ema.absorb(now, 0);

        let mut previous_error = 4000.0;
        for _ in 0..10 {
            now += INTERVAL_US;
            ema.absorb(now, 4000);
            let error = 4000.0 - ema.output();
            assert!(error < previous_error);
            previous_error = error;
        }
        assert!(previous_error < 1.0);
    }

    #[test]
    fn alpha_follows_the_obtained_interval() {
        let mut slow = filter();
        slow.absorb(0, 0);
        slow.absorb(2 * INTERVAL_US, 1000);

        assert_eq!(slow.last_obtained_interval_us(), 2 * INTERVAL_US);
        assert_eq!(slow.output(), alpha(2 * INTERVAL_US) * 1000.0);

        // A doubled interval blends harder than the configured one would.
        let mut nominal = filter();
        nominal.absorb(0, 0);
        nominal.absorb(INTERVAL_US, 1000);
        assert!(slow.output() > nominal.output());
    }

    #[test]
    fn elapsed_time_survives_timer_wraparound() {
        let mut ema = filter();
        ema.absorb(u32::MAX - 500, 100);

        assert!(!ema.due(u32::MAX - 100));
        assert!(ema.due(499));

        ema.absorb(499, 200);
        assert_eq!(ema.last_obtained_interval_us(), 1000);
    }
}
