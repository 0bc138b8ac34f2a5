/// Microseconds per second, the unit of every timestamp in this crate.
pub const TIME_SCALE: u64 = 1_000_000;

/// Convert a sample count at `rate` to microseconds, rounding down.
pub fn samples_to_us(samples: u64, rate: u32) -> u64 {
    if rate == 0 {
        return 0;
    }
    (samples as u128 * TIME_SCALE as u128 / rate as u128) as u64
}

/// Sample-accurate presentation clock.
///
/// The clock keeps the last externally set timestamp plus the number of
/// samples counted since then, so successive advances never accumulate
/// rounding error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PresentationClock {
    rate: u32,
    base: u64,
    samples: u64,
}

impl PresentationClock {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            base: 0,
            samples: 0,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Hard reset to an external timestamp.
    pub fn set(&mut self, ts: u64) {
        self.base = ts;
        self.samples = 0;
    }

    pub fn get(&self) -> u64 {
        self.base + samples_to_us(self.samples, self.rate)
    }

    /// A clock reading 0 has not seen a timestamp yet.
    pub fn is_started(&self) -> bool {
        self.get() != 0
    }

    /// Move forward by `samples` and return the new time.
    pub fn advance(&mut self, samples: u64) -> u64 {
        self.samples += samples;
        self.get()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_advance_is_additive() {
        for rate in [8000, 11025, 16000, 22050, 32000, 44100] {
            let mut split = PresentationClock::new(rate);
            let mut whole = PresentationClock::new(rate);
            split.set(1_000);
            whole.set(1_000);
            for step in [1, 159, 160, 7, 320, 641] {
                split.advance(step);
            }
            whole.advance(1 + 159 + 160 + 7 + 320 + 641);
            assert_eq!(split.get(), whole.get());
        }
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut clock = PresentationClock::new(44100);
        clock.set(33);
        let mut last = clock.get();
        for _ in 0..1000 {
            let now = clock.advance(1);
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 33 + 1000 * 1_000_000 / 44100);
    }

    #[test]
    fn test_set_restarts_counting() {
        let mut clock = PresentationClock::new(8000);
        assert!(!clock.is_started());
        clock.set(500_000);
        assert_eq!(clock.advance(160), 520_000);
        clock.set(2_000_000);
        assert_eq!(clock.get(), 2_000_000);
        assert_eq!(clock.advance(80), 2_010_000);
    }
}
