//! Clock prescaler, CLKPR (SS4.9). A two-write unlock protocol: a write with bit 7 set arms a
//! short window (`cycle + 5`: one for the unlock write itself, four for the window), during
//! which a following write with bit 7 clear is read as a shift amount `k` in 0..8, setting the
//! effective frequency to `base / 2^k`. Writes outside the window, or an attempted shift of 0
//! divisor, are rejected with a warning rather than failing the simulation (SS7: "logged, not
//! fatal").

const UNLOCK_BIT: u8 = 0b1000_0000;

pub struct ClockPrescaler {
    base_frequency_hz: u64,
    shift: u8,
    unlock_deadline: Option<u64>,
}

impl ClockPrescaler {
    pub fn new(base_frequency_hz: u64) -> Self {
        Self {
            base_frequency_hz,
            shift: 0,
            unlock_deadline: None,
        }
    }

    pub fn effective_frequency(&self) -> u64 {
        self.base_frequency_hz >> self.shift
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    /// Handle a CPU write to CLKPR at the given cycle.
    pub fn write(&mut self, value: u8, cycle: u64) {
        if value & UNLOCK_BIT != 0 {
            self.unlock_deadline = Some(cycle + 5);
            return;
        }

        match self.unlock_deadline {
            Some(deadline) if cycle <= deadline => {
                let k = value & 0x07;
                if self.base_frequency_hz >> k == 0 {
                    log::warn!("CLKPR write would zero the effective frequency, ignored");
                } else {
                    self.shift = k;
                }
            }
            Some(_) => {
                log::warn!("CLKPR write outside unlock window, ignored");
            }
            None => {
                log::warn!("CLKPR write without prior unlock sequence, ignored");
            }
        }
        self.unlock_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_then_shift_within_window_applies() {
        let mut c = ClockPrescaler::new(16_000_000);
        c.write(UNLOCK_BIT, 0);
        c.write(0b0000_0011, 3);
        assert_eq!(c.shift(), 3);
        assert_eq!(c.effective_frequency(), 2_000_000);
    }

    #[test]
    fn shift_write_outside_window_is_ignored() {
        let mut c = ClockPrescaler::new(16_000_000);
        c.write(UNLOCK_BIT, 0);
        c.write(0b0000_0011, 10); // window is cycle <= 5
        assert_eq!(c.shift(), 0);
    }

    #[test]
    fn shift_without_unlock_is_ignored() {
        let mut c = ClockPrescaler::new(16_000_000);
        c.write(0b0000_0011, 0);
        assert_eq!(c.shift(), 0);
    }

    #[test]
    fn shift_that_would_zero_the_frequency_is_rejected() {
        let mut c = ClockPrescaler::new(4);
        c.write(UNLOCK_BIT, 0);
        c.write(0b0000_0011, 3); // k=3: 4 >> 3 == 0, would zero the clock
        assert_eq!(c.shift(), 0);
        assert_eq!(c.effective_frequency(), 4);
    }

    #[test]
    fn unlock_consumed_by_first_following_write() {
        let mut c = ClockPrescaler::new(16_000_000);
        c.write(UNLOCK_BIT, 0);
        c.write(0b0000_0001, 1);
        c.write(0b0000_0010, 2); // second write is a fresh, unarmed write: ignored
        assert_eq!(c.shift(), 1);
    }
}
