//! Timer peripheral (SS4.8). 8-bit and 16-bit counters with a prescaled tick, a waveform
//! generation mode selecting TOP and count behavior, and two output-compare units. Overflow and
//! compare-match events are cycle-scheduled via `CycleScheduler` rather than polled every step,
//! per SS4.8's "reconfiguration through I/O writes reschedules via C1."
//!
//! Phase-correct/phase-and-frequency-correct PWM and the four-channel compare unit some 16-bit
//! AVR timers expose are out of scope here; `Wgm` covers the two TOP sources (fixed max, OCRA)
//! firmware toggling LEDs or driving the LCD refresh tick actually needs.

use crate::interrupt::InterruptController;
use crate::irq::{IrqEvent, IrqGraph, IrqHandle};
use crate::scheduler::CycleScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerWidth {
    Bit8,
    Bit16,
}

impl TimerWidth {
    pub fn max_value(self) -> u32 {
        match self {
            TimerWidth::Bit8 => 0xFF,
            TimerWidth::Bit16 => 0xFFFF,
        }
    }
}

/// Waveform generation mode: selects where TOP comes from and what happens when the counter
/// reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wgm {
    /// TOP is the counter's max value; counter wraps to 0 past TOP.
    Normal,
    /// TOP is OCRA; counter resets to 0 on match (CTC).
    ClearOnCompareA,
}

/// Identifies one of this timer's scheduled events, used as the generic target type for
/// `CycleScheduler<TimerTarget>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTarget {
    Overflow(u8),
    CompareA(u8),
    CompareB(u8),
}

pub struct Timer {
    pub id: u8,
    width: TimerWidth,
    wgm: Wgm,
    /// Counter value as of `last_sync_cycle`.
    counter: u32,
    last_sync_cycle: u64,
    /// 0 means stopped (no clock source selected).
    prescaler_divider: u32,
    ocra: u32,
    ocrb: u32,
    overflow_vector: usize,
    compare_a_vector: usize,
    compare_b_vector: usize,
    com_a_pin: Option<IrqHandle>,
    com_b_pin: Option<IrqHandle>,
}

impl Timer {
    pub fn new(id: u8, width: TimerWidth, overflow_vector: usize, compare_a_vector: usize, compare_b_vector: usize) -> Self {
        Self {
            id,
            width,
            wgm: Wgm::Normal,
            counter: 0,
            last_sync_cycle: 0,
            prescaler_divider: 0,
            ocra: 0,
            ocrb: 0,
            overflow_vector,
            compare_a_vector,
            compare_b_vector,
            com_a_pin: None,
            com_b_pin: None,
        }
    }

    pub fn wire_compare_pins(&mut self, com_a: IrqHandle, com_b: IrqHandle) {
        self.com_a_pin = Some(com_a);
        self.com_b_pin = Some(com_b);
    }

    fn top(&self) -> u32 {
        match self.wgm {
            Wgm::Normal => self.width.max_value(),
            Wgm::ClearOnCompareA => self.ocra,
        }
    }

    /// Advance `counter` to reflect the elapsed cycles since `last_sync_cycle`, wrapping at TOP.
    fn sync(&mut self, now: u64) {
        if self.prescaler_divider == 0 {
            self.last_sync_cycle = now;
            return;
        }
        let elapsed = now.saturating_sub(self.last_sync_cycle);
        let ticks = elapsed / self.prescaler_divider as u64;
        if ticks == 0 {
            return;
        }
        let top = self.top() as u64 + 1;
        self.counter = ((self.counter as u64 + ticks) % top) as u32;
        self.last_sync_cycle += ticks * self.prescaler_divider as u64;
    }

    pub fn counter_value(&mut self, now: u64) -> u32 {
        self.sync(now);
        self.counter
    }

    pub fn set_counter(&mut self, value: u32, now: u64) {
        self.sync(now);
        self.counter = value & self.width.max_value();
    }

    pub fn ocra(&self) -> u32 {
        self.ocra
    }

    pub fn ocrb(&self) -> u32 {
        self.ocrb
    }

    pub fn set_ocra(&mut self, value: u32, now: u64) {
        self.sync(now);
        self.ocra = value & self.width.max_value();
    }

    pub fn set_ocrb(&mut self, value: u32, now: u64) {
        self.sync(now);
        self.ocrb = value & self.width.max_value();
    }

    pub fn set_wgm(&mut self, wgm: Wgm, now: u64) {
        self.sync(now);
        self.wgm = wgm;
    }

    /// Set the prescaler divider (0 stops the timer; otherwise the number of master cycles per
    /// counter tick, e.g. 1/8/64/256/1024 for the standard AVR prescaler taps).
    pub fn set_prescaler(&mut self, divider: u32, now: u64) {
        self.sync(now);
        self.prescaler_divider = divider;
    }

    /// Cancel and reschedule this timer's overflow/compare events against `scheduler`, reflecting
    /// the current counter/TOP/OCR state. Called after any reconfiguring write.
    pub fn reschedule(&mut self, now: u64, scheduler: &mut CycleScheduler<(u8, TimerTarget)>) {
        scheduler.cancel((self.id, TimerTarget::Overflow(self.id)));
        scheduler.cancel((self.id, TimerTarget::CompareA(self.id)));
        scheduler.cancel((self.id, TimerTarget::CompareB(self.id)));

        self.sync(now);
        if self.prescaler_divider == 0 {
            return;
        }
        let top = self.top();
        let divider = self.prescaler_divider as u64;

        let ticks_to_overflow = (top as u64 + 1 - self.counter as u64) % (top as u64 + 1);
        let ticks_to_overflow = if ticks_to_overflow == 0 { top as u64 + 1 } else { ticks_to_overflow };
        scheduler.register_at(now + ticks_to_overflow * divider, (self.id, TimerTarget::Overflow(self.id)));

        if self.ocra <= top && self.wgm != Wgm::ClearOnCompareA {
            if let Some(deadline) = self.deadline_for(self.ocra, now, top, divider) {
                scheduler.register_at(deadline, (self.id, TimerTarget::CompareA(self.id)));
            }
        } else if self.wgm == Wgm::ClearOnCompareA {
            // Compare-A match coincides with overflow (TOP == OCRA); already scheduled above.
        }
        if self.ocrb <= top {
            if let Some(deadline) = self.deadline_for(self.ocrb, now, top, divider) {
                scheduler.register_at(deadline, (self.id, TimerTarget::CompareB(self.id)));
            }
        }
    }

    fn deadline_for(&self, target_value: u32, now: u64, top: u32, divider: u64) -> Option<u64> {
        if target_value > top {
            return None;
        }
        let ticks = if target_value as u64 >= self.counter as u64 {
            target_value as u64 - self.counter as u64
        } else {
            (top as u64 + 1 - self.counter as u64) + target_value as u64
        };
        Some(now + ticks * divider)
    }

    /// Apply the effect of `target` firing: raise the corresponding interrupt vector, advance the
    /// counter to the event's value, and reschedule the next instance of every event.
    pub fn fire(
        &mut self,
        target: TimerTarget,
        now: u64,
        interrupts: &mut InterruptController,
        irq: &mut IrqGraph,
        scheduler: &mut CycleScheduler<(u8, TimerTarget)>,
    ) -> Vec<IrqEvent> {
        let top = self.top();
        match target {
            TimerTarget::Overflow(_) => {
                self.counter = 0;
                self.last_sync_cycle = now;
                interrupts.raise(self.overflow_vector);
            }
            TimerTarget::CompareA(_) => {
                self.counter = self.ocra;
                self.last_sync_cycle = now;
                if self.wgm == Wgm::ClearOnCompareA {
                    self.counter = 0;
                }
                interrupts.raise(self.compare_a_vector);
            }
            TimerTarget::CompareB(_) => {
                self.counter = self.ocrb;
                self.last_sync_cycle = now;
                interrupts.raise(self.compare_b_vector);
            }
        }
        let _ = top;
        self.reschedule(now, scheduler);

        let mut events = Vec::new();
        match (target, self.com_a_pin, self.com_b_pin) {
            (TimerTarget::CompareA(_), Some(pin), _) => events.extend(irq.raise(pin, 1)),
            (TimerTarget::CompareB(_), _, Some(pin)) => events.extend(irq.raise(pin, 1)),
            _ => {}
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_at_top_in_normal_mode() {
        let mut t = Timer::new(0, TimerWidth::Bit8, 10, 11, 12);
        t.set_prescaler(1, 0);
        t.set_counter(250, 0);
        assert_eq!(t.counter_value(10), 4); // 250 + 10 = 260, mod 256 = 4
    }

    #[test]
    fn ctc_mode_resets_to_zero_at_ocra() {
        let mut t = Timer::new(0, TimerWidth::Bit8, 10, 11, 12);
        t.set_prescaler(1, 0);
        t.set_ocra(10, 0);
        t.set_wgm(Wgm::ClearOnCompareA, 0);
        assert_eq!(t.counter_value(5), 5);
        assert_eq!(t.counter_value(11), 0); // wrapped past TOP=10 once
    }

    #[test]
    fn reschedule_produces_overflow_event_at_correct_cycle() {
        let mut t = Timer::new(0, TimerWidth::Bit8, 10, 11, 12);
        let mut sched = CycleScheduler::new();
        t.set_prescaler(2, 0);
        t.reschedule(0, &mut sched);
        // 8-bit counter starting at 0, TOP=255, prescaler 2 -> overflow at tick 256 -> cycle 512
        assert_eq!(sched.next_deadline(), Some(512));
    }

    #[test]
    fn fire_overflow_resets_counter_and_reschedules() {
        let mut t = Timer::new(0, TimerWidth::Bit8, 10, 11, 12);
        let mut sched = CycleScheduler::new();
        let mut irq = IrqGraph::new();
        let mut interrupts = InterruptController::new(16, 2);
        interrupts.set_enabled(10, true);
        t.set_prescaler(1, 0);
        t.reschedule(0, &mut sched);

        let due = sched.drain_due(256);
        assert_eq!(due, vec![(0, TimerTarget::Overflow(0))]);
        t.fire(TimerTarget::Overflow(0), 256, &mut interrupts, &mut irq, &mut sched);
        assert!(interrupts.is_raised(10));
        assert_eq!(t.counter_value(256), 0);
    }
}
