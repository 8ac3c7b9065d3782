//! System bus (SS4.4): the I/O dispatcher sitting between the CPU and everything it can read or
//! write. A CPU load from an I/O address returns the current data-space byte after optionally
//! letting a peripheral recompute it in place; a CPU store writes the byte, then hands the new
//! value to whichever peripheral owns that address. Peripheral handlers return a closed list of
//! `IrqEvent`s rather than invoking an open callback, so the bus (and ultimately `Board`) controls
//! when those effects are applied -- this is what keeps a store from recursing back into the
//! address it just wrote.

use crate::interrupt::InterruptController;
use crate::irq::{IrqEvent, IrqFlags, IrqGraph, IrqHandle, Listener};
use crate::memory::{DataSpace, Flash, McuVariant};
use crate::peripherals::{ClockPrescaler, IoPort, PortId, Timer, TimerTarget, TimerWidth, Wgm};
use crate::scheduler::CycleScheduler;

/// Vector table layout. A pragmatic subset of the ATmega32U4's ~43 vectors: only the sources
/// this simulator's peripherals actually raise.
pub mod vectors {
    pub const TIMER0_OVF: usize = 1;
    pub const TIMER0_COMPA: usize = 2;
    pub const TIMER0_COMPB: usize = 3;
    pub const TIMER1_OVF: usize = 4;
    pub const TIMER1_COMPA: usize = 5;
    pub const TIMER1_COMPB: usize = 6;
    pub const COUNT: usize = 8;
    pub const WORDS_PER_VECTOR: u32 = 2;
}

/// I/O register addresses (data-space offsets), chosen to match the ATmega32U4 datasheet layout
/// for the registers this simulator models.
pub mod regs {
    pub const PINB: u16 = 0x23;
    pub const DDRB: u16 = 0x24;
    pub const PORTB: u16 = 0x25;
    pub const PINC: u16 = 0x26;
    pub const DDRC: u16 = 0x27;
    pub const PORTC: u16 = 0x28;
    pub const PIND: u16 = 0x29;
    pub const DDRD: u16 = 0x2A;
    pub const PORTD: u16 = 0x2B;
    pub const PINF: u16 = 0x2C;
    pub const DDRF: u16 = 0x2D;
    pub const PORTF: u16 = 0x2E;
    pub const SREG: u16 = 0x5F;
    pub const SPL: u16 = 0x5D;
    pub const SPH: u16 = 0x5E;

    pub const TCCR0A: u16 = 0x44;
    pub const TCCR0B: u16 = 0x45;
    pub const TCNT0: u16 = 0x46;
    pub const OCR0A: u16 = 0x47;
    pub const OCR0B: u16 = 0x48;
    pub const TIMSK0: u16 = 0x6E;

    pub const TCCR1B: u16 = 0x81;
    pub const TCNT1L: u16 = 0x84;
    pub const TCNT1H: u16 = 0x85;
    pub const OCR1AL: u16 = 0x88;
    pub const OCR1AH: u16 = 0x89;
    pub const OCR1BL: u16 = 0x8A;
    pub const OCR1BH: u16 = 0x8B;
    pub const TIMSK1: u16 = 0x6F;

    pub const CLKPR: u16 = 0x61;
}

/// The standard AVR prescaler taps, indexed by the low 3 bits of a CSx2:0 field. Index 0 means
/// "timer stopped."
const PRESCALER_TAPS: [u32; 8] = [0, 1, 8, 64, 256, 1024, 0, 0];

pub struct Bus {
    pub flash: Flash,
    pub data: DataSpace,
    pub irq: IrqGraph,
    pub interrupts: InterruptController,
    pub scheduler: CycleScheduler<(u8, TimerTarget)>,
    pub ports: [IoPort; 4],
    pub timer0: Timer,
    pub timer1: Timer,
    pub clkpr: ClockPrescaler,
    base_frequency_hz: u64,
    cycle: u64,
}

impl Bus {
    pub fn new(variant: McuVariant, base_frequency_hz: u64) -> Self {
        let mut irq = IrqGraph::new();
        let ports = [
            IoPort::new(PortId::B, regs::PINB, regs::DDRB, regs::PORTB, &mut irq),
            IoPort::new(PortId::C, regs::PINC, regs::DDRC, regs::PORTC, &mut irq),
            IoPort::new(PortId::D, regs::PIND, regs::DDRD, regs::PORTD, &mut irq),
            IoPort::new(PortId::F, regs::PINF, regs::DDRF, regs::PORTF, &mut irq),
        ];
        Self {
            flash: Flash::new(variant),
            data: DataSpace::new(variant),
            irq,
            interrupts: InterruptController::new(vectors::COUNT, vectors::WORDS_PER_VECTOR),
            scheduler: CycleScheduler::new(),
            ports,
            timer0: Timer::new(0, TimerWidth::Bit8, vectors::TIMER0_OVF, vectors::TIMER0_COMPA, vectors::TIMER0_COMPB),
            timer1: Timer::new(1, TimerWidth::Bit16, vectors::TIMER1_OVF, vectors::TIMER1_COMPA, vectors::TIMER1_COMPB),
            clkpr: ClockPrescaler::new(base_frequency_hz),
            base_frequency_hz,
            cycle: 0,
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn advance_cycle(&mut self, delta: u64) {
        self.cycle += delta;
    }

    pub fn port(&self, id: PortId) -> &IoPort {
        &self.ports[id as usize]
    }

    pub fn port_mut(&mut self, id: PortId) -> &mut IoPort {
        &mut self.ports[id as usize]
    }

    /// Plain data-space read; used by the CPU for register file, I/O, and SRAM loads alike, since
    /// they're all the same flat byte array (SS3's aliasing invariant).
    pub fn read_data(&self, addr: u16) -> u8 {
        self.data.read(addr)
    }

    /// Data-space write with I/O dispatch: writes the byte, then routes known register addresses
    /// to their owning peripheral and collects the resulting IRQ events.
    pub fn write_data(&mut self, addr: u16, value: u8) -> Vec<IrqEvent> {
        self.data.write_raw(addr, value);
        self.dispatch_write(addr, value)
    }

    fn dispatch_write(&mut self, addr: u16, value: u8) -> Vec<IrqEvent> {
        match addr {
            regs::PORTB => self.ports[PortId::B as usize].on_write_port(&mut self.data, &mut self.irq),
            regs::DDRB => self.ports[PortId::B as usize].on_write_ddr(&mut self.data, &mut self.irq),
            regs::PINB => self.ports[PortId::B as usize].on_write_pin(value, &mut self.data, &mut self.irq),
            regs::PORTC => self.ports[PortId::C as usize].on_write_port(&mut self.data, &mut self.irq),
            regs::DDRC => self.ports[PortId::C as usize].on_write_ddr(&mut self.data, &mut self.irq),
            regs::PINC => self.ports[PortId::C as usize].on_write_pin(value, &mut self.data, &mut self.irq),
            regs::PORTD => self.ports[PortId::D as usize].on_write_port(&mut self.data, &mut self.irq),
            regs::DDRD => self.ports[PortId::D as usize].on_write_ddr(&mut self.data, &mut self.irq),
            regs::PIND => self.ports[PortId::D as usize].on_write_pin(value, &mut self.data, &mut self.irq),
            regs::PORTF => self.ports[PortId::F as usize].on_write_port(&mut self.data, &mut self.irq),
            regs::DDRF => self.ports[PortId::F as usize].on_write_ddr(&mut self.data, &mut self.irq),
            regs::PINF => self.ports[PortId::F as usize].on_write_pin(value, &mut self.data, &mut self.irq),

            regs::TCCR0A => {
                // WGM01 (bit 1) selects CTC (TOP = OCR0A); WGM02 lives in TCCR0B and isn't
                // distinguished here since `Wgm` only models the two modes firmware actually uses.
                let wgm = if value & 0x02 != 0 { Wgm::ClearOnCompareA } else { Wgm::Normal };
                self.timer0.set_wgm(wgm, self.cycle);
                self.timer0.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::TCCR0B => {
                self.timer0.set_prescaler(PRESCALER_TAPS[(value & 0x07) as usize], self.cycle);
                self.timer0.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::TCNT0 => {
                self.timer0.set_counter(value as u32, self.cycle);
                self.timer0.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::OCR0A => {
                self.timer0.set_ocra(value as u32, self.cycle);
                self.timer0.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::OCR0B => {
                self.timer0.set_ocrb(value as u32, self.cycle);
                self.timer0.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::TIMSK0 => {
                self.interrupts.set_enabled(vectors::TIMER0_OVF, value & 0x01 != 0);
                self.interrupts.set_enabled(vectors::TIMER0_COMPA, value & 0x02 != 0);
                self.interrupts.set_enabled(vectors::TIMER0_COMPB, value & 0x04 != 0);
                Vec::new()
            }

            regs::TCCR1B => {
                self.timer1.set_prescaler(PRESCALER_TAPS[(value & 0x07) as usize], self.cycle);
                self.timer1.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::TCNT1L => {
                let full = self.timer1.counter_value(self.cycle);
                self.timer1.set_counter((full & 0xFF00) | value as u32, self.cycle);
                self.timer1.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::TCNT1H => {
                let full = self.timer1.counter_value(self.cycle);
                self.timer1.set_counter((full & 0x00FF) | ((value as u32) << 8), self.cycle);
                self.timer1.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::OCR1AL => {
                let full = self.timer1.ocra();
                self.timer1.set_ocra((full & 0xFF00) | value as u32, self.cycle);
                self.timer1.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::OCR1AH => {
                let full = self.timer1.ocra();
                self.timer1.set_ocra((full & 0x00FF) | ((value as u32) << 8), self.cycle);
                self.timer1.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::OCR1BL => {
                let full = self.timer1.ocrb();
                self.timer1.set_ocrb((full & 0xFF00) | value as u32, self.cycle);
                self.timer1.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::OCR1BH => {
                let full = self.timer1.ocrb();
                self.timer1.set_ocrb((full & 0x00FF) | ((value as u32) << 8), self.cycle);
                self.timer1.reschedule(self.cycle, &mut self.scheduler);
                Vec::new()
            }
            regs::TIMSK1 => {
                self.interrupts.set_enabled(vectors::TIMER1_OVF, value & 0x01 != 0);
                self.interrupts.set_enabled(vectors::TIMER1_COMPA, value & 0x02 != 0);
                self.interrupts.set_enabled(vectors::TIMER1_COMPB, value & 0x04 != 0);
                Vec::new()
            }

            regs::CLKPR => {
                self.clkpr.write(value, self.cycle);
                Vec::new()
            }

            _ => Vec::new(),
        }
    }

    /// Drain any cycle-scheduler entries due at the current cycle, firing their effects.
    pub fn drain_due_timers(&mut self) -> Vec<IrqEvent> {
        let due = self.scheduler.drain_due(self.cycle);
        let mut events = Vec::new();
        for (timer_id, target) in due {
            if timer_id == 0 {
                events.extend(self.timer0.fire(target, self.cycle, &mut self.interrupts, &mut self.irq, &mut self.scheduler));
            } else {
                events.extend(self.timer1.fire(target, self.cycle, &mut self.interrupts, &mut self.irq, &mut self.scheduler));
            }
        }
        events
    }

    pub fn reset(&mut self, variant: McuVariant) {
        self.data.reset();
        let mut irq = IrqGraph::new();
        self.ports = [
            IoPort::new(PortId::B, regs::PINB, regs::DDRB, regs::PORTB, &mut irq),
            IoPort::new(PortId::C, regs::PINC, regs::DDRC, regs::PORTC, &mut irq),
            IoPort::new(PortId::D, regs::PIND, regs::DDRD, regs::PORTD, &mut irq),
            IoPort::new(PortId::F, regs::PINF, regs::DDRF, regs::PORTF, &mut irq),
        ];
        self.irq = irq;
        self.interrupts = InterruptController::new(vectors::COUNT, vectors::WORDS_PER_VECTOR);
        self.scheduler = CycleScheduler::new();
        self.timer0 = Timer::new(0, TimerWidth::Bit8, vectors::TIMER0_OVF, vectors::TIMER0_COMPA, vectors::TIMER0_COMPB);
        self.timer1 = Timer::new(1, TimerWidth::Bit16, vectors::TIMER1_OVF, vectors::TIMER1_COMPA, vectors::TIMER1_COMPB);
        self.clkpr = ClockPrescaler::new(self.base_frequency_hz);
        self.cycle = 0;
        let _ = variant;
    }
}
