//! AVR CPU core (SS4.5): fetch/decode/execute over the bounded instruction subset firmware
//! driving LEDs, buttons, and a PCD8544 over bit-banged SPI actually needs. Flags follow the AVR
//! datasheet exactly (see `flags`); registers, SREG, and SP live in the bus's data space rather
//! than on `Cpu` itself (SS3).
//!
//! # Module organization
//! - `flags`: SREG bit constants and ALU flag recomputation
//! - `helpers`: register/stack/SREG access shared by `execute`
//! - `execute`: instruction decode and execution

use crate::bus::Bus;
use crate::interrupt::DISPATCH_CYCLES;
use crate::irq::IrqEvent;

mod execute;
pub mod flags;
pub mod helpers;

#[cfg(test)]
mod tests;

/// Run state, mirroring SS3's `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Sleeping,
    Stopped,
    Done,
    Crashed,
}

pub struct Cpu {
    /// Program counter, in instruction words (not bytes).
    pub pc: u32,
    pub state: CpuState,
    /// Limit on cycles a single `Board::run_*` call may consume; enforced by the caller, not
    /// `step` itself.
    pub run_cycle_limit: u64,
    /// IRQ events queued by I/O-address writes performed during the instruction `execute` is
    /// currently decoding. `execute::write_mem` pushes here instead of letting `Bus::write_data`'s
    /// return value fall on the floor; `step` drains it once the instruction is done so `Board`
    /// gets every event in program order, not just the ones from the last write.
    pending_events: Vec<IrqEvent>,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            pc: 0,
            state: CpuState::Running,
            run_cycle_limit: u64::MAX,
            pending_events: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.pc = 0;
        self.state = CpuState::Running;
        self.pending_events.clear();
    }

    pub(crate) fn queue_event(&mut self, event: IrqEvent) {
        self.pending_events.push(event);
    }

    /// Execute one step: if sleeping, checks for a wake condition; if running, dispatches a
    /// pending enabled interrupt (if `SREG.I` is set) or else fetches, decodes, and executes one
    /// instruction. Returns the number of simulated cycles consumed, any IRQ events raised by I/O
    /// writes the instruction performed, and the vector index if this step dispatched an
    /// interrupt instead of executing an opcode -- `Board` uses the latter to emit
    /// `TracerEvent::Interrupt`.
    pub fn step(&mut self, bus: &mut Bus) -> (u32, Vec<IrqEvent>, Option<usize>) {
        if self.state == CpuState::Sleeping {
            if bus.interrupts.wake_pending() {
                self.state = CpuState::Running;
            } else {
                return (0, Vec::new(), None);
            }
        }

        if self.state != CpuState::Running {
            return (0, Vec::new(), None);
        }

        if helpers::flag(bus, flags::I) {
            if let Some(vector) = bus.interrupts.pending() {
                let return_pc = self.pc;
                helpers::push_pc(bus, return_pc);
                helpers::set_flag(bus, flags::I, false);
                self.pc = bus.interrupts.dispatch(vector);
                return (DISPATCH_CYCLES as u32, Vec::new(), Some(vector));
            }
        }

        let opcode = bus.flash.read_word(self.pc);
        let cycles = execute::execute(self, bus, opcode);
        (cycles, self.pending_events.drain(..).collect(), None)
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
