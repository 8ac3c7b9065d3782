//! I/O port peripheral (SS4.7). PORTx/DDRx/PINx, including the AVR quirk that writing PINx
//! toggles the corresponding PORTx bits rather than being a no-op. Each pin has its own IRQ node
//! that's raised with the pin's new *effective* level whenever it changes.

use crate::irq::{IrqEvent, IrqFlags, IrqGraph, IrqHandle, Listener};
use crate::memory::DataSpace;
use crate::regbit::Regbit;

/// Which physical port this peripheral instance models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortId {
    B,
    C,
    D,
    F,
}

impl PortId {
    pub fn letter(self) -> char {
        match self {
            PortId::B => 'B',
            PortId::C => 'C',
            PortId::D => 'D',
            PortId::F => 'F',
        }
    }
}

/// One PORTx/DDRx/PINx register triplet plus the 8 per-pin IRQ nodes that announce effective
/// level changes to whatever's wired downstream (an LED, a button, the LCD's serial lines).
pub struct IoPort {
    pub id: PortId,
    pin_addr: u16,
    ddr_addr: u16,
    port_addr: u16,
    /// Bits externally driven (e.g. a button pulling a pin low) when the corresponding DDR bit
    /// selects input. Bits where DDR selects output ignore this and reflect PORTx instead.
    external: u8,
    /// Last effective level broadcast, so writes that don't change any pin raise nothing.
    last_effective: u8,
    /// Last DDR byte broadcast, so `ddr_irq` only raises on an actual direction change.
    last_ddr: u8,
    pin_irqs: [IrqHandle; 8],
    /// Whole-port node, raised with the full effective byte whenever any bit changes (SS4.7:
    /// "Whole-port IRQ node raised on any change, carrying the full port byte").
    port_irq: IrqHandle,
    /// Raised with the new DDR byte whenever DDRx changes (SS4.14's `TracerEvent::Ddr`).
    ddr_irq: IrqHandle,
}

impl IoPort {
    pub fn new(id: PortId, pin_addr: u16, ddr_addr: u16, port_addr: u16, irq: &mut IrqGraph) -> Self {
        let mut pin_irqs = [IrqHandle(0); 8];
        for (bit, slot) in pin_irqs.iter_mut().enumerate() {
            let name: &'static str = Box::leak(format!("IOCTL({}, {})", id.letter(), bit).into_boxed_str());
            *slot = irq.alloc(name, IrqFlags::FILTER_CHANGES);
        }
        let port_name: &'static str = Box::leak(format!("IOPORT({})", id.letter()).into_boxed_str());
        let port_irq = irq.alloc(port_name, IrqFlags::FILTER_CHANGES);
        let ddr_name: &'static str = Box::leak(format!("IODDR({})", id.letter()).into_boxed_str());
        let ddr_irq = irq.alloc(ddr_name, IrqFlags::FILTER_CHANGES);
        Self {
            id,
            pin_addr,
            ddr_addr,
            port_addr,
            external: 0,
            last_effective: 0,
            last_ddr: 0,
            pin_irqs,
            port_irq,
            ddr_irq,
        }
    }

    fn ddr_rb(&self) -> Regbit {
        Regbit::bits(self.ddr_addr, 0, 8)
    }

    fn port_rb(&self) -> Regbit {
        Regbit::bits(self.port_addr, 0, 8)
    }

    /// IRQ handle for pin `bit` (0-7) of this port.
    pub fn pin_irq(&self, bit: u8) -> IrqHandle {
        self.pin_irqs[bit as usize]
    }

    /// IRQ handle for the whole port, raised with the full effective byte on any change.
    pub fn port_irq(&self) -> IrqHandle {
        self.port_irq
    }

    /// IRQ handle raised with the new DDR byte whenever DDRx changes.
    pub fn ddr_irq(&self) -> IrqHandle {
        self.ddr_irq
    }

    /// Effective level of every pin: DDR-output bits reflect PORTx, DDR-input bits reflect the
    /// externally driven value (SS4.7: "Effective pin level").
    pub fn effective_level(&self, data: &DataSpace) -> u8 {
        let ddr = self.ddr_rb().read(data);
        let port = self.port_rb().read(data);
        (port & ddr) | (self.external & !ddr)
    }

    /// Recomputes PINx from the effective level and raises IRQs for pins whose effective level
    /// changed since the last recompute. Called after any write to PORTx or DDRx.
    fn recompute(&mut self, data: &mut DataSpace, irq: &mut IrqGraph) -> Vec<IrqEvent> {
        let effective = self.effective_level(data);
        Regbit::bits(self.pin_addr, 0, 8).write(data, effective);

        let mut events = Vec::new();
        let changed = effective ^ self.last_effective;
        for bit in 0..8u8 {
            if changed & (1 << bit) != 0 {
                events.extend(irq.raise(self.pin_irqs[bit as usize], ((effective >> bit) & 1) as u32));
            }
        }
        if changed != 0 {
            events.extend(irq.raise(self.port_irq, effective as u32));
        }
        self.last_effective = effective;
        events
    }

    /// Handle a CPU write to PORTx.
    pub fn on_write_port(&mut self, data: &mut DataSpace, irq: &mut IrqGraph) -> Vec<IrqEvent> {
        self.recompute(data, irq)
    }

    /// Handle a CPU write to DDRx.
    pub fn on_write_ddr(&mut self, data: &mut DataSpace, irq: &mut IrqGraph) -> Vec<IrqEvent> {
        let new_ddr = self.ddr_rb().read(data);
        let mut events = if new_ddr != self.last_ddr {
            irq.raise(self.ddr_irq, new_ddr as u32)
        } else {
            Vec::new()
        };
        self.last_ddr = new_ddr;
        events.extend(self.recompute(data, irq));
        events
    }

    /// Handle a CPU write to PINx: per AVR semantics, this toggles the written bits of PORTx
    /// rather than writing PINx directly.
    pub fn on_write_pin(&mut self, value: u8, data: &mut DataSpace, irq: &mut IrqGraph) -> Vec<IrqEvent> {
        let port_rb = self.port_rb();
        let current = port_rb.read(data);
        port_rb.write(data, current ^ value);
        self.recompute(data, irq)
    }

    /// Drive an externally-sourced pin (a button, or a signal fed in by the board harness),
    /// raising its IRQ if the effective level changes as a result.
    pub fn drive_external(&mut self, bit: u8, level: bool, data: &mut DataSpace, irq: &mut IrqGraph) -> Vec<IrqEvent> {
        if level {
            self.external |= 1 << bit;
        } else {
            self.external &= !(1 << bit);
        }
        self.recompute(data, irq)
    }

    /// The `Listener` this port's pin IRQs drive when wired directly to a board-level LED.
    pub fn led_listener(&self, bit: u8) -> Listener {
        Listener::PortPin {
            port: self.id as u8,
            bit,
        }
    }
}
