//! Board harness (SS4.10): wires the CPU, bus, and PCD8544 into the two LEDs, two buttons, and
//! five LCD control lines a host program actually drives, and exposes the run loop and save/load
//! surface every host binding (`lib.rs`'s C ABI, `wasm.rs`, `bin/boardsim.rs`) is built on top of.
//! This is the only module besides `firmware` that touches the filesystem.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use crate::bus::Bus;
use crate::cpu::{Cpu, CpuState};
use crate::error::{BoardError, BoardResult};
use crate::firmware::{self, FirmwareImage};
use crate::irq::{IrqEvent, IrqFlags, IrqHandle, Listener};
use crate::memory::{Eeprom, McuVariant};
use crate::peripherals::{LcdPin, Pcd8544, PortId};
use crate::scheduler::CycleScheduler;
use crate::tracer::{self, TracerEvent, TracerFn};

/// Board-visible LEDs. `Led2` only lights up under `BoardWiring::NewBoard` (SS4.10's open
/// question on the hardware revision that adds a third indicator); on `Legacy` it's declared but
/// never wired to a pin, so its state simply never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    Led0,
    Led1,
    Led2,
}

/// Board-visible push buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Sw0,
    Sw1,
}

/// Why a `run_*` call stopped short of its requested budget (SS6: "Done/Crashed surfaced by
/// `run_*` returning a halt indication; the simulator must not auto-reset").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Valid program termination (`CpuState::Done`, or `Stopped` -- explicit halt with no
    /// architectural error).
    Done,
    /// Illegal opcode, out-of-range PC, or stack underflow.
    Crashed,
}

/// Result of a `run_*` call: either it ran for its full requested budget, or the CPU halted
/// partway through and will not resume without an explicit `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    Halted(HaltReason),
}

impl RunOutcome {
    fn from_state(state: CpuState) -> Self {
        match state {
            CpuState::Crashed => RunOutcome::Halted(HaltReason::Crashed),
            CpuState::Done | CpuState::Stopped => RunOutcome::Halted(HaltReason::Done),
            CpuState::Running | CpuState::Sleeping => RunOutcome::Ok,
        }
    }

    /// `true` unless the CPU halted -- the shape most callers want without matching on
    /// `HaltReason`.
    pub fn is_running(self) -> bool {
        matches!(self, RunOutcome::Ok)
    }
}

/// Which pin layout `Board::init` wires up. `Legacy` is the original two-LED/two-button harness.
/// `NewBoard` adds `Led2` at port B bit 1, which collides with `Legacy`'s SW1 wiring on that same
/// pin -- `NewBoard` moves SW1 to port C bit 0 instead (see DESIGN.md for why this harness, not
/// the spec, had to make that call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardWiring {
    Legacy,
    NewBoard,
}

const LCD_PINS: [(LcdPin, PortId, u8); 5] = [
    (LcdPin::Sck, PortId::F, 7),
    (LcdPin::Din, PortId::B, 6),
    (LcdPin::Dc, PortId::B, 5),
    (LcdPin::Rst, PortId::B, 4),
    (LcdPin::Sce, PortId::D, 7),
];

const BUTTON_NODE_NAMES: [&str; 2] = ["BUTTON(sw0)", "BUTTON(sw1)"];

/// Autorelease delay for `push_button_with_autorelease` (SS6).
const AUTORELEASE_MICROS: f64 = 200_000.0;

fn led_wiring(wiring: BoardWiring) -> [Option<(PortId, u8)>; 3] {
    match wiring {
        BoardWiring::Legacy => [Some((PortId::B, 2)), Some((PortId::B, 3)), None],
        BoardWiring::NewBoard => [Some((PortId::B, 2)), Some((PortId::B, 3)), Some((PortId::B, 1))],
    }
}

fn button_wiring(wiring: BoardWiring) -> [(PortId, u8); 2] {
    match wiring {
        BoardWiring::Legacy => [(PortId::B, 0), (PortId::B, 1)],
        BoardWiring::NewBoard => [(PortId::B, 0), (PortId::C, 0)],
    }
}

/// The simulated board: an MCU (`Cpu` + `Bus`), a PCD8544, and the glue that turns raw port-pin
/// IRQ events into LED/button/LCD state a host can observe and drive.
pub struct Board {
    cpu: Cpu,
    bus: Bus,
    lcd: Pcd8544,
    eeprom: Eeprom,
    variant: McuVariant,
    wiring: BoardWiring,
    led_pins: [Option<(PortId, u8)>; 3],
    led_state: [bool; 3],
    led_callback: Option<Box<dyn FnMut(Led, bool)>>,
    button_pins: [(PortId, u8); 2],
    button_nodes: [IrqHandle; 2],
    button_state: [bool; 2],
    button_release: CycleScheduler<Button>,
    tracer: Option<TracerFn>,
    /// Last DDR byte observed per port, so `Listener::Ddr` can report the change's `old` value.
    last_ddr: [u8; 4],
    /// Fractional leftover cycles from the last `run_microseconds`/`run_milliseconds`/`run_frame`
    /// call, carried forward so repeated short calls don't lose time to rounding.
    cycle_carry: f64,
}

impl Board {
    /// Build a board around `variant_name` (an MCU name as accepted by `McuVariant::parse`),
    /// running at `base_frequency_hz` before any CLKPR division, with the given pin layout.
    pub fn init(variant_name: &str, base_frequency_hz: u64, wiring: BoardWiring) -> BoardResult<Self> {
        let variant = McuVariant::parse(variant_name)
            .ok_or_else(|| BoardError::UnknownMcuVariant(variant_name.to_string()))?;

        let mut board = Self {
            cpu: Cpu::new(),
            bus: Bus::new(variant, base_frequency_hz),
            lcd: Pcd8544::new(),
            eeprom: Eeprom::new(variant),
            variant,
            wiring,
            led_pins: led_wiring(wiring),
            led_state: [false; 3],
            led_callback: None,
            button_pins: button_wiring(wiring),
            button_nodes: [IrqHandle(0); 2],
            button_state: [false; 2],
            button_release: CycleScheduler::new(),
            tracer: None,
            last_ddr: [0; 4],
            cycle_carry: 0.0,
        };
        board.wire();
        Ok(board)
    }

    /// Register the board-level IRQ listeners (LEDs and the LCD's control lines observe a
    /// port's own pin node; buttons get a dedicated source node driving their port externally).
    /// Called from `init` and again from `reset`, since `Bus::reset` rebuilds a fresh `IrqGraph`
    /// and port set, discarding every previously registered listener.
    fn wire(&mut self) {
        self.led_pins = led_wiring(self.wiring);
        for pin in self.led_pins.iter().flatten() {
            let (port, bit) = *pin;
            let listener = self.bus.ports[port as usize].led_listener(bit);
            let node = self.bus.ports[port as usize].pin_irq(bit);
            self.bus.irq.register_notify(node, listener);
        }

        for (pin, port, bit) in LCD_PINS {
            let node = self.bus.ports[port as usize].pin_irq(bit);
            self.bus.irq.register_notify(node, Listener::LcdPin(pin));
        }

        for i in 0..self.bus.ports.len() {
            let node = self.bus.ports[i].port_irq();
            self.bus.irq.register_notify(node, Listener::PortByte(i as u8));
            let ddr_node = self.bus.ports[i].ddr_irq();
            self.bus.irq.register_notify(ddr_node, Listener::Ddr(i as u8));
        }
        self.last_ddr = [0; 4];

        self.button_pins = button_wiring(self.wiring);
        for (i, name) in BUTTON_NODE_NAMES.into_iter().enumerate() {
            let node = self.bus.irq.alloc(name, IrqFlags::FILTER_CHANGES);
            self.bus.irq.register_notify(node, Listener::Button(i as u8));
            self.button_nodes[i] = node;
        }
    }

    /// Reset the CPU, bus (rebuilding every peripheral and the IRQ graph), and LCD to their
    /// power-on state, then re-wire the board harness on top of the fresh graph.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset(self.variant);
        self.lcd.reset();
        self.led_state = [false; 3];
        self.button_state = [false; 2];
        self.button_release = CycleScheduler::new();
        self.cycle_carry = 0.0;
        self.wire();
    }

    /// Parse and install an ELF firmware image. Parsing happens before anything is touched, so a
    /// malformed file leaves the board exactly as it was.
    pub fn load_elf(&mut self, bytes: &[u8]) -> BoardResult<()> {
        let image = firmware::load_elf(bytes)?;
        self.install_firmware(image);
        Ok(())
    }

    /// Parse and install an Intel HEX firmware image. Same validate-then-install ordering as
    /// `load_elf`.
    pub fn load_hex(&mut self, text: &str) -> BoardResult<()> {
        let image = firmware::load_hex(text)?;
        self.install_firmware(image);
        Ok(())
    }

    fn install_firmware(&mut self, image: FirmwareImage) {
        self.bus.flash.reset();
        self.bus.flash.load_bytes(0, &image.flash);
        if let Some(eeprom_bytes) = &image.eeprom {
            self.eeprom.load(eeprom_bytes);
        }
        self.reset();
    }

    /// Load an EEPROM snapshot from disk, replacing the current contents up to its size.
    pub fn load_eeprom(&mut self, path: &Path) -> BoardResult<()> {
        let bytes = fs::read(path).map_err(BoardError::Eeprom)?;
        self.load_eeprom_bytes(&bytes);
        Ok(())
    }

    /// Persist the current EEPROM contents to disk.
    pub fn save_eeprom(&self, path: &Path) -> BoardResult<()> {
        fs::write(path, self.eeprom_bytes()).map_err(BoardError::Eeprom)
    }

    /// Current EEPROM contents, for hosts without a filesystem (WASM, the C ABI's in-memory
    /// callers).
    pub fn eeprom_bytes(&self) -> &[u8] {
        self.eeprom.as_bytes()
    }

    /// Replace the EEPROM contents from an in-memory snapshot.
    pub fn load_eeprom_bytes(&mut self, bytes: &[u8]) {
        self.eeprom.load(bytes);
    }

    /// Install a sink for structured trace events. Replaces any previously installed tracer.
    pub fn set_tracer(&mut self, tracer: TracerFn) {
        self.tracer = Some(tracer);
    }

    /// Advance by exactly one logical step: one CPU instruction (or interrupt dispatch) if
    /// running, or a jump straight to the next scheduled peripheral event if sleeping -- stepping
    /// a sleeping CPU one cycle at a time would mean looping uselessly until something wakes it.
    /// Returns `(cycles advanced, outcome)`.
    fn advance_one(&mut self) -> (u64, RunOutcome) {
        match self.cpu.state {
            CpuState::Done | CpuState::Crashed | CpuState::Stopped => (0, RunOutcome::from_state(self.cpu.state)),
            CpuState::Sleeping => {
                let now = self.bus.cycle();
                let Some(deadline) = self.bus.scheduler.next_deadline() else {
                    return (0, RunOutcome::Ok); // nothing will ever wake it without host intervention
                };
                let delta = deadline.saturating_sub(now);
                self.bus.advance_cycle(delta);
                let events = self.bus.drain_due_timers();
                self.apply_events(events);
                self.drain_button_releases();
                (delta, RunOutcome::Ok)
            }
            _ => {
                let (cycles, events, dispatched) = self.cpu.step(&mut self.bus);
                self.bus.advance_cycle(cycles as u64);
                if let Some(vector) = dispatched {
                    tracer::emit(&mut self.tracer, TracerEvent::Interrupt { vector });
                }
                self.apply_events(events);
                let timer_events = self.bus.drain_due_timers();
                self.apply_events(timer_events);
                self.drain_button_releases();
                (cycles as u64, RunOutcome::from_state(self.cpu.state))
            }
        }
    }

    /// Execute a single logical step. Returns `Halted` once the CPU has stopped (`Done`/`Crashed`).
    pub fn run_single(&mut self) -> RunOutcome {
        self.advance_one().1
    }

    fn run_cycles_budget(&mut self, cycles: f64) -> RunOutcome {
        let total = self.cycle_carry + cycles.max(0.0);
        let target = total.floor() as u64;
        self.cycle_carry = total - target as f64;

        let mut consumed = 0u64;
        while consumed < target {
            let (advanced, outcome) = self.advance_one();
            if !outcome.is_running() {
                return outcome;
            }
            if advanced == 0 {
                break; // sleeping with nothing scheduled; no further progress this call
            }
            consumed += advanced;
        }
        RunOutcome::Ok
    }

    /// Run for approximately `micros` microseconds of simulated time, at the clock prescaler's
    /// current effective frequency.
    pub fn run_microseconds(&mut self, micros: f64) -> RunOutcome {
        let freq = self.bus.clkpr.effective_frequency() as f64;
        self.run_cycles_budget(micros * freq / 1_000_000.0)
    }

    pub fn run_milliseconds(&mut self, millis: f64) -> RunOutcome {
        self.run_microseconds(millis * 1_000.0)
    }

    /// Run for one frame interval at `fps` frames per second.
    pub fn run_frame(&mut self, fps: f64) -> RunOutcome {
        self.run_microseconds(1_000_000.0 / fps)
    }

    /// Run until the LCD's raster cursor completes a full lap back to its position on entry.
    pub fn run_until_refresh(&mut self) -> RunOutcome {
        let entry = self.lcd.raster_position();
        let mut moved = false;
        loop {
            let outcome = self.run_single();
            if !outcome.is_running() {
                return outcome;
            }
            let pos = self.lcd.raster_position();
            if pos != entry {
                moved = true;
            } else if moved {
                return RunOutcome::Ok;
            }
        }
    }

    fn drain_button_releases(&mut self) {
        let due = self.button_release.drain_due(self.bus.cycle());
        for button in due {
            self.set_button_state(button, false);
        }
    }

    /// Apply every `IrqEvent` the last step produced, in order. A `Listener::Button` event drives
    /// its wired port externally, which can itself raise further events (the port's own pin
    /// node); those go back on the same queue so they're applied in the order they actually
    /// occurred rather than recursively, keeping the borrow of `self.bus` simple.
    fn apply_events(&mut self, events: Vec<IrqEvent>) {
        let mut queue: VecDeque<IrqEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            match event.listener {
                Listener::PortPin { port, bit } => {
                    if let Some(led) = self.led_for_pin(port, bit) {
                        let old = self.led_state[led as usize];
                        let new = event.value != 0;
                        self.led_state[led as usize] = new;
                        if let Some(cb) = self.led_callback.as_mut() {
                            cb(led, new);
                        }
                        tracer::emit(&mut self.tracer, TracerEvent::IoPortPin { port, bit, old, new });
                    }
                }
                Listener::PortByte(port) => {
                    log::trace!("port {} effective byte changed to {:#04x}", port, event.value);
                }
                Listener::Ddr(port) => {
                    let old = self.last_ddr[port as usize];
                    let new = event.value as u8;
                    self.last_ddr[port as usize] = new;
                    tracer::emit(&mut self.tracer, TracerEvent::Ddr { port, old, new });
                }
                Listener::LcdPin(pin) => {
                    self.lcd.on_pin_change(pin, event.value != 0);
                }
                Listener::InterruptVector(vector) => {
                    self.bus.interrupts.raise(vector);
                }
                Listener::Button(id) => {
                    if let Some((port, bit)) = self.button_pins.get(id as usize).copied() {
                        let bus = &mut self.bus;
                        let more = bus.ports[port as usize].drive_external(bit, event.value != 0, &mut bus.data, &mut bus.irq);
                        queue.extend(more);
                    }
                }
            }
        }
    }

    fn led_for_pin(&self, port: u8, bit: u8) -> Option<Led> {
        const LEDS: [Led; 3] = [Led::Led0, Led::Led1, Led::Led2];
        self.led_pins
            .iter()
            .position(|slot| matches!(slot, Some((p, b)) if *p as u8 == port && *b == bit))
            .map(|i| LEDS[i])
    }

    pub fn get_led_state(&self, led: Led) -> bool {
        self.led_state[led as usize]
    }

    pub fn set_led_change_callback(&mut self, callback: Box<dyn FnMut(Led, bool)>) {
        self.led_callback = Some(callback);
    }

    pub fn get_button_state(&self, button: Button) -> bool {
        self.button_state[button as usize]
    }

    /// Cycles elapsed since the last reset, at the board's base (undivided) clock.
    pub fn cycle_count(&self) -> u64 {
        self.bus.cycle()
    }

    /// Current effective clock frequency, after any CLKPR division.
    pub fn effective_frequency_hz(&self) -> u64 {
        self.bus.clkpr.effective_frequency()
    }

    /// Set a button's pressed state and drive its wired pin immediately.
    pub fn set_button_state(&mut self, button: Button, pressed: bool) {
        self.button_state[button as usize] = pressed;
        let node = self.button_nodes[button as usize];
        let events = self.bus.irq.raise(node, pressed as u32);
        self.apply_events(events);
    }

    /// Press `button` and schedule its release 200ms of simulated time later (SS6).
    pub fn push_button_with_autorelease(&mut self, button: Button) {
        self.set_button_state(button, true);
        let freq = self.bus.clkpr.effective_frequency();
        self.button_release
            .register_in_microseconds(self.bus.cycle(), AUTORELEASE_MICROS, freq, button);
    }

    /// Raw packed 1bpp LCD framebuffer, `(84*48)/8` bytes, as the controller stores it.
    pub fn get_lcd_framebuffer(&self) -> &[u8] {
        self.lcd.framebuffer()
    }

    /// Render the LCD into a caller-owned RGBA8888 buffer with row stride `pitch` bytes, which
    /// must be at least `LCD_WIDTH * 4`.
    pub fn render_rgba(&self, buf: &mut [u8], pitch: usize) {
        let rendered = self.lcd.render_rgba();
        let row_bytes = crate::peripherals::lcd::LCD_WIDTH * 4;
        for (y, row) in rendered.chunks(row_bytes).enumerate() {
            let dst = &mut buf[y * pitch..y * pitch + row_bytes];
            dst.copy_from_slice(row);
        }
    }

    /// Render the LCD into a caller-owned single-channel luminance buffer,
    /// `LCD_WIDTH * LCD_HEIGHT` bytes.
    pub fn render_luminance(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.lcd.render_luminance());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Board {
        Board::init("atmega32u4", 16_000_000, BoardWiring::Legacy).unwrap()
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let err = Board::init("not-a-real-mcu", 16_000_000, BoardWiring::Legacy).unwrap_err();
        assert!(matches!(err, BoardError::UnknownMcuVariant(_)));
    }

    #[test]
    fn writing_portb_bit2_lights_led0() {
        let mut b = board();
        b.bus.write_data(crate::bus::regs::DDRB, 0xFF);
        let events = b.bus.write_data(crate::bus::regs::PORTB, 0b0000_0100);
        b.apply_events(events);
        assert!(b.get_led_state(Led::Led0));
        assert!(!b.get_led_state(Led::Led1));
    }

    #[test]
    fn led_change_callback_observes_toggles() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let mut b = board();
        let seen: Rc<RefCell<Vec<(Led, bool)>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        b.set_led_change_callback(Box::new(move |led, level| seen_clone.borrow_mut().push((led, level))));

        b.bus.write_data(crate::bus::regs::DDRB, 0xFF);
        let events = b.bus.write_data(crate::bus::regs::PORTB, 0b0000_1000);
        b.apply_events(events);

        assert_eq!(seen.borrow().as_slice(), &[(Led::Led1, true)]);
    }

    #[test]
    fn led2_is_unwired_on_legacy_and_wired_on_new_board() {
        let legacy = board();
        assert!(legacy.led_pins[2].is_none());

        let new_board = Board::init("atmega32u4", 16_000_000, BoardWiring::NewBoard).unwrap();
        assert_eq!(new_board.led_pins[2], Some((PortId::B, 1)));
        assert_eq!(new_board.button_pins[1], (PortId::C, 0));
    }

    #[test]
    fn pressing_sw0_drives_portb_bit0_low_input_high() {
        let mut b = board();
        b.set_button_state(Button::Sw0, true);
        assert_eq!(b.bus.read_data(crate::bus::regs::PINB) & 1, 1);
        assert!(b.get_button_state(Button::Sw0));
    }

    #[test]
    fn push_button_with_autorelease_releases_after_200ms() {
        let mut b = board();
        b.bus.flash.write_word(0, 0xCFFF); // RJMP self: keeps the CPU running so time advances
        b.push_button_with_autorelease(Button::Sw0);
        assert!(b.get_button_state(Button::Sw0));

        assert_eq!(b.run_milliseconds(100.0), RunOutcome::Ok);
        assert!(b.get_button_state(Button::Sw0));

        assert_eq!(b.run_milliseconds(150.0), RunOutcome::Ok);
        assert!(!b.get_button_state(Button::Sw0));
    }

    #[test]
    fn ddr_write_emits_a_ddr_tracer_event() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let mut b = board();
        let seen: Rc<RefCell<Vec<TracerEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        b.set_tracer(Box::new(move |ev| seen_clone.borrow_mut().push(ev)));

        let events = b.bus.write_data(crate::bus::regs::DDRB, 0xFF);
        b.apply_events(events);

        assert_eq!(
            seen.borrow().as_slice(),
            &[TracerEvent::Ddr { port: PortId::B as u8, old: 0, new: 0xFF }]
        );
    }

    #[test]
    fn lcd_control_pins_reach_the_controller() {
        let mut b = board();
        b.bus.write_data(crate::bus::regs::DDRD, 0xFF); // SCE is port D bit 7
        b.bus.write_data(crate::bus::regs::DDRB, 0xFF); // DIN/DC/RST are port B
        let events = b.bus.write_data(crate::bus::regs::PORTD, 0); // SCE low: chip enabled
        b.apply_events(events);
        let events = b.bus.write_data(crate::bus::regs::PORTB, 0b0001_0000); // RST high: not reset
        b.apply_events(events);
        // No direct observable here beyond "it didn't panic" without decoding a full LCD
        // transaction; `peripherals::lcd` covers command/data decode in isolation.
        assert_eq!(b.lcd.raster_position(), (0, 0));
    }

    #[test]
    fn reset_clears_led_and_button_state_and_rewires() {
        let mut b = board();
        b.bus.write_data(crate::bus::regs::DDRB, 0xFF);
        let events = b.bus.write_data(crate::bus::regs::PORTB, 0b0000_0100);
        b.apply_events(events);
        assert!(b.get_led_state(Led::Led0));

        b.reset();
        assert!(!b.get_led_state(Led::Led0));

        // The IRQ graph was rebuilt by `Bus::reset`; wiring must still work afterward.
        b.bus.write_data(crate::bus::regs::DDRB, 0xFF);
        let events = b.bus.write_data(crate::bus::regs::PORTB, 0b0000_0100);
        b.apply_events(events);
        assert!(b.get_led_state(Led::Led0));
    }

    #[test]
    fn running_off_the_end_of_blank_flash_halts_as_crashed() {
        let mut b = board();
        // Flash defaults to 0xFFFF, which decodes to no known instruction.
        assert_eq!(b.run_single(), RunOutcome::Halted(HaltReason::Crashed));
        assert_eq!(b.run_single(), RunOutcome::Halted(HaltReason::Crashed));
    }

    #[test]
    fn run_cycles_budget_carries_fractional_cycles_across_calls() {
        let mut b = board();
        b.bus.flash.write_word(0, 0xCFFF); // RJMP -1: spin in place forever
        // At 16 MHz, 1 us is exactly 16 cycles; split across two half-microsecond calls to
        // exercise the fractional carry.
        assert_eq!(b.run_microseconds(0.5), RunOutcome::Ok);
        assert_eq!(b.run_microseconds(0.5), RunOutcome::Ok);
        assert_eq!(b.bus.cycle(), 16);
    }
}
