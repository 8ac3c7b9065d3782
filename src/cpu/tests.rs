use super::*;
use crate::bus::{regs, vectors};
use crate::memory::McuVariant;

fn bus() -> Bus {
    Bus::new(McuVariant::Atmega32U4, 16_000_000)
}

#[test]
fn sleeping_cpu_consumes_no_cycles_until_woken() {
    let mut bus = bus();
    let mut cpu = Cpu::new();
    cpu.state = CpuState::Sleeping;
    assert_eq!(cpu.step(&mut bus).0, 0);
    assert_eq!(cpu.state, CpuState::Sleeping);
}

#[test]
fn sleeping_cpu_wakes_on_pending_interrupt_regardless_of_global_enable() {
    let mut bus = bus();
    let mut cpu = Cpu::new();
    cpu.state = CpuState::Sleeping;
    bus.interrupts.set_enabled(vectors::TIMER0_OVF, true);
    bus.interrupts.raise(vectors::TIMER0_OVF);
    // SREG.I left clear: wake doesn't require global interrupts enabled.
    bus.flash.write_word(0, 0x0000); // NOP, executed once woken
    let (cycles, _, _) = cpu.step(&mut bus);
    assert_eq!(cpu.state, CpuState::Running);
    assert_eq!(cycles, 1);
}

#[test]
fn pending_enabled_interrupt_dispatches_instead_of_executing_next_opcode() {
    let mut bus = bus();
    let mut cpu = Cpu::new();
    helpers::set_sp(&mut bus, 0x0AFF);
    helpers::set_flag(&mut bus, flags::I, true);
    bus.interrupts.set_enabled(vectors::TIMER0_OVF, true);
    bus.interrupts.raise(vectors::TIMER0_OVF);
    bus.flash.write_word(0, 0xE0FF); // LDI r31, 0xFF -- must NOT execute this step

    let (cycles, events, dispatched) = cpu.step(&mut bus);

    assert_eq!(cycles, crate::interrupt::DISPATCH_CYCLES as u32);
    assert!(events.is_empty());
    assert_eq!(dispatched, Some(vectors::TIMER0_OVF));
    assert_ne!(cpu.pc, 1);
    assert_eq!(helpers::reg(&bus, 31), 0x00);
    assert!(!helpers::flag(&bus, flags::I));
    assert_eq!(helpers::pop_pc(&mut bus), 0);
}

#[test]
fn reset_returns_pc_to_zero_and_state_to_running() {
    let mut cpu = Cpu::new();
    cpu.pc = 42;
    cpu.state = CpuState::Crashed;
    cpu.reset();
    assert_eq!(cpu.pc, 0);
    assert_eq!(cpu.state, CpuState::Running);
}

#[test]
fn crashed_or_done_cpu_does_not_step() {
    let mut bus = bus();
    let mut cpu = Cpu::new();
    cpu.state = CpuState::Done;
    bus.flash.write_word(0, 0xE0FF);
    assert_eq!(cpu.step(&mut bus).0, 0);
    assert_eq!(cpu.pc, 0);
}
