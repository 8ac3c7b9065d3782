//! Black-box scenarios driven entirely through `Board`'s public surface: firmware images in, LED
//! and button state observed out. Scenarios that require bit-banging the LCD's serial protocol
//! (five GPIO writes per bit) aren't practical to hand-assemble here without a toolchain to
//! verify the encoding at that scale; those stay covered by `peripherals::lcd`'s own white-box
//! tests (see DESIGN.md).

use std::cell::RefCell;
use std::rc::Rc;

use boardsim_core::board::{Board, BoardWiring, Button, HaltReason, Led, RunOutcome};

fn board() -> Board {
    Board::init("atmega32u4", 16_000_000, BoardWiring::Legacy).unwrap()
}

/// `SBI 0x04,2` / `SBI 0x05,2`: DDRB bit 2 output, then PORTB bit 2 high, which is LED0's pin
/// under `BoardWiring::Legacy`.
const LED0_ON_HEX: &str = ":04000000229A2A9A7C\n:00000001FF\n";

#[test]
fn hex_firmware_lights_led0_and_the_callback_observes_it() {
    let mut b = board();
    let seen: Rc<RefCell<Vec<(Led, bool)>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    b.set_led_change_callback(Box::new(move |led, level| seen_clone.borrow_mut().push((led, level))));

    b.load_hex(LED0_ON_HEX).unwrap();
    assert!(!b.get_led_state(Led::Led0));

    assert_eq!(b.run_single(), RunOutcome::Ok); // SBI DDRB
    assert_eq!(b.run_single(), RunOutcome::Ok); // SBI PORTB

    assert!(b.get_led_state(Led::Led0));
    assert!(!b.get_led_state(Led::Led1));
    assert_eq!(seen.borrow().as_slice(), &[(Led::Led0, true)]);
}

#[test]
fn running_past_the_end_of_a_short_program_crashes() {
    let mut b = board();
    b.load_hex(LED0_ON_HEX).unwrap();
    assert_eq!(b.run_single(), RunOutcome::Ok);
    assert_eq!(b.run_single(), RunOutcome::Ok);
    // Flash past the two loaded instructions is still blank (0xFFFF): an illegal opcode.
    assert_eq!(b.run_single(), RunOutcome::Halted(HaltReason::Crashed));
}

#[test]
fn button_autorelease_fires_between_100ms_and_200ms() {
    let mut b = board();
    // RJMP self: keeps the CPU running so simulated time actually advances.
    b.load_hex(":02000000FFCF30\n:00000001FF\n").unwrap();

    b.push_button_with_autorelease(Button::Sw0);
    assert!(b.get_button_state(Button::Sw0));

    assert_eq!(b.run_milliseconds(100.0), RunOutcome::Ok);
    assert!(b.get_button_state(Button::Sw0), "should still be pressed before the 200ms deadline");

    assert_eq!(b.run_milliseconds(150.0), RunOutcome::Ok);
    assert!(!b.get_button_state(Button::Sw0), "should have released by 250ms elapsed");
}

/// Unlocks CLKPR (write with bit 7 set), then shifts the clock down by 4 (k=2) within the
/// 5-cycle window, then spins forever so the effective frequency can be observed after the
/// division actually takes hold.
///
/// ```text
/// LDI  r16, 0x80      ; E800
/// STS  0x0061, r16    ; 9300 0061   (CLKPR unlock write)
/// LDI  r17, 0x02      ; E012
/// STS  0x0061, r17    ; 9310 0061   (CLKPR <- shift 2, within the unlock window)
/// RJMP .              ; CFFF
/// ```
const CLKPR_DIVIDE_BY_4_HEX: &str = ":0E00000000E80093610012E010936100FFCF52\n:00000001FF\n";

#[test]
fn clkpr_unlock_sequence_divides_the_effective_clock() {
    let mut b = board();
    b.load_hex(CLKPR_DIVIDE_BY_4_HEX).unwrap();
    assert_eq!(b.effective_frequency_hz(), 16_000_000);

    // LDI, STS, LDI, STS: four logical steps to run the whole unlock sequence.
    for _ in 0..4 {
        assert_eq!(b.run_single(), RunOutcome::Ok);
    }
    assert_eq!(b.effective_frequency_hz(), 4_000_000);

    let before = b.cycle_count();
    assert_eq!(b.run_microseconds(1000.0), RunOutcome::Ok);
    // At 4 MHz, one simulated millisecond is exactly 4000 cycles.
    assert_eq!(b.cycle_count() - before, 4000);
}

/// Arms `TIMER0`'s compare-A interrupt, sleeps, and lets the compare match wake and dispatch the
/// CPU into an ISR that lights LED1 -- exercising sleep/wake, vector dispatch through a real
/// `JMP` trampoline in the vector table, and `RETI` all from firmware alone.
///
/// ```text
///          RJMP   start                ; C00F
///          .word  0, 0, 0              ; unused vector slots before TIMER0_COMPA's
/// (word 4) JMP    handler              ; 940C 001A
///          .word  0 * 10                ; unused vector slots after TIMER0_COMPA's
/// start:
///          LDI    r16, 10              ; E00A
///          OUT    0x27, r16            ; BD07   OCR0A <- 10
///          LDI    r17, 0x01            ; E011
///          OUT    0x25, r17            ; BD15   TCCR0B <- prescaler /1
///          LDI    r18, 0x02            ; E022
///          STS    0x006E, r18          ; 9320 006E   TIMSK0 <- COMPA enable
///          SEI                         ; 9478
///          SLEEP                       ; 9588
/// loop:    RJMP   loop                 ; CFFF
/// handler:
///          SBI    0x04, 3              ; 9A23   DDRB bit 3 (LED1) output
///          SBI    0x05, 3              ; 9A2B   PORTB bit 3 high (LED1 on)
///          RETI                        ; 9518
/// ```
const SLEEP_AND_TIMER_WAKE_HEX: &str = concat!(
    ":100000000FC00000000000000C941A000000000067\n",
    ":1000100000000000000000000000000000000000E0\n",
    ":100020000AE007BD11E015BD22E020936E00789430\n",
    ":0A0030008895FFCF239A2B9A1895AC\n",
    ":00000001FF\n",
);

#[test]
fn sleep_wakes_on_timer_compare_match_and_dispatches_into_the_isr() {
    let mut b = board();
    b.load_hex(SLEEP_AND_TIMER_WAKE_HEX).unwrap();
    assert!(!b.get_led_state(Led::Led1));

    // Generous budget: setup plus the compare match (10 cycles at /1) plus dispatch, all well
    // under a microsecond at 16 MHz.
    let outcome = b.run_microseconds(50.0);
    assert_eq!(outcome, RunOutcome::Ok, "the program spins forever after the ISR returns");
    assert!(b.get_led_state(Led::Led1));
    assert!(!b.get_led_state(Led::Led0));
}

#[test]
fn reset_clears_led_and_button_state_and_blanks_the_lcd_framebuffer() {
    let mut b = board();
    b.load_hex(LED0_ON_HEX).unwrap();
    b.run_single();
    b.run_single();
    assert!(b.get_led_state(Led::Led0));

    b.set_button_state(Button::Sw0, true);
    b.reset();

    assert!(!b.get_led_state(Led::Led0));
    assert!(!b.get_button_state(Button::Sw0));
    // A fresh PCD8544 reports every pixel off, so an all-off luminance render is the minimum
    // 230 (the controller's default contrast) at every byte.
    let mut buf = vec![0u8; 84 * 48];
    b.render_luminance(&mut buf);
    assert!(buf.iter().all(|&v| v == 230));
}
