//! Simulated AVR + PCD8544 board, with a stable C ABI.
//!
//! No OS APIs are used beyond the firmware/EEPROM file paths a host passes in explicitly -- all
//! other I/O crosses the boundary as byte buffers.
//!
//! # Architecture
//!
//! - `memory`: flash, data-space, and EEPROM storage
//! - `regbit`: sub-byte register field access shared by every peripheral
//! - `irq`: the signal graph peripherals and the board harness connect through
//! - `scheduler`: the cycle-keyed event queue timers and button autorelease use
//! - `interrupt`: the vector table
//! - `bus`: I/O address decoding and peripheral dispatch
//! - `peripherals`: I/O ports, timers, the clock prescaler, the PCD8544
//! - `cpu`: the AVR instruction set
//! - `firmware`: ELF and Intel HEX loaders
//! - `board`: the harness tying all of the above to LEDs, buttons, and the LCD
//!
//! # Memory Map (ATmega32U4-class data space)
//!
//! | Address Range     | Region                           |
//! |--------------------|----------------------------------|
//! | 0x0000 - 0x001F    | Register file (r0-r31)           |
//! | 0x0020 - 0x005F    | Standard I/O (IN/OUT)             |
//! | 0x0060 - 0x00FF    | Extended I/O (LD/ST only)         |
//! | 0x0100 - 0x0AFF    | Internal SRAM                     |

pub mod board;
pub mod bus;
pub mod cpu;
pub mod error;
pub mod firmware;
pub mod interrupt;
pub mod irq;
pub mod memory;
pub mod peripherals;
pub mod regbit;
pub mod scheduler;
pub mod tracer;

#[cfg(feature = "wasm")]
pub mod wasm;

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::slice;

pub use board::{Board, BoardWiring, Button, Led};
use board::{HaltReason, RunOutcome};
use tracer::TracerEvent;

/// Encode a `RunOutcome` for hosts that can only receive an integer: `1` still running, `0`
/// halted on valid termination, `-1` halted on a crash.
fn run_outcome_code(outcome: RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Ok => 1,
        RunOutcome::Halted(HaltReason::Done) => 0,
        RunOutcome::Halted(HaltReason::Crashed) => -1,
    }
}

fn wiring_from_i32(value: i32) -> BoardWiring {
    if value == 1 {
        BoardWiring::NewBoard
    } else {
        BoardWiring::Legacy
    }
}

fn led_from_i32(value: i32) -> Option<Led> {
    match value {
        0 => Some(Led::Led0),
        1 => Some(Led::Led1),
        2 => Some(Led::Led2),
        _ => None,
    }
}

fn button_from_i32(value: i32) -> Option<Button> {
    match value {
        0 => Some(Button::Sw0),
        1 => Some(Button::Sw1),
        _ => None,
    }
}

/// Encode a `TracerEvent` as the `(kind, p1, p2, p3, p4)` shape `tracer::TracerEvent`'s own docs
/// describe, for hosts that can only receive plain integers across the FFI boundary.
fn encode_trace_event(event: TracerEvent) -> (i32, i32, i32, i32, i32) {
    match event {
        TracerEvent::IoPortPin { port, bit, old, new } => (0, port as i32, bit as i32, old as i32, new as i32),
        TracerEvent::Ddr { port, old, new } => (1, port as i32, old as i32, new as i32, 0),
        TracerEvent::Interrupt { vector } => (2, vector as i32, 0, 0, 0),
    }
}

type LedCallback = extern "C" fn(led: i32, level: i32, user_data: *mut c_void);
type TracerCallback = extern "C" fn(kind: i32, p1: i32, p2: i32, p3: i32, p4: i32, user_data: *mut c_void);

/// Create a board instance. `variant` is a NUL-terminated MCU name (e.g. `"atmega32u4"`), `wiring`
/// is `0` for `Legacy` or `1` for `NewBoard`. Returns null if `variant` is unreadable or unknown.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_create")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_create")]
pub extern "C" fn board_create(variant: *const c_char, base_frequency_hz: u32, wiring: i32) -> *mut Board {
    if variant.is_null() {
        return std::ptr::null_mut();
    }
    let Ok(variant) = unsafe { CStr::from_ptr(variant) }.to_str() else {
        return std::ptr::null_mut();
    };
    match Board::init(variant, base_frequency_hz as u64, wiring_from_i32(wiring)) {
        Ok(board) => Box::into_raw(Box::new(board)),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy a board instance. Safe to call with a null pointer.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_destroy")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_destroy")]
pub extern "C" fn board_destroy(board: *mut Board) {
    if !board.is_null() {
        unsafe { drop(Box::from_raw(board)) };
    }
}

#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_reset")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_reset")]
pub extern "C" fn board_reset(board: *mut Board) {
    if board.is_null() {
        return;
    }
    unsafe { &mut *board }.reset();
}

/// Load an ELF firmware image. Returns 0 on success, -1 on a null pointer, -2 on a parse error.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_load_elf")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_load_elf")]
pub extern "C" fn board_load_elf(board: *mut Board, data: *const u8, len: usize) -> i32 {
    if board.is_null() || data.is_null() {
        return -1;
    }
    let board = unsafe { &mut *board };
    let bytes = unsafe { slice::from_raw_parts(data, len) };
    match board.load_elf(bytes) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

/// Load an Intel HEX firmware image from a NUL-terminated string. Returns 0 on success, -1 on a
/// null or non-UTF-8 pointer, -2 on a parse error.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_load_hex")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_load_hex")]
pub extern "C" fn board_load_hex(board: *mut Board, text: *const c_char) -> i32 {
    if board.is_null() || text.is_null() {
        return -1;
    }
    let Ok(text) = unsafe { CStr::from_ptr(text) }.to_str() else {
        return -1;
    };
    match unsafe { &mut *board }.load_hex(text) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

/// Execute a single logical step. Returns 1 if still running, 0 if halted on valid termination,
/// -1 if halted on a crash.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_run_single")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_run_single")]
pub extern "C" fn board_run_single(board: *mut Board) -> i32 {
    if board.is_null() {
        return 0;
    }
    run_outcome_code(unsafe { &mut *board }.run_single())
}

/// Run for `micros` simulated microseconds. Returns 1/0/-1 as `board_run_single` does.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_run_microseconds")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_run_microseconds")]
pub extern "C" fn board_run_microseconds(board: *mut Board, micros: f64) -> i32 {
    if board.is_null() {
        return 0;
    }
    run_outcome_code(unsafe { &mut *board }.run_microseconds(micros))
}

/// Run for `millis` simulated milliseconds. Returns 1/0/-1 as `board_run_single` does.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_run_milliseconds")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_run_milliseconds")]
pub extern "C" fn board_run_milliseconds(board: *mut Board, millis: f64) -> i32 {
    if board.is_null() {
        return 0;
    }
    run_outcome_code(unsafe { &mut *board }.run_milliseconds(millis))
}

/// Run for one frame interval at `fps` frames per second. Returns 1/0/-1 as `board_run_single` does.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_run_frame")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_run_frame")]
pub extern "C" fn board_run_frame(board: *mut Board, fps: f64) -> i32 {
    if board.is_null() {
        return 0;
    }
    run_outcome_code(unsafe { &mut *board }.run_frame(fps))
}

/// Run until the LCD raster cursor completes a full lap. Returns 1/0/-1 as `board_run_single` does.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_run_until_refresh")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_run_until_refresh")]
pub extern "C" fn board_run_until_refresh(board: *mut Board) -> i32 {
    if board.is_null() {
        return 0;
    }
    run_outcome_code(unsafe { &mut *board }.run_until_refresh())
}

/// Returns 1 if the LED is lit, 0 if dark or unknown. `led` is 0/1/2 for LED0/LED1/LED2.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_get_led_state")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_get_led_state")]
pub extern "C" fn board_get_led_state(board: *const Board, led: i32) -> i32 {
    if board.is_null() {
        return 0;
    }
    match led_from_i32(led) {
        Some(led) => unsafe { &*board }.get_led_state(led) as i32,
        None => 0,
    }
}

/// Install a callback fired whenever an LED's state changes. `user_data` is passed through
/// unexamined on every call.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_set_led_callback")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_set_led_callback")]
pub extern "C" fn board_set_led_callback(board: *mut Board, callback: LedCallback, user_data: *mut c_void) {
    if board.is_null() {
        return;
    }
    unsafe { &mut *board }.set_led_change_callback(Box::new(move |led, level| {
        callback(led as i32, level as i32, user_data);
    }));
}

#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_get_button_state")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_get_button_state")]
pub extern "C" fn board_get_button_state(board: *const Board, button: i32) -> i32 {
    if board.is_null() {
        return 0;
    }
    match button_from_i32(button) {
        Some(button) => unsafe { &*board }.get_button_state(button) as i32,
        None => 0,
    }
}

#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_set_button_state")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_set_button_state")]
pub extern "C" fn board_set_button_state(board: *mut Board, button: i32, pressed: i32) {
    if board.is_null() {
        return;
    }
    if let Some(button) = button_from_i32(button) {
        unsafe { &mut *board }.set_button_state(button, pressed != 0);
    }
}

#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_push_button_with_autorelease")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_push_button_with_autorelease")]
pub extern "C" fn board_push_button_with_autorelease(board: *mut Board, button: i32) {
    if board.is_null() {
        return;
    }
    if let Some(button) = button_from_i32(button) {
        unsafe { &mut *board }.push_button_with_autorelease(button);
    }
}

/// Pointer to the raw packed 1bpp LCD framebuffer, owned by the board. Writes its length in
/// bytes to `len` if non-null. Returns null if `board` is null.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_get_lcd_framebuffer")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_get_lcd_framebuffer")]
pub extern "C" fn board_get_lcd_framebuffer(board: *const Board, len: *mut usize) -> *const u8 {
    if board.is_null() {
        return std::ptr::null();
    }
    let fb = unsafe { &*board }.get_lcd_framebuffer();
    if !len.is_null() {
        unsafe { *len = fb.len() };
    }
    fb.as_ptr()
}

/// Render the LCD into a caller-owned RGBA8888 buffer. Returns 0 on success, -1 if `board` or
/// `buf` is null or `buf_len` is too small for `pitch * 48` bytes.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_render_rgba")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_render_rgba")]
pub extern "C" fn board_render_rgba(board: *const Board, buf: *mut u8, buf_len: usize, pitch: usize) -> i32 {
    if board.is_null() || buf.is_null() || buf_len < pitch * peripherals::lcd::LCD_HEIGHT {
        return -1;
    }
    let buf = unsafe { slice::from_raw_parts_mut(buf, buf_len) };
    unsafe { &*board }.render_rgba(buf, pitch);
    0
}

/// Render the LCD into a caller-owned single-channel luminance buffer of exactly
/// `LCD_WIDTH * LCD_HEIGHT` bytes. Returns 0 on success, -1 on a null pointer or wrong size.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_render_luminance")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_render_luminance")]
pub extern "C" fn board_render_luminance(board: *const Board, buf: *mut u8, buf_len: usize) -> i32 {
    let expected = peripherals::lcd::LCD_WIDTH * peripherals::lcd::LCD_HEIGHT;
    if board.is_null() || buf.is_null() || buf_len != expected {
        return -1;
    }
    let buf = unsafe { slice::from_raw_parts_mut(buf, buf_len) };
    unsafe { &*board }.render_luminance(buf);
    0
}

/// Install a structured trace sink, called with `(kind, p1, p2, p3, p4, user_data)` per event
/// (see `tracer::TracerEvent`'s doc comment for the field mapping).
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_set_tracer")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_set_tracer")]
pub extern "C" fn board_set_tracer(board: *mut Board, callback: TracerCallback, user_data: *mut c_void) {
    if board.is_null() {
        return;
    }
    unsafe { &mut *board }.set_tracer(Box::new(move |event| {
        let (kind, p1, p2, p3, p4) = encode_trace_event(event);
        callback(kind, p1, p2, p3, p4, user_data);
    }));
}

/// Save the current EEPROM contents to `path` (a NUL-terminated string). Returns 0 on success,
/// -1 on a null or non-UTF-8 pointer, -2 on an I/O error.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_save_eeprom")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_save_eeprom")]
pub extern "C" fn board_save_eeprom(board: *const Board, path: *const c_char) -> i32 {
    if board.is_null() || path.is_null() {
        return -1;
    }
    let Ok(path) = unsafe { CStr::from_ptr(path) }.to_str() else {
        return -1;
    };
    match unsafe { &*board }.save_eeprom(std::path::Path::new(path)) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

/// Load EEPROM contents from `path`. Returns 0 on success, -1 on a null or non-UTF-8 pointer, -2
/// on an I/O error.
#[cfg_attr(not(feature = "ios_prefixed"), export_name = "board_load_eeprom")]
#[cfg_attr(feature = "ios_prefixed", export_name = "rust_board_load_eeprom")]
pub extern "C" fn board_load_eeprom(board: *mut Board, path: *const c_char) -> i32 {
    if board.is_null() || path.is_null() {
        return -1;
    }
    let Ok(path) = unsafe { CStr::from_ptr(path) }.to_str() else {
        return -1;
    };
    match unsafe { &mut *board }.load_eeprom(std::path::Path::new(path)) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn create_destroy_roundtrip() {
        let variant = CString::new("atmega32u4").unwrap();
        let board = board_create(variant.as_ptr(), 16_000_000, 0);
        assert!(!board.is_null());
        board_destroy(board);
    }

    #[test]
    fn unknown_variant_yields_null() {
        let variant = CString::new("not-a-real-mcu").unwrap();
        let board = board_create(variant.as_ptr(), 16_000_000, 0);
        assert!(board.is_null());
    }

    #[test]
    fn load_hex_then_run_single_lights_led0() {
        let variant = CString::new("atmega32u4").unwrap();
        let board = board_create(variant.as_ptr(), 16_000_000, 0);

        // SBI 0x04, 2 (DDRB bit 2: output); SBI 0x05, 2 (PORTB bit 2: high) -- io addr = reg - 0x20
        let hex = CString::new(":04000000229A2A9A7C\n:00000001FF\n").unwrap();
        let rc = board_load_hex(board, hex.as_ptr());
        assert_eq!(rc, 0);

        board_run_single(board);
        board_run_single(board);
        assert_eq!(board_get_led_state(board, 0), 1);

        board_destroy(board);
    }

    #[test]
    fn framebuffer_pointer_is_stable_and_nonnull() {
        let variant = CString::new("atmega32u4").unwrap();
        let board = board_create(variant.as_ptr(), 16_000_000, 0);
        let mut len: usize = 0;
        let ptr = board_get_lcd_framebuffer(board, &mut len);
        assert!(!ptr.is_null());
        assert_eq!(len, (peripherals::lcd::LCD_WIDTH * peripherals::lcd::LCD_HEIGHT) / 8);
        board_destroy(board);
    }
}
