//! WebAssembly bindings for the board simulator.
//!
//! This module provides JavaScript-friendly APIs using wasm-bindgen.

// Use wee_alloc as the global allocator for smaller code size and better WASM support
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

use wasm_bindgen::prelude::*;

use crate::board::{Board, BoardWiring, Button, HaltReason, Led, RunOutcome};
use crate::peripherals::lcd::{LCD_HEIGHT, LCD_WIDTH};

/// Encode a `RunOutcome` the way the C ABI does: `1` still running, `0` halted on valid
/// termination, `-1` halted on a crash.
fn run_outcome_code(outcome: RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Ok => 1,
        RunOutcome::Halted(HaltReason::Done) => 0,
        RunOutcome::Halted(HaltReason::Crashed) => -1,
    }
}

/// WASM-friendly wrapper around the board. Unlike the C FFI, this owns the board directly
/// without a raw pointer since WASM is single-threaded.
#[wasm_bindgen]
pub struct WasmBoard {
    inner: Board,
}

#[wasm_bindgen]
impl WasmBoard {
    /// Create a new board instance. `variant` is an MCU name (e.g. `"atmega32u4"`); `new_board`
    /// selects the LED2/SW1-relocated pin layout over the legacy one.
    #[wasm_bindgen(constructor)]
    pub fn new(variant: &str, base_frequency_hz: u32, new_board: bool) -> Result<WasmBoard, JsValue> {
        console_error_panic_hook::set_once();

        let wiring = if new_board { BoardWiring::NewBoard } else { BoardWiring::Legacy };
        Board::init(variant, base_frequency_hz as u64, wiring)
            .map(|inner| WasmBoard { inner })
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    /// Load an ELF firmware image.
    #[wasm_bindgen]
    pub fn load_elf(&mut self, data: &[u8]) -> Result<(), JsValue> {
        self.inner.load_elf(data).map_err(|err| JsValue::from_str(&err.to_string()))
    }

    /// Load an Intel HEX firmware image.
    #[wasm_bindgen]
    pub fn load_hex(&mut self, text: &str) -> Result<(), JsValue> {
        self.inner.load_hex(text).map_err(|err| JsValue::from_str(&err.to_string()))
    }

    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Run a single logical step. Returns 1 if still running, 0 if halted on valid termination,
    /// -1 if halted on a crash.
    #[wasm_bindgen]
    pub fn run_single(&mut self) -> i32 {
        run_outcome_code(self.inner.run_single())
    }

    /// Run for the given number of simulated microseconds, at the board's current effective
    /// frequency. Returns 1/0/-1 as `run_single` does.
    #[wasm_bindgen]
    pub fn run_microseconds(&mut self, micros: f64) -> i32 {
        run_outcome_code(self.inner.run_microseconds(micros))
    }

    /// Run for one frame interval at the given refresh rate. Returns 1/0/-1 as `run_single` does.
    #[wasm_bindgen]
    pub fn run_frame(&mut self, fps: f64) -> i32 {
        run_outcome_code(self.inner.run_frame(fps))
    }

    #[wasm_bindgen]
    pub fn run_until_refresh(&mut self) -> i32 {
        run_outcome_code(self.inner.run_until_refresh())
    }

    #[wasm_bindgen(js_name = lcdWidth)]
    pub fn lcd_width(&self) -> u32 {
        LCD_WIDTH as u32
    }

    #[wasm_bindgen(js_name = lcdHeight)]
    pub fn lcd_height(&self) -> u32 {
        LCD_HEIGHT as u32
    }

    /// Copy the LCD into a Uint8ClampedArray-ready RGBA8888 buffer suitable for `ImageData`.
    #[wasm_bindgen(js_name = getFramebufferRgba)]
    pub fn get_framebuffer_rgba(&self) -> Vec<u8> {
        let pitch = LCD_WIDTH * 4;
        let mut buf = vec![0u8; pitch * LCD_HEIGHT];
        self.inner.render_rgba(&mut buf, pitch);
        buf
    }

    /// Copy the LCD into a single-channel luminance buffer, one byte per pixel.
    #[wasm_bindgen(js_name = getFramebufferLuminance)]
    pub fn get_framebuffer_luminance(&self) -> Vec<u8> {
        let mut buf = vec![0u8; LCD_WIDTH * LCD_HEIGHT];
        self.inner.render_luminance(&mut buf);
        buf
    }

    /// Set a button's pressed state directly, with no autorelease.
    #[wasm_bindgen(js_name = setButtonState)]
    pub fn set_button_state(&mut self, button: u8, pressed: bool) {
        if let Some(button) = button_from_u8(button) {
            self.inner.set_button_state(button, pressed);
        }
    }

    /// Press a button for a fixed interval before it releases on its own.
    #[wasm_bindgen(js_name = pushButtonWithAutorelease)]
    pub fn push_button_with_autorelease(&mut self, button: u8) {
        if let Some(button) = button_from_u8(button) {
            self.inner.push_button_with_autorelease(button);
        }
    }

    #[wasm_bindgen(js_name = getButtonState)]
    pub fn get_button_state(&self, button: u8) -> bool {
        button_from_u8(button).map(|b| self.inner.get_button_state(b)).unwrap_or(false)
    }

    #[wasm_bindgen(js_name = getLedState)]
    pub fn get_led_state(&self, led: u8) -> bool {
        led_from_u8(led).map(|l| self.inner.get_led_state(l)).unwrap_or(false)
    }

    /// Current EEPROM contents, for a host that wants to persist them to `localStorage` or
    /// IndexedDB itself.
    #[wasm_bindgen(js_name = eepromBytes)]
    pub fn eeprom_bytes(&self) -> Vec<u8> {
        self.inner.eeprom_bytes().to_vec()
    }

    /// Restore EEPROM contents previously obtained from `eepromBytes`.
    #[wasm_bindgen(js_name = loadEepromBytes)]
    pub fn load_eeprom_bytes(&mut self, bytes: &[u8]) {
        self.inner.load_eeprom_bytes(bytes);
    }
}

fn button_from_u8(value: u8) -> Option<Button> {
    match value {
        0 => Some(Button::Sw0),
        1 => Some(Button::Sw1),
        _ => None,
    }
}

fn led_from_u8(value: u8) -> Option<Led> {
    match value {
        0 => Some(Led::Led0),
        1 => Some(Led::Led1),
        2 => Some(Led::Led2),
        _ => None,
    }
}
