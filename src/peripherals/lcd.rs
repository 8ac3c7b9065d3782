//! PCD8544 monochrome LCD controller (SS4.11). A bit-level serial receiver over five control
//! lines (SCK, DIN, DC, RST, SCE) feeding a two-mode (control/data) command decoder and a
//! 48x84 1bpp framebuffer with a moving raster cursor.
//!
//! The command decode order below is load-bearing: commands are tested as a fixed priority
//! chain of bit tests, not a match on distinct opcodes, so a byte that sets multiple high bits
//! is interpreted by whichever test comes first. This mirrors the datasheet's own command table
//! layout and must not be reordered.

pub const LCD_WIDTH: usize = 84;
pub const LCD_HEIGHT: usize = 48;
const FRAMEBUFFER_BYTES: usize = (LCD_WIDTH * LCD_HEIGHT) / 8;

/// The five control lines the serial receiver listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcdPin {
    Sck,
    Din,
    Dc,
    Rst,
    Sce,
}

pub struct Pcd8544 {
    pixels: [u8; FRAMEBUFFER_BYTES],
    position_x: u8,
    position_y: u8,
    contrast: u8,
    extended_commands: bool,
    invert_display: bool,
    reset: bool,
    chip_enable: bool,
    clock_count: u8,
    shift_register: u8,
    din_level: bool,
    data_flag: bool,
    pub pixels_changed: bool,
}

impl Pcd8544 {
    pub fn new() -> Self {
        Self {
            pixels: [0u8; FRAMEBUFFER_BYTES],
            position_x: 0,
            position_y: 0,
            contrast: 0,
            extended_commands: false,
            invert_display: false,
            reset: false,
            chip_enable: true,
            clock_count: 0,
            shift_register: 0,
            din_level: false,
            data_flag: false,
            pixels_changed: true,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Raster cursor position, `(column, row-of-8-pixels)`, used by `run_until_refresh` to
    /// detect a full frame.
    pub fn raster_position(&self) -> (u8, u8) {
        (self.position_x, self.position_y)
    }

    /// Raw packed 1bpp framebuffer, column-major 8-pixel bands, as the controller stores it.
    pub fn framebuffer(&self) -> &[u8] {
        &self.pixels
    }

    /// Dispatch a level change on one of the five control lines.
    pub fn on_pin_change(&mut self, pin: LcdPin, value: bool) {
        match pin {
            LcdPin::Sce => {
                // SCE is active low: value == 0 (line driven low) means chip enabled.
                self.chip_enable = !value;
            }
            LcdPin::Rst => {
                // RST is active low.
                self.reset = !value;
                if self.reset {
                    self.pixels = [0u8; FRAMEBUFFER_BYTES];
                    self.pixels_changed = true;
                }
            }
            LcdPin::Din => {
                self.din_level = value;
            }
            LcdPin::Dc => {
                self.data_flag = value;
            }
            LcdPin::Sck => {
                if !self.chip_enable {
                    return;
                }
                if value {
                    // DIN sampled on the rising edge of SCK, MSB first.
                    self.shift_register = (self.shift_register << 1) | self.din_level as u8;
                    self.clock_count += 1;
                    if self.clock_count >= 8 {
                        let byte = self.shift_register;
                        if self.data_flag {
                            self.handle_data(byte);
                        } else {
                            self.handle_control(byte);
                        }
                        self.shift_register = 0;
                        self.clock_count = 0;
                    }
                }
            }
        }
    }

    fn handle_data(&mut self, value: u8) {
        if self.reset {
            return;
        }
        let pixel_x = self.position_x;
        let mut pixel_y = self.position_y as u32 * 8;
        for i in 0..8u8 {
            let on = (value >> i) & 1 != 0;
            let idx = pixel_y * LCD_WIDTH as u32 + pixel_x as u32;
            let byte = (idx / 8) as usize;
            let bit = idx % 8;
            if on {
                self.pixels[byte] |= 1 << bit;
            } else {
                self.pixels[byte] &= !(1 << bit);
            }
            self.pixels_changed = true;
            pixel_y += 1;
        }

        self.position_x = self.position_x.wrapping_add(1);
        if self.position_x as usize == LCD_WIDTH {
            self.position_x = 0;
            self.position_y = (self.position_y + 1) % (LCD_HEIGHT as u8 / 8);
        }
    }

    fn handle_control(&mut self, value: u8) {
        if value == 0 {
            return; // NOP
        }

        if value & 0xF8 == 0x20 {
            self.extended_commands = value & 0x01 != 0;
            return;
        }

        if self.extended_commands {
            if value & 0x80 != 0 {
                self.contrast = value & 0x7F;
                return;
            }
            if value & 0x40 != 0 {
                return; // reserved
            }
            if value & 0x10 != 0 {
                return; // bias system, not modeled
            }
            if value & 0x08 != 0 {
                return; // reserved
            }
            if value & 0x04 != 0 {
                return; // temperature control, not modeled
            }
            if value & 0x02 != 0 {
                return;
            }
            if value & 0x01 != 0 {
                return;
            }
        } else {
            if value & 0x80 != 0 {
                self.position_x = value & 0x3F;
                return;
            }
            if value & 0x40 != 0 {
                self.position_y = value & 0x07;
                return;
            }
            if value & 0x10 != 0 {
                return; // reserved
            }
            if value & 0x08 != 0 {
                self.invert_display = value == 0x03;
                // byte 0x0D also matches this bit test and intentionally falls through as a
                // display-control write that isn't normal-video or inverse-video (blank/all-on).
                return;
            }
            if value & 0x04 != 0 {
                return; // reserved
            }
        }

        log::warn!(
            "unhandled LCD command {:#04x} (extended={})",
            value,
            self.extended_commands
        );
    }

    pub fn get_pixel(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < LCD_WIDTH && y < LCD_HEIGHT);
        let idx = y * LCD_WIDTH + x;
        self.pixels[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn brightness_levels(&self) -> (u8, u8) {
        let on = 127u8.saturating_sub(self.contrast);
        let off = 230u8;
        if self.invert_display {
            (off, on)
        } else {
            (on, off)
        }
    }

    /// Render the framebuffer as RGBA8888, `LCD_WIDTH * LCD_HEIGHT * 4` bytes.
    pub fn render_rgba(&self) -> Vec<u8> {
        let (on, off) = self.brightness_levels();
        let mut out = Vec::with_capacity(LCD_WIDTH * LCD_HEIGHT * 4);
        for y in 0..LCD_HEIGHT {
            for x in 0..LCD_WIDTH {
                let v = if self.get_pixel(x, y) { on } else { off };
                out.extend_from_slice(&[v, v, v, 255]);
            }
        }
        out
    }

    /// Render the framebuffer as single-channel luminance, `LCD_WIDTH * LCD_HEIGHT` bytes.
    pub fn render_luminance(&self) -> Vec<u8> {
        let (on, off) = self.brightness_levels();
        let mut out = Vec::with_capacity(LCD_WIDTH * LCD_HEIGHT);
        for y in 0..LCD_HEIGHT {
            for x in 0..LCD_WIDTH {
                out.push(if self.get_pixel(x, y) { on } else { off });
            }
        }
        out
    }
}

impl Default for Pcd8544 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_in_byte(lcd: &mut Pcd8544, byte: u8) {
        for i in (0..8).rev() {
            let bit = (byte >> i) & 1 != 0;
            lcd.on_pin_change(LcdPin::Din, bit);
            lcd.on_pin_change(LcdPin::Sck, false);
            lcd.on_pin_change(LcdPin::Sck, true);
        }
    }

    fn enable(lcd: &mut Pcd8544) {
        lcd.on_pin_change(LcdPin::Sce, false); // active low = enabled
        lcd.on_pin_change(LcdPin::Rst, true); // active low = not in reset
    }

    #[test]
    fn set_x_address_command_updates_cursor() {
        let mut lcd = Pcd8544::new();
        enable(&mut lcd);
        lcd.on_pin_change(LcdPin::Dc, false); // control mode
        clock_in_byte(&mut lcd, 0x80 | 5); // set X address = 5
        assert_eq!(lcd.raster_position(), (5, 0));
    }

    #[test]
    fn data_byte_sets_a_column_of_pixels_and_advances_cursor() {
        let mut lcd = Pcd8544::new();
        enable(&mut lcd);
        lcd.on_pin_change(LcdPin::Dc, true); // data mode
        clock_in_byte(&mut lcd, 0b0000_0001);
        assert!(lcd.get_pixel(0, 0));
        assert!(!lcd.get_pixel(0, 1));
        assert_eq!(lcd.raster_position(), (1, 0));
    }

    #[test]
    fn reset_clears_framebuffer() {
        let mut lcd = Pcd8544::new();
        enable(&mut lcd);
        lcd.on_pin_change(LcdPin::Dc, true);
        clock_in_byte(&mut lcd, 0xFF);
        assert!(lcd.get_pixel(0, 0));

        lcd.on_pin_change(LcdPin::Rst, false); // active low: enter reset
        assert!(!lcd.get_pixel(0, 0));
    }

    #[test]
    fn clock_ignored_while_chip_disabled() {
        let mut lcd = Pcd8544::new();
        lcd.on_pin_change(LcdPin::Sce, true); // disabled (active low not asserted)
        lcd.on_pin_change(LcdPin::Rst, true);
        lcd.on_pin_change(LcdPin::Dc, false);
        clock_in_byte(&mut lcd, 0x80 | 5);
        assert_eq!(lcd.raster_position(), (0, 0));
    }

    #[test]
    fn extended_contrast_command_affects_rendering() {
        let mut lcd = Pcd8544::new();
        enable(&mut lcd);
        lcd.on_pin_change(LcdPin::Dc, false);
        clock_in_byte(&mut lcd, 0x21); // enter extended command mode
        clock_in_byte(&mut lcd, 0x80 | 40); // set contrast to 40
        assert_eq!(lcd.contrast, 40);
    }

    #[test]
    fn render_luminance_has_correct_length_and_reflects_pixels() {
        let mut lcd = Pcd8544::new();
        enable(&mut lcd);
        lcd.on_pin_change(LcdPin::Dc, true);
        clock_in_byte(&mut lcd, 0xFF);
        let buf = lcd.render_luminance();
        assert_eq!(buf.len(), LCD_WIDTH * LCD_HEIGHT);
        assert_ne!(buf[0], buf[LCD_WIDTH]); // row 0 col 0 differs from row 1 col 0
    }
}
