//! Flash, data-space (SRAM/register-file/I/O window), and EEPROM storage for the simulated MCU.
//!
//! Memory Map (ATmega32U4-class data space):
//! ```text
//! 0x0000 - 0x001F : General purpose register file (r0-r31)
//! 0x0020 - 0x005F : Standard I/O registers (accessed by IN/OUT at offset 0x00-0x3F)
//! 0x0060 - 0x00FF : Extended I/O registers (LD/ST only)
//! 0x0100 - 0x0AFF : Internal SRAM
//! ```

/// Supported MCU variants. Only ATmega32U4-class boards are modeled; the enum exists so
/// `Board::init` has something concrete to reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuVariant {
    Atmega32U4,
}

impl McuVariant {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "atmega32u4" => Some(McuVariant::Atmega32U4),
            _ => None,
        }
    }

    pub const fn flash_words(self) -> usize {
        match self {
            McuVariant::Atmega32U4 => 16384, // 32 KiB / 2
        }
    }

    pub const fn sram_size(self) -> usize {
        match self {
            McuVariant::Atmega32U4 => 2560,
        }
    }

    pub const fn eeprom_size(self) -> usize {
        match self {
            McuVariant::Atmega32U4 => 1024,
        }
    }
}

/// Register-file size (r0-r31).
pub const REGISTER_FILE_SIZE: usize = 32;
/// Offset of the standard I/O window within the data space.
pub const IO_BASE: u16 = 0x0020;
/// Offset of extended I/O (LD/ST-only) registers within the data space.
pub const EXT_IO_BASE: u16 = 0x0060;
/// Offset of internal SRAM within the data space.
pub const SRAM_BASE: u16 = 0x0100;

/// Program memory. Addressed in words by the CPU, stored as little-endian byte pairs.
#[derive(Debug, Clone)]
pub struct Flash {
    words: Vec<u16>,
}

impl Flash {
    pub fn new(variant: McuVariant) -> Self {
        Self {
            words: vec![0xFFFF; variant.flash_words()],
        }
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn read_word(&self, addr: u32) -> u16 {
        self.words.get(addr as usize).copied().unwrap_or(0xFFFF)
    }

    pub fn write_word(&mut self, addr: u32, value: u16) {
        if let Some(slot) = self.words.get_mut(addr as usize) {
            *slot = value;
        }
    }

    /// Load a flat byte image (as produced by the firmware loader) starting at word 0.
    pub fn load_bytes(&mut self, base_byte_addr: u32, bytes: &[u8]) {
        let mut addr = base_byte_addr;
        let mut iter = bytes.chunks(2);
        while let Some(chunk) = iter.next() {
            let lo = chunk[0];
            let hi = *chunk.get(1).unwrap_or(&0xFF);
            self.write_word(addr / 2, u16::from_le_bytes([lo, hi]));
            addr += 2;
        }
    }

    pub fn reset(&mut self) {
        self.words.fill(0xFFFF);
    }
}

/// Persistent byte store backing the EEPROM.
#[derive(Debug, Clone)]
pub struct Eeprom {
    data: Vec<u8>,
}

impl Eeprom {
    pub fn new(variant: McuVariant) -> Self {
        Self {
            data: vec![0xFF; variant.eeprom_size()],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read(&self, addr: u16) -> u8 {
        self.data.get(addr as usize).copied().unwrap_or(0xFF)
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        if let Some(slot) = self.data.get_mut(addr as usize) {
            *slot = value;
        }
    }

    pub fn load(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// The data space: register file, standard I/O window, extended I/O, and SRAM, as one flat
/// byte array. This is the single source of truth the invariant in SS3 refers to -- register
/// reads, `IN`/`OUT`, and `LD`/`ST` through any alias all touch the same bytes.
#[derive(Debug, Clone)]
pub struct DataSpace {
    bytes: Vec<u8>,
}

impl DataSpace {
    pub fn new(variant: McuVariant) -> Self {
        let size = SRAM_BASE as usize + variant.sram_size();
        Self {
            bytes: vec![0u8; size],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn read(&self, addr: u16) -> u8 {
        self.bytes.get(addr as usize).copied().unwrap_or(0)
    }

    #[inline]
    pub fn write_raw(&mut self, addr: u16, value: u8) {
        if let Some(slot) = self.bytes.get_mut(addr as usize) {
            *slot = value;
        }
    }

    #[inline]
    pub fn reg(&self, n: u8) -> u8 {
        debug_assert!((n as usize) < REGISTER_FILE_SIZE);
        self.bytes[n as usize]
    }

    #[inline]
    pub fn set_reg(&mut self, n: u8, value: u8) {
        debug_assert!((n as usize) < REGISTER_FILE_SIZE);
        self.bytes[n as usize] = value;
    }

    pub fn reset(&mut self) {
        self.bytes.fill(0);
    }
}
