//! Firmware loading (SS4.13): ELF and Intel HEX images into flat flash/EEPROM byte buffers.
//! `Board::load_elf`/`load_hex` parse into a `FirmwareImage` first and only touch the running
//! bus's flash/EEPROM once parsing fully succeeds, so a bad file leaves the board unchanged.

use thiserror::Error;

pub mod elf;
pub mod hex;

/// Address at or above which a linear address (ELF virtual address, or a HEX record's
/// extended-linear-address-relative address) is EEPROM-resident rather than flash-resident, per
/// the AVR toolchain's linker script convention.
pub(crate) const EEPROM_BASE: u32 = 0x81_0000;

/// A parsed firmware image, ready to be copied into a `Bus`'s flash (and, if present, EEPROM).
#[derive(Debug, Clone, Default)]
pub struct FirmwareImage {
    pub flash: Vec<u8>,
    pub eeprom: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("I/O error reading firmware file: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad checksum or malformed record at line {line}")]
    BadChecksum { line: usize },

    #[error("firmware image has no flash-resident section")]
    MissingFlashSection,

    #[error("ELF parse error: {0}")]
    Elf(#[from] goblin::error::Error),
}

/// Parse a `.hex` file's text into a `FirmwareImage`, splitting flash- and EEPROM-resident
/// records by linear address, mirroring the ELF loader's convention.
pub fn load_hex(text: &str) -> Result<FirmwareImage, FirmwareError> {
    let parsed = hex::parse(text)?;
    Ok(FirmwareImage {
        flash: parsed.flash,
        eeprom: if parsed.eeprom.is_empty() { None } else { Some(parsed.eeprom) },
    })
}

/// Parse an ELF file's bytes into a `FirmwareImage`, splitting flash- and EEPROM-resident
/// sections by address per the AVR toolchain's linker script convention.
pub fn load_elf(bytes: &[u8]) -> Result<FirmwareImage, FirmwareError> {
    elf::parse(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_hex_wraps_parsed_bytes_with_no_eeprom_when_none_present() {
        let image = load_hex(":02000000AABB99\n").unwrap();
        assert_eq!(image.flash, vec![0xAA, 0xBB]);
        assert!(image.eeprom.is_none());
    }

    #[test]
    fn load_hex_splits_eeprom_resident_records() {
        let text = ":02000004008179\n:02000000AABB99\n";
        let image = load_hex(text).unwrap();
        assert!(image.flash.is_empty());
        assert_eq!(image.eeprom.as_deref(), Some(&[0xAA, 0xBB][..]));
    }

    #[test]
    fn missing_flash_section_error_message_is_stable() {
        let err = FirmwareError::MissingFlashSection;
        assert_eq!(err.to_string(), "firmware image has no flash-resident section");
    }
}
