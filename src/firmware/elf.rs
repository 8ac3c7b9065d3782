//! ELF firmware loader (SS4.13), via `goblin`. AVR toolchains place flash-resident sections
//! (`.text`, `.rodata`, ...) at their true program-memory address and give SRAM-resident data a
//! virtual address offset by `0x800000`; `.eeprom` is conventionally placed at `0x810000`. Only
//! `SHF_ALLOC` sections with in-file bytes (`SHT_PROGBITS`) are copied -- `.bss`/uninitialized
//! SRAM has nothing to load.

use goblin::elf::section_header::{SHF_ALLOC, SHT_NOBITS};
use goblin::elf::Elf;

use crate::firmware::{FirmwareError, FirmwareImage};

const EEPROM_BASE: u64 = 0x81_0000;
const SRAM_VIRTUAL_BASE: u64 = 0x80_0000;

pub fn parse(bytes: &[u8]) -> Result<FirmwareImage, FirmwareError> {
    let elf = Elf::parse(bytes).map_err(FirmwareError::Elf)?;

    let mut flash: Vec<u8> = Vec::new();
    let mut eeprom: Vec<u8> = Vec::new();
    let mut saw_flash_section = false;

    for section in &elf.section_headers {
        if section.sh_type == SHT_NOBITS || section.sh_flags as u32 & SHF_ALLOC == 0 {
            continue;
        }
        let name = elf.shdr_strtab.get_at(section.sh_name).unwrap_or("");
        let start = section.sh_offset as usize;
        let end = start + section.sh_size as usize;
        let Some(data) = bytes.get(start..end) else {
            continue;
        };

        if name == ".eeprom" || section.sh_addr >= EEPROM_BASE {
            let base = (section.sh_addr - EEPROM_BASE) as usize;
            place(&mut eeprom, base, data);
        } else if section.sh_addr >= SRAM_VIRTUAL_BASE {
            // SRAM initializer data: loaded into flash elsewhere by the real startup code, not a
            // direct flash or EEPROM image. Nothing for this loader to do.
            continue;
        } else {
            place(&mut flash, section.sh_addr as usize, data);
            saw_flash_section = true;
        }
    }

    if !saw_flash_section {
        return Err(FirmwareError::MissingFlashSection);
    }

    Ok(FirmwareImage {
        flash,
        eeprom: if eeprom.is_empty() { None } else { Some(eeprom) },
    })
}

fn place(buf: &mut Vec<u8>, base: usize, data: &[u8]) {
    let end = base + data.len();
    if buf.len() < end {
        buf.resize(end, 0xFF);
    }
    buf[base..end].copy_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_writes_at_offset_and_pads_gaps_with_0xff() {
        let mut buf = Vec::new();
        place(&mut buf, 4, &[0xAA, 0xBB]);
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0xFF, 0xAA, 0xBB]);
    }

    #[test]
    fn place_overwrites_existing_bytes_in_place() {
        let mut buf = vec![0x00; 8];
        place(&mut buf, 2, &[0x11, 0x22]);
        assert_eq!(&buf[2..4], &[0x11, 0x22]);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn garbage_input_is_rejected_as_a_parse_error() {
        let err = parse(&[0x00, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, FirmwareError::Elf(_)));
    }
}
