//! Typed error hierarchy surfaced through the host API (SS7: "errors are typed, not stringly").
//! One variant family per failing subsystem, following the board harness's own module layout.

use thiserror::Error;

use crate::firmware::FirmwareError;

/// Top-level error returned by `Board` operations.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("unknown MCU variant: {0}")]
    UnknownMcuVariant(String),

    #[error("firmware load failed: {0}")]
    Firmware(#[from] FirmwareError),

    #[error("EEPROM file I/O failed: {0}")]
    Eeprom(#[source] std::io::Error),
}

pub type BoardResult<T> = Result<T, BoardError>;
