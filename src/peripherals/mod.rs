//! Peripheral models hung off the I/O dispatcher (SS4.4): I/O ports, timers, the clock
//! prescaler, and the PCD8544 LCD.

pub mod clkpr;
pub mod ioport;
pub mod lcd;
pub mod timer;

pub use clkpr::ClockPrescaler;
pub use ioport::{IoPort, PortId};
pub use lcd::{LcdPin, Pcd8544};
pub use timer::{Timer, TimerTarget, TimerWidth, Wgm};
