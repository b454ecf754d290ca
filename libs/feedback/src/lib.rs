//! Output ports for cabinet feedback devices
//!
//! Every feedback device in the cabinet (lamps, flashers, solenoids,
//! motors, bells) is addressed through a uniform 8-bit brightness port.
//! The host only ever sees `set(level)`; everything below that is assembled
//! here from two kinds of pieces:
//!
//! - **base drivers**, which move a level onto real hardware (a GPIO pin in
//!   PWM or digital mode, a channel on an external PWM or shift-register
//!   chip, or nothing at all for virtual ports), and
//! - **filter layers**, which transform the level on its way down (invert,
//!   gamma correction, night-mode muting, flipper-coil and chime timing
//!   protection, launch-signal monitoring).
//!
//! The filter order is fixed; in particular the inverting layer is always
//! the innermost one, since every other layer assumes non-inverted levels.
//!
//! Base drivers for external chips aren't owned here. A port stores a
//! [`Driver`] tag, and the platform routes writes to the owning peripheral
//! through its [`DriverBank`] implementation. That keeps this crate free of
//! peripheral ownership and makes the whole stack testable against a
//! recording bank.

#![no_std]

mod filters;
mod gamma;
mod gpio;
mod port;

pub use filters::{ChimeLogic, FlipperLogic};
pub use gamma::GAMMA8;
pub use gpio::{DigitalOut, PwmOut};
pub use port::{Port, PortBank, PortConfig, MAX_PORTS};

/// A single feedback output.
///
/// `set` has no failure path: a level handed to a port is considered
/// delivered. Transmission errors on the peripheral buses are handled
/// (and logged) by the peripheral drivers themselves.
pub trait Output {
    /// Set the output level. 0 is fully off, 255 is fully on.
    fn set(&mut self, level: u8);
}

/// Identifies the physical device behind a port.
///
/// This is the data half of what the original design expressed as a class
/// hierarchy: a tag, plus whatever index the owning peripheral needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// No hardware. Writes are remembered by the port but go nowhere.
    Virtual,
    /// A GPIO pin driven in PWM mode; index into the platform's PWM pool.
    GpioPwm(u8),
    /// A GPIO pin driven as a plain digital output; 0 maps to low, everything
    /// else to high.
    GpioDigital(u8),
    /// A channel on the TLC5940 daisy chain. When `gamma` is set, the 8-bit
    /// level is expanded through the 12-bit gamma table in the chip driver
    /// rather than the 8-bit table here, to keep low-end fades smooth.
    Tlc5940 { chan: u8, gamma: bool },
    /// An output bit on the 74HC595 daisy chain.
    Hc595(u8),
    /// A channel on one of the TLC59116 I2C chips.
    Tlc59116 { chip: u8, chan: u8 },
}

/// Routes a port-level write to the peripheral that owns the driver.
///
/// The platform implements this over its collection of GPIO pins and chip
/// drivers. Tests implement it with a recorder.
pub trait DriverBank {
    fn write(&mut self, driver: Driver, level: u8);
}
