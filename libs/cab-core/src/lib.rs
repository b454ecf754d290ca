//! Real-time core of the virtual-pinball cabinet I/O controller
//!
//! The controller shows up on the host as a composite HID device
//! (joystick, keyboard, media keys) with a private 8-byte command channel
//! overlaid on the output reports, and at the same time drives the
//! cabinet's feedback hardware. This crate is the hardware-independent
//! heart of that firmware:
//!
//! - the persistent [`config`] image and its wire-protocol [`cfgvar`]
//!   map,
//! - the [`ledwiz`] protocol state and flash-waveform engine feeding the
//!   `feedback` port stack,
//! - the [`plunger`] reader with calibration and release-motion
//!   synthesis, over the [`sensor`] contract,
//! - the [`buttons`] scanner with debouncing, pulse mode, the shift
//!   button and virtual buttons,
//! - the host [`report`] framing, and
//! - the cooperative [`mainloop`] that sequences all of it behind the
//!   [`CabinetIo`] platform contract.
//!
//! Everything MCU-specific (USB endpoints, DMA, timers, pins, flash) is
//! on the far side of [`CabinetIo`] and the driver crates, so the whole
//! core runs, and is tested, on the host.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod buttons;
pub mod cfgvar;
pub mod config;
mod dispatch;
pub mod keycodes;
pub mod ledwiz;
pub mod mainloop;
pub mod plunger;
pub mod report;
pub mod sensor;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Config;
pub use mainloop::{BuildError, CabinetIo, Core};
pub use plunger::{PlungerReader, PlungerReading, JOYMAX};
pub use sensor::PlungerSensor;
