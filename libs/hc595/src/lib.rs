//! 74HC595 daisy-chain driver
//!
//! The 74HC595 is an 8-bit serial-in/parallel-out shift register; chaining
//! the serial output of one chip into the input of the next extends a
//! cabinet with banks of simple digital outputs. We bit-bang the chain over
//! four GPIO pins: serial data, serial clock, the LATCH signal that
//! transfers the shifted bits to the output pins, and an ENABLE signal.
//!
//! Bit-banging is fast enough here. A full refresh moves 8 bits per chip
//! and only happens when a host command changed something, so the transfer
//! time is negligible next to the USB command interval that triggers it.
//!
//! The physical !OE pin on the chips is active-low and must be wired with a
//! pull-up to Vcc, driven from our ENA pin through an inverting transistor.
//! That way the outputs stay disabled from power-on reset until [`Hc595::enable`]
//! is called. The chips wake up with garbage in their shift registers, and
//! they may be powered from a different supply than the controller, so the
//! outputs must stay isolated until we've clocked known data in.

#![no_std]

#[cfg(test)]
extern crate std;

use embedded_hal::digital::v2::OutputPin;

/// Longest supported chain.
pub const MAX_CHIPS: usize = 16;

/// Driver for a chain of `nchips` 74HC595s.
///
/// [`set`](Hc595::set) only stages a bit in the in-memory register image;
/// nothing touches the wire until [`update`](Hc595::update) shifts the image
/// out and latches it.
pub struct Hc595<P> {
    sin: P,
    sclk: P,
    latch: P,
    ena: P,
    nchips: usize,
    /// One byte per chip, one bit per output.
    state: [u8; MAX_CHIPS],
    dirty: bool,
}

impl<P, E> Hc595<P>
where
    P: OutputPin<Error = E>,
{
    pub fn new(nchips: usize, sin: P, sclk: P, latch: P, ena: P) -> Self {
        Hc595 {
            sin,
            sclk,
            latch,
            ena,
            nchips: nchips.min(MAX_CHIPS),
            state: [0; MAX_CHIPS],
            dirty: false,
        }
    }

    pub fn outputs(&self) -> usize {
        self.nchips * 8
    }

    /// Clear the chips' shift registers: clock an OFF state to every
    /// position and latch it. Call once at startup, before `enable(true)`.
    pub fn init(&mut self) -> Result<(), E> {
        self.state = [0; MAX_CHIPS];
        self.dirty = false;

        self.sin.set_low()?;
        for _ in 0..self.nchips * 8 {
            self.sclk.set_high()?;
            self.sclk.set_low()?;
        }
        self.latch.set_high()?;
        self.latch.set_low()?;
        Ok(())
    }

    /// Stage one output bit. `idx` counts from output 0 on the first chip
    /// of the chain.
    pub fn set(&mut self, idx: usize, on: bool) {
        if idx >= self.outputs() {
            return;
        }
        let (chip, bit) = (idx / 8, idx % 8);
        let old = self.state[chip];
        let new = if on { old | 1 << bit } else { old & !(1 << bit) };
        if new != old {
            self.state[chip] = new;
            self.dirty = true;
        }
    }

    /// Enable or disable the physical outputs via the ENA pin.
    pub fn enable(&mut self, on: bool) -> Result<(), E> {
        if on {
            self.ena.set_high()
        } else {
            self.ena.set_low()
        }
    }

    /// Shift the register image out to the chips and latch it, if anything
    /// changed since the last update (or unconditionally with `force`).
    pub fn update(&mut self, force: bool) -> Result<(), E> {
        if !self.dirty && !force {
            return Ok(());
        }

        // The first bit clocked out lands in the last register position, so
        // send the highest-numbered output first.
        for chip in (0..self.nchips).rev() {
            for bit in (0..8).rev() {
                self.sclk.set_low()?;
                if self.state[chip] & (1 << bit) != 0 {
                    self.sin.set_high()?;
                } else {
                    self.sin.set_low()?;
                }
                self.sclk.set_high()?;
            }
        }

        self.latch.set_high()?;
        self.sclk.set_low()?;
        self.latch.set_low()?;

        self.dirty = false;
        Ok(())
    }
}
