//! TLC5940 daisy-chain driver
//!
//! The TLC5940 is a 16-channel, 12-bit grayscale PWM controller with a
//! shift-register style serial interface, so chips daisy-chain to any
//! length. Its PWM cycle is externally clocked: the grayscale counter runs
//! off a GSCLK signal (a hardware PWM pin on the platform side), and every
//! 4096 GSCLK pulses the platform must blank the outputs and restart the
//! cycle.
//!
//! This driver owns the serial side of that dance. Channel values are
//! staged in a RAM image of the chain's 192-bit-per-chip shift register;
//! once per grayscale cycle, during the BLANK interval, [`Tlc5940::refresh`]
//! latches the previously shifted data with an XLAT pulse and transmits the
//! current image over SPI. The image is transmitted on every cycle even if
//! nothing changed: the BLANK interval then has the same length on every
//! cycle, and a constant blanking fraction is invisible, where a varying
//! one shows up as flicker.
//!
//! GSCLK generation, the 4096-pulse cadence and the DMA feeding of the SPI
//! port are platform plumbing; the platform calls `refresh` from its
//! blanking interrupt.

#![no_std]

#[cfg(test)]
extern crate std;

use embedded_hal::blocking::spi::Write;
use embedded_hal::digital::v2::OutputPin;

mod tables;
pub use tables::{GAMMA12, LINEAR12};

/// Longest supported chain.
pub const MAX_CHIPS: usize = 16;

const MAX_CHANNELS: usize = MAX_CHIPS * 16;

/// Driver errors: either side of the serial interface can fail.
#[derive(Debug)]
pub enum Error<S, P> {
    Spi(S),
    Pin(P),
}

/// Driver for a chain of `nchips` TLC5940s.
pub struct Tlc5940<SPI, P> {
    spi: SPI,
    blank: P,
    xlat: P,
    nchips: usize,
    levels: [u16; MAX_CHANNELS],
    /// New data was staged since the last transmission.
    dirty: bool,
    /// Data shifted during the previous cycle still needs an XLAT pulse.
    need_xlat: bool,
}

impl<SPI, P, SE, PE> Tlc5940<SPI, P>
where
    SPI: Write<u8, Error = SE>,
    P: OutputPin<Error = PE>,
{
    pub fn new(spi: SPI, blank: P, xlat: P, nchips: usize) -> Self {
        Tlc5940 {
            spi,
            blank,
            xlat,
            nchips: nchips.min(MAX_CHIPS),
            levels: [0; MAX_CHANNELS],
            dirty: false,
            need_xlat: false,
        }
    }

    pub fn channels(&self) -> usize {
        self.nchips * 16
    }

    /// Shift an all-zero grayscale image into the chain and latch it, with
    /// the outputs blanked. Call once at startup, before the platform
    /// starts the grayscale clock.
    pub fn init(&mut self) -> Result<(), Error<SE, PE>> {
        self.blank.set_high().map_err(Error::Pin)?;
        self.levels = [0; MAX_CHANNELS];
        self.transmit()?;
        self.pulse_xlat()?;
        self.dirty = false;
        self.need_xlat = false;
        Ok(())
    }

    /// Stage a raw 12-bit grayscale value. Out-of-range channels are
    /// ignored; values clamp at 4095.
    pub fn set(&mut self, chan: u16, value: u16) {
        let chan = chan as usize;
        if chan >= self.channels() {
            return;
        }
        let value = value.min(4095);
        if self.levels[chan] != value {
            self.levels[chan] = value;
            self.dirty = true;
        }
    }

    /// Stage an 8-bit port level, expanded to 12 bits either linearly or
    /// through the 12-bit gamma table. Gamma at 12 bits instead of 8 keeps
    /// the bottom of a fade from collapsing into a handful of steps.
    pub fn set_level(&mut self, chan: u16, level: u8, gamma: bool) {
        let table = if gamma { &GAMMA12 } else { &LINEAR12 };
        self.set(chan, table[level as usize]);
    }

    /// Run one blanking interval: end the grayscale cycle, latch data
    /// shifted during the previous cycle, transmit the current image for
    /// the next one, and restart the cycle.
    pub fn refresh(&mut self) -> Result<(), Error<SE, PE>> {
        self.blank.set_high().map_err(Error::Pin)?;
        if self.need_xlat {
            self.pulse_xlat()?;
        }
        self.transmit()?;
        self.need_xlat = self.dirty;
        self.dirty = false;
        self.blank.set_low().map_err(Error::Pin)?;
        Ok(())
    }

    fn pulse_xlat(&mut self) -> Result<(), Error<SE, PE>> {
        self.xlat.set_high().map_err(Error::Pin)?;
        self.xlat.set_low().map_err(Error::Pin)
    }

    /// Serialize the channel image and push it through the SPI port. The
    /// first 12 bits shifted land in the last chip's OUT15, so the stream
    /// runs from the highest channel down to channel 0, MSB first.
    fn transmit(&mut self) -> Result<(), Error<SE, PE>> {
        let mut buf = [0u8; MAX_CHIPS * 24];
        let n = self.nchips * 24;
        let mut chan = self.channels();
        for triple in buf[..n].chunks_exact_mut(3) {
            let hi = self.levels[chan - 1];
            let lo = self.levels[chan - 2];
            chan -= 2;
            triple[0] = (hi >> 4) as u8;
            triple[1] = ((hi << 4) as u8 & 0xF0) | (lo >> 8) as u8;
            triple[2] = lo as u8;
        }
        self.spi.write(&buf[..n]).map_err(Error::Spi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::pin::{Mock as PinMock, State, Transaction as PinTransaction};
    use embedded_hal_mock::spi::{Mock as SpiMock, Transaction as SpiTransaction};
    use std::vec::Vec;

    fn blank_refresh_pins() -> (PinMock, PinMock) {
        let blank = PinMock::new(&[
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
        ]);
        let xlat = PinMock::new(&[]);
        (blank, xlat)
    }

    #[test]
    fn packing_is_msb_first_from_the_last_channel() {
        let mut expected = Vec::new();
        expected.resize(24, 0u8);
        // channel 15 = 0xABC occupies the first 12 bits
        expected[0] = 0xAB;
        expected[1] = 0xC0;
        // channel 0 = 0x123 occupies the last 12 bits
        expected[22] = 0x01;
        expected[23] = 0x23;

        let spi = SpiMock::new(&[SpiTransaction::write(expected)]);
        let (blank, xlat) = blank_refresh_pins();
        let mut chain = Tlc5940::new(spi, blank, xlat, 1);
        chain.set(15, 0xABC);
        chain.set(0, 0x123);
        chain.refresh().unwrap();

        chain.spi.done();
        chain.blank.done();
        chain.xlat.done();
    }

    #[test]
    fn xlat_follows_one_cycle_behind_the_data() {
        let zero = std::vec![0u8; 24];
        let mut staged = zero.clone();
        staged[22] = 0x01;
        staged[23] = 0x23;
        let spi = SpiMock::new(&[
            SpiTransaction::write(zero),
            SpiTransaction::write(staged.clone()),
            SpiTransaction::write(staged),
        ]);
        let blank = PinMock::new(&[
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
        ]);
        // exactly one latch, on the refresh after the one that shifted the
        // new data
        let xlat = PinMock::new(&[
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
        ]);

        let mut chain = Tlc5940::new(spi, blank, xlat, 1);
        chain.refresh().unwrap(); // nothing staged: no xlat
        chain.set(0, 0x123);
        chain.refresh().unwrap(); // shifts the new data, schedules xlat
        chain.refresh().unwrap(); // latches it
        chain.spi.done();
        chain.blank.done();
        chain.xlat.done();
    }

    #[test]
    fn level_expansion_tables() {
        assert_eq!(LINEAR12[0], 0);
        assert_eq!(LINEAR12[255], 4095);
        assert_eq!(GAMMA12[0], 0);
        assert_eq!(GAMMA12[255], 4095);
        for i in 1..256 {
            assert!(GAMMA12[i] >= GAMMA12[i - 1]);
        }
    }
}
