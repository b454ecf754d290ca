//! TLC59116 I2C PWM controller driver
//!
//! The TLC59116 provides 16 constant-current PWM outputs behind an I2C
//! interface, with four hardware address pins. Up to 14 chips can share one
//! bus: the 7-bit addresses run from `0x60` to `0x6F`, minus the two
//! reserved slots (`0x68` is the all-call address, `0x6B` the software
//! reset address). Which chips are actually populated is given by a 16-bit
//! mask over that address range.
//!
//! Channel writes are staged in RAM and pushed to the bus in batches by
//! [`Tlc59116::flush`], which the main loop calls once per iteration. Host
//! commands can arrive in bursts much faster than the bus moves, and
//! batching collapses repeated writes to the same channel into the final
//! value.

#![no_std]

#[cfg(test)]
extern crate std;

use embedded_hal::blocking::i2c::Write;

/// Seven-bit base address of the chip family.
const BASE_ADDR: u8 = 0x60;

/// Address slots reserved by the chip family (all-call and software reset).
const RESERVED: u16 = (1 << 0x8) | (1 << 0xB);

const MAX_CHIPS: usize = 16;

// Register map, auto-increment flag in the control byte.
const REG_MODE1: u8 = 0x00;
const REG_PWM0: u8 = 0x02;
const REG_LEDOUT0: u8 = 0x14;
const CTRL_AUTO_INC: u8 = 0x80;

/// MODE1 with the oscillator enabled and all-call disabled.
const MODE1_RUN: u8 = 0x00;

/// LEDOUT nibble pattern putting all four channels of a group into
/// individual-PWM mode.
const LEDOUT_PWM_ALL: u8 = 0xAA;

/// Driver for the populated set of TLC59116 chips on one bus.
pub struct Tlc59116<I> {
    i2c: I,
    /// Population mask: bit `n` set means a chip answers at `0x60 + n`.
    chips: u16,
    staged: [[u8; 16]; MAX_CHIPS],
    dirty: [u16; MAX_CHIPS],
}

impl<I, E> Tlc59116<I>
where
    I: Write<Error = E>,
{
    pub fn new(i2c: I, chips: u16) -> Self {
        Tlc59116 {
            i2c,
            chips: chips & !RESERVED,
            staged: [[0; 16]; MAX_CHIPS],
            dirty: [0; MAX_CHIPS],
        }
    }

    /// Number of populated chips.
    pub fn nchips(&self) -> usize {
        self.chips.count_ones() as usize
    }

    /// Bring every populated chip out of its power-on state: oscillator
    /// running, every channel in individual-PWM mode, all levels zero.
    pub fn init(&mut self) -> Result<(), E> {
        for n in 0..MAX_CHIPS {
            if self.chips & (1 << n) == 0 {
                continue;
            }
            let addr = BASE_ADDR + n as u8;
            self.i2c.write(addr, &[REG_MODE1, MODE1_RUN])?;
            self.i2c.write(
                addr,
                &[
                    CTRL_AUTO_INC | REG_LEDOUT0,
                    LEDOUT_PWM_ALL,
                    LEDOUT_PWM_ALL,
                    LEDOUT_PWM_ALL,
                    LEDOUT_PWM_ALL,
                ],
            )?;
            // zero all 16 PWM registers in one auto-increment burst
            let mut buf = [0u8; 17];
            buf[0] = CTRL_AUTO_INC | REG_PWM0;
            self.i2c.write(addr, &buf)?;
        }
        Ok(())
    }

    /// Stage a channel level. Addresses outside the populated set are
    /// ignored.
    pub fn set(&mut self, chip: u8, chan: u8, level: u8) {
        let (chip, chan) = (chip as usize, chan as usize);
        if chip >= MAX_CHIPS || chan >= 16 || self.chips & (1 << chip) == 0 {
            return;
        }
        if self.staged[chip][chan] != level {
            self.staged[chip][chan] = level;
            self.dirty[chip] |= 1 << chan;
        }
    }

    /// Push all staged channel changes to the bus.
    pub fn flush(&mut self) -> Result<(), E> {
        for n in 0..MAX_CHIPS {
            if self.dirty[n] == 0 {
                continue;
            }
            let addr = BASE_ADDR + n as u8;
            for chan in 0..16 {
                if self.dirty[n] & (1 << chan) != 0 {
                    self.i2c
                        .write(addr, &[REG_PWM0 + chan as u8, self.staged[n][chan]])?;
                }
            }
            self.dirty[n] = 0;
        }
        Ok(())
    }

    /// Release the bus.
    pub fn free(self) -> I {
        self.i2c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction};
    use std::vec;

    #[test]
    fn set_then_flush_writes_pwm_register() {
        let expectations = [
            Transaction::write(0x60, vec![REG_PWM0 + 3, 200]),
            Transaction::write(0x61, vec![REG_PWM0, 10]),
        ];
        let i2c = I2cMock::new(&expectations);
        let mut drv = Tlc59116::new(i2c, 0b11);
        drv.set(0, 3, 200);
        drv.set(1, 0, 10);
        drv.flush().unwrap();
        // nothing left staged
        drv.flush().unwrap();
        drv.free().done();
    }

    #[test]
    fn repeated_set_collapses_to_last_value() {
        let expectations = [Transaction::write(0x60, vec![REG_PWM0, 30])];
        let i2c = I2cMock::new(&expectations);
        let mut drv = Tlc59116::new(i2c, 0b1);
        drv.set(0, 0, 10);
        drv.set(0, 0, 20);
        drv.set(0, 0, 30);
        drv.flush().unwrap();
        drv.free().done();
    }

    #[test]
    fn unpopulated_chip_ignored() {
        let i2c = I2cMock::new(&[]);
        let mut drv = Tlc59116::new(i2c, 0b1);
        drv.set(5, 0, 255);
        // reserved address slots never count as populated
        let i2c2 = drv.free();
        let mut drv = Tlc59116::new(i2c2, 1 << 0x8);
        assert_eq!(drv.nchips(), 0);
        drv.set(8, 0, 255);
        drv.flush().unwrap();
        drv.free().done();
    }
}
