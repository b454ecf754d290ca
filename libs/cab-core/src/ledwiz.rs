//! LedWiz protocol state and the flash-mode engine
//!
//! The legacy protocol drives each port with an on/off bit plus a profile
//! byte: 0..49 select a fixed brightness (49 is undocumented but accepted
//! by real units as a synonym for full brightness, so we honor it too),
//! and 129..132 select one of four periodic waveforms clocked by a shared
//! per-bank flash speed. Each group of 32 ports is a bank with its own
//! speed.
//!
//! A flash cycle has 256 quanta and a period of `speed * 0.25s`. To get
//! from the free-running microsecond clock to an 8-bit phase without a
//! division per poll, the per-speed reciprocal `2^24 / quantum_us` is
//! precomputed; `(now_us * reciprocal) >> 24` is then the phase directly,
//! modulo 256. The four waveforms are compile-time lookup tables indexed
//! by that phase.

use crate::config::MAX_OUT_PORTS;
use feedback::{DriverBank, PortBank};

pub const BANK_SIZE: usize = 32;
pub const NUM_BANKS: usize = MAX_OUT_PORTS / BANK_SIZE;

/// Default flash speed after reset, per the original protocol.
pub const DEFAULT_SPEED: u8 = 2;

/// Legacy profile values to physical levels: linear from 0 to 48, with 49
/// aliased to full brightness.
pub const LW_TO_DOF: [u8; 50] = {
    let mut t = [0u8; 50];
    let mut i = 0;
    while i <= 48 {
        t[i] = ((i * 255 + 24) / 48) as u8;
        i += 1;
    }
    t[49] = 255;
    t
};

/// `round(2^24 / quantum_us)` per speed 1..7; index 0 unused.
const INV_US_PER_QUANTUM: [u32; 8] = {
    let mut t = [0u32; 8];
    let mut s = 1u64;
    while s <= 7 {
        // quantum_us = s * 250_000 / 256, so 2^24/quantum = 2^32/(s*250_000)
        let denom = s * 250_000;
        t[s as usize] = (((1u64 << 32) + denom / 2) / denom) as u32;
        s += 1;
    }
    t
};

const fn ramp_up(phase: usize) -> u8 {
    (phase * 255 / 127) as u8
}

const fn ramp_down(phase: usize) -> u8 {
    ((255 - phase) * 255 / 127) as u8
}

/// The four flash waveforms, one 256-entry table each: sawtooth, square,
/// on/ramp-down, ramp-up/on.
pub const FLASH_LUT: [[u8; 256]; 4] = {
    let mut t = [[0u8; 256]; 4];
    let mut p = 0;
    while p < 256 {
        t[0][p] = if p < 128 { ramp_up(p) } else { ramp_down(p) };
        t[1][p] = if p < 128 { 255 } else { 0 };
        t[2][p] = if p < 128 { 255 } else { ramp_down(p) };
        t[3][p] = if p < 128 { ramp_up(p) } else { 255 };
        p += 1;
    }
    t
};

/// Current phase of a bank's flash cycle.
fn phase(now_us: u32, speed: u8) -> u8 {
    let speed = if speed >= 1 && speed <= 7 { speed } else { DEFAULT_SPEED };
    ((now_us as u64 * INV_US_PER_QUANTUM[speed as usize] as u64) >> 24) as u8
}

/// Process-wide LedWiz protocol state.
pub struct LedWizState {
    pub on: [bool; MAX_OUT_PORTS],
    pub val: [u8; MAX_OUT_PORTS],
    pub speed: [u8; NUM_BANKS],
    /// The bank-of-8 cursor for the next PBA message: 0, 8, 16 or 24.
    pub pba_idx: u8,
    next_flash_bank: u8,
}

impl LedWizState {
    pub fn new() -> Self {
        LedWizState {
            on: [false; MAX_OUT_PORTS],
            val: [48; MAX_OUT_PORTS],
            speed: [DEFAULT_SPEED; NUM_BANKS],
            pba_idx: 0,
            next_flash_bank: 0,
        }
    }

    /// Restore the power-on protocol state: everything off, profile 48,
    /// speed 2.
    pub fn reset(&mut self) {
        *self = LedWizState::new();
    }

    /// The physical level the protocol state currently calls for on one
    /// port.
    pub fn level_for(&self, port: usize, now: u32) -> u8 {
        if !self.on[port] {
            return 0;
        }
        let val = self.val[port];
        if val <= 49 {
            LW_TO_DOF[val as usize]
        } else if (129..=132).contains(&val) {
            let speed = self.speed[port / BANK_SIZE];
            FLASH_LUT[(val - 129) as usize][phase(now, speed) as usize]
        } else {
            // reserved range; normalized on receipt, but stay safe
            LW_TO_DOF[48]
        }
    }

    /// Push the protocol state for one port through the output stack.
    pub fn apply<B: DriverBank>(&self, port: usize, now: u32, ports: &mut PortBank, bank: &mut B) {
        ports.set(port, self.level_for(port, now), now, bank);
    }

    /// One engine tick: advance to the next bank of 32 ports and rewrite
    /// every armed flash port there from its waveform table. Static ports
    /// are untouched; their level was set when their profile was last
    /// written and holds until the next command.
    pub fn flash_tick<B: DriverBank>(&mut self, now: u32, ports: &mut PortBank, bank: &mut B) {
        let g = self.next_flash_bank as usize;
        self.next_flash_bank = (self.next_flash_bank + 1) % NUM_BANKS as u8;

        let speed = self.speed[g];
        let ph = phase(now, speed) as usize;
        let hi = (g * BANK_SIZE + BANK_SIZE).min(ports.len());
        for i in g * BANK_SIZE..hi {
            if self.on[i] && self.val[i] & 0x80 != 0 {
                let mode = (self.val[i] - 129) as usize;
                ports.set(i, FLASH_LUT[mode][ph], now, bank);
            }
        }
    }
}
