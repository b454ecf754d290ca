//! Timed protection filters for coil-class devices
//!
//! Flipper logic lets a solenoid fire at full power for a short, bounded
//! interval and then drops it to a reduced holding power, so a host that
//! leaves a flipper energized can't cook the coil. Chime logic bounds the
//! on-time of single-shot devices from both sides: a minimum so that very
//! short host pulses still produce an audible strike, and a maximum so a
//! stuck-on command can't hold a plunger-style device energized.
//!
//! Both filters are polled from the main loop; ports with an armed timer
//! sit on the bank's pending list until their state machine settles.

/// What a filter decided to do with a client write or a poll tick.
pub(crate) struct FilterAction {
    /// Level to pass down to the rest of the stack, if any.
    pub write: Option<u8>,
    /// `true` to arm the port's timer (add to the pending list).
    pub arm: bool,
    /// `true` to disarm the port's timer (drop from the pending list).
    pub disarm: bool,
}

impl FilterAction {
    fn none() -> Self {
        FilterAction {
            write: None,
            arm: false,
            disarm: false,
        }
    }

    fn write(level: u8) -> Self {
        FilterAction {
            write: Some(level),
            arm: false,
            disarm: false,
        }
    }
}

const FLIPPER_OFF: u8 = 0;
const FLIPPER_FULL: u8 = 1;
const FLIPPER_HOLD: u8 = 2;

/// Full-power-then-hold timing for flipper coils.
///
/// The parameter byte packs the timing: low nibble `n` selects a full-power
/// interval of `50ms * (n + 1)`, high nibble `n` selects a holding power of
/// `17 * n` on the 0..255 level scale.
#[derive(Debug, Clone)]
pub struct FlipperLogic {
    full_us: u32,
    hold: u8,
    state: u8,
    t_on: u32,
    last_level: u8,
}

impl FlipperLogic {
    pub fn new(params: u8) -> Self {
        FlipperLogic {
            full_us: 50_000 * ((params & 0x0F) as u32 + 1),
            hold: 17 * (params >> 4),
            state: FLIPPER_OFF,
            t_on: 0,
            last_level: 0,
        }
    }

    pub(crate) fn on_set(&mut self, level: u8, now: u32) -> FilterAction {
        if level > 0 {
            match self.state {
                FLIPPER_OFF => {
                    // new activation: full power for the timed interval
                    self.state = FLIPPER_FULL;
                    self.t_on = now;
                    self.last_level = level;
                    FilterAction {
                        write: Some(level),
                        arm: true,
                        disarm: false,
                    }
                }
                FLIPPER_FULL => {
                    // level change during the full-power window; the timer
                    // keeps running from the original activation
                    self.last_level = level;
                    FilterAction::write(level)
                }
                _ => FilterAction::write(level.min(self.hold)),
            }
        } else {
            let was_full = self.state == FLIPPER_FULL;
            self.state = FLIPPER_OFF;
            FilterAction {
                write: Some(0),
                arm: false,
                disarm: was_full,
            }
        }
    }

    pub(crate) fn poll(&mut self, now: u32) -> FilterAction {
        if self.state == FLIPPER_FULL && now.wrapping_sub(self.t_on) >= self.full_us {
            self.state = FLIPPER_HOLD;
            FilterAction {
                write: Some(self.last_level.min(self.hold)),
                arm: false,
                disarm: true,
            }
        } else {
            FilterAction::none()
        }
    }
}

/// On-time table for the chime logic nibbles, in microseconds. Entry 0 is
/// the unlimited sentinel: no minimum for the min field, no maximum for the
/// max field.
const CHIME_TIME_US: [u32; 16] = [
    0, 1_000, 2_000, 5_000, 10_000, 20_000, 40_000, 80_000, 100_000, 200_000, 300_000, 400_000,
    500_000, 600_000, 700_000, 800_000,
];

const CHIME_OFF: u8 = 0;
const CHIME_MIN_ON: u8 = 1;
const CHIME_MIN_OFF: u8 = 2;
const CHIME_RUNNING: u8 = 3;
const CHIME_PAST_MAX: u8 = 4;

/// Minimum/maximum on-time enforcement for single-shot coil devices.
///
/// The parameter byte packs two indices into [`CHIME_TIME_US`]: low nibble
/// minimum on-time, high nibble maximum on-time.
///
/// After the maximum elapses the output latches off, and stays off until
/// the client explicitly writes 0; only then does a new activation start a
/// fresh cycle. A host that wedges with the output commanded on therefore
/// gets exactly one bounded pulse.
#[derive(Debug, Clone)]
pub struct ChimeLogic {
    min_us: u32,
    max_us: u32,
    state: u8,
    t_on: u32,
}

impl ChimeLogic {
    pub fn new(params: u8) -> Self {
        ChimeLogic {
            min_us: CHIME_TIME_US[(params & 0x0F) as usize],
            max_us: CHIME_TIME_US[(params >> 4) as usize],
            state: CHIME_OFF,
            t_on: 0,
        }
    }

    pub(crate) fn on_set(&mut self, level: u8, now: u32) -> FilterAction {
        if level > 0 {
            match self.state {
                CHIME_OFF => {
                    self.state = CHIME_MIN_ON;
                    self.t_on = now;
                    FilterAction {
                        write: Some(level),
                        arm: true,
                        disarm: false,
                    }
                }
                // still within the minimum window; t_on keeps counting from
                // the first activation
                CHIME_MIN_ON => FilterAction::write(level),
                CHIME_MIN_OFF => {
                    self.state = CHIME_MIN_ON;
                    FilterAction::write(level)
                }
                CHIME_RUNNING => FilterAction::write(level),
                // latched off until the client writes 0
                _ => FilterAction::none(),
            }
        } else {
            match self.state {
                CHIME_MIN_ON => {
                    // hold the output on until the minimum elapses
                    self.state = CHIME_MIN_OFF;
                    FilterAction::none()
                }
                CHIME_RUNNING => {
                    self.state = CHIME_OFF;
                    FilterAction {
                        write: Some(0),
                        arm: false,
                        disarm: true,
                    }
                }
                CHIME_PAST_MAX => {
                    self.state = CHIME_OFF;
                    FilterAction::write(0)
                }
                _ => FilterAction::none(),
            }
        }
    }

    pub(crate) fn poll(&mut self, now: u32) -> FilterAction {
        let dt = now.wrapping_sub(self.t_on);
        match self.state {
            CHIME_MIN_ON if self.min_us == 0 || dt >= self.min_us => {
                if self.max_us == 0 {
                    // no maximum to police; nothing left to time
                    self.state = CHIME_PAST_MAX;
                    FilterAction {
                        write: None,
                        arm: false,
                        disarm: true,
                    }
                } else {
                    self.state = CHIME_RUNNING;
                    FilterAction::none()
                }
            }
            CHIME_MIN_OFF if self.min_us == 0 || dt >= self.min_us => {
                self.state = CHIME_OFF;
                FilterAction {
                    write: Some(0),
                    arm: false,
                    disarm: true,
                }
            }
            CHIME_RUNNING if self.max_us != 0 && dt >= self.max_us => {
                self.state = CHIME_PAST_MAX;
                FilterAction {
                    write: Some(0),
                    arm: false,
                    disarm: true,
                }
            }
            _ => FilterAction::none(),
        }
    }
}
