//! Plunger reader: calibration and release-motion synthesis
//!
//! The reader turns raw sensor readings into the signed joystick value on
//! `[-JOYMAX, +JOYMAX]` (0 = rest, positive = retracted), and rewrites the
//! readings during a detected release.
//!
//! The rewrite is there because of a sampling mismatch: the host polls at
//! roughly 100Hz while a released plunger crosses its whole travel in
//! about 50ms. Reporting raw positions would hand the host one arbitrary
//! mid-flight sample, and its physics model would then launch the ball
//! from that arbitrary point. Instead, when a release is detected we hold
//! the report at the retraction endpoint long enough for the host to see
//! it, snap to a bounce position forward of zero (barrel-spring
//! compression, 1/6 of the retraction depth), and then hold zero while
//! the host's model plays out the motion.
//!
//! Release detection compares successive readings against an idealized
//! spring: a plunger released from distance `d` reaches zero in ~50ms
//! regardless of `d`, so the minimum expected travel over `dt` starting
//! near rest speed is `d * dt^2 / (50ms)^2`. In fixed point that is
//! `(prev * ACC2 * dt^2) >> 48` with `ACC2 = 112590`; no division, no
//! floating point.

use crate::config::Calibration;

#[cfg(feature = "use-serde")]
use serde::{Deserialize, Serialize};

/// Full-scale joystick magnitude for the position axes.
pub const JOYMAX: i32 = 4096;

/// `2^48 / (50_000us)^2`: half the model acceleration in the fixed-point
/// release predicate.
const ACC2: i64 = 112_590;

/// Ignore readings arriving faster than this for release detection; the
/// position difference over shorter spans is too small to separate from
/// sensor noise.
const MIN_FSM_SPACING_US: u32 = 5_000;

const BOUNCE_HOLD_US: u32 = 25_000;
const ZERO_HOLD_US: u32 = 250_000;

/// One raw sensor observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "use-serde", derive(Serialize, Deserialize))]
pub struct PlungerReading {
    /// Position on the sensor's own 0..65535 scale; higher = more
    /// retracted.
    pub pos: u16,
    /// Microsecond timestamp of the observation.
    pub t: u32,
}

const FIRE_NONE: u8 = 0;
const FIRE_TENTATIVE: u8 = 1;
const FIRE_BOUNCE: u8 = 2;
const FIRE_SETTLE: u8 = 3;

/// The reader proper.
pub struct PlungerReader {
    cal: Calibration,
    /// `(JOYMAX << 16) / (max - zero)`, cached so applying the
    /// calibration is a multiply and shift.
    inv_cal_range: i32,
    fire_state: u8,
    /// Calibrated position at the retraction endpoint of the current
    /// firing event.
    fire_start: i32,
    /// Entry time of the current firing state.
    fire_t: u32,
    prev_pos: i32,
    prev_t: u32,
    primed: bool,
    reported: i32,
    session: Option<CalSession>,
    cal_button_held_us: u32,
    cal_button_fired: bool,
}

impl PlungerReader {
    pub fn new(cal: Calibration) -> Self {
        let mut r = PlungerReader {
            cal: Calibration::default(),
            inv_cal_range: 0,
            fire_state: FIRE_NONE,
            fire_start: 0,
            fire_t: 0,
            prev_pos: 0,
            prev_t: 0,
            primed: false,
            reported: 0,
            session: None,
            cal_button_held_us: 0,
            cal_button_fired: false,
        };
        r.set_calibration(cal);
        r
    }

    /// Install calibration data, normalizing degenerate ranges back to
    /// the factory defaults.
    pub fn set_calibration(&mut self, cal: Calibration) {
        self.cal = if cal.max > cal.zero {
            cal
        } else {
            Calibration::default()
        };
        let range = (self.cal.max - self.cal.zero) as i32;
        self.inv_cal_range = (JOYMAX << 16) / range;
    }

    pub fn calibration(&self) -> Calibration {
        self.cal
    }

    pub fn calibrating(&self) -> bool {
        self.session.is_some()
    }

    /// The position the joystick report should carry right now.
    pub fn position(&self) -> i16 {
        self.reported.max(-JOYMAX).min(JOYMAX) as i16
    }

    /// A confirmed release is in flight (bounce or settle phase).
    pub fn firing(&self) -> bool {
        self.fire_state == FIRE_BOUNCE || self.fire_state == FIRE_SETTLE
    }

    /// The plunger is pushed forward of rest by at least `threshold`
    /// calibrated units.
    pub fn pushed_forward(&self, threshold: i32) -> bool {
        threshold > 0 && self.reported <= -threshold
    }

    fn apply_cal(&self, raw: u16) -> i32 {
        let rel = raw as i32 - self.cal.zero as i32;
        let scaled = ((rel as i64 * self.inv_cal_range as i64) >> 16) as i32;
        scaled.max(-JOYMAX).min(JOYMAX)
    }

    /// Feed one sensor reading through the calibration and the release
    /// state machine.
    pub fn process(&mut self, reading: PlungerReading) {
        if let Some(session) = &mut self.session {
            session.feed(reading);
            // while calibrating, report the live reading against the
            // session's provisional zero so the user sees motion
            self.reported = self.apply_cal(reading.pos);
            return;
        }

        let pos = self.apply_cal(reading.pos);
        if !self.primed {
            self.primed = true;
            self.prev_pos = pos;
            self.prev_t = reading.t;
            self.reported = pos;
            return;
        }

        let dt = reading.t.wrapping_sub(self.prev_t);
        if dt < MIN_FSM_SPACING_US {
            return;
        }

        match self.fire_state {
            FIRE_NONE => {
                if self.prev_pos >= JOYMAX / 6 && released_motion(self.prev_pos, pos, dt) {
                    self.fire_state = FIRE_TENTATIVE;
                    self.fire_start = self.prev_pos;
                    self.fire_t = reading.t;
                    self.reported = self.fire_start;
                } else {
                    self.reported = pos;
                }
            }
            FIRE_TENTATIVE => {
                if pos <= 0 {
                    // reached the endpoint: the release is real
                    self.fire_state = FIRE_BOUNCE;
                    self.fire_t = reading.t;
                    self.reported = -self.fire_start / 6;
                } else if !released_motion(self.prev_pos, pos, dt) {
                    // motion stopped matching the model: back to live data
                    self.fire_state = FIRE_NONE;
                    self.reported = pos;
                } else {
                    self.reported = self.fire_start;
                }
            }
            FIRE_BOUNCE => {
                if reading.t.wrapping_sub(self.fire_t) >= BOUNCE_HOLD_US {
                    self.fire_state = FIRE_SETTLE;
                    self.fire_t = reading.t;
                    self.reported = 0;
                } else {
                    self.reported = -self.fire_start / 6;
                }
            }
            _ => {
                self.reported = 0;
                if reading.t.wrapping_sub(self.fire_t) >= ZERO_HOLD_US {
                    self.fire_state = FIRE_NONE;
                }
            }
        }

        self.prev_pos = pos;
        self.prev_t = reading.t;
    }

    /// Start a calibration session (host command or button hold).
    pub fn begin_calibration(&mut self, now: u32) {
        self.session = Some(CalSession::new(now));
        self.fire_state = FIRE_NONE;
    }

    /// Session timeout check; commits and clears the session when the
    /// window has elapsed. Returns true if a session just ended.
    pub fn tick_calibration(&mut self, now: u32) -> bool {
        let expired = match &self.session {
            Some(s) => now.wrapping_sub(s.t_start) >= CAL_SESSION_US,
            None => return false,
        };
        if expired {
            let session = self.session.take().unwrap();
            self.set_calibration(session.commit());
            self.primed = false;
            return true;
        }
        false
    }

    /// Debounce the dedicated calibration pushbutton; returns true once
    /// per hold when the 2s threshold is reached.
    pub fn tick_cal_button(&mut self, pressed: bool, dt_us: u32) -> bool {
        if !pressed {
            self.cal_button_held_us = 0;
            self.cal_button_fired = false;
            return false;
        }
        self.cal_button_held_us = self.cal_button_held_us.saturating_add(dt_us);
        if self.cal_button_held_us >= CAL_BUTTON_HOLD_US && !self.cal_button_fired {
            self.cal_button_fired = true;
            return true;
        }
        false
    }
}

/// The fixed-point spring-model predicate: is the travel from `prev` to
/// `new` over `dt` microseconds at least as fast as a released plunger
/// would move?
fn released_motion(prev: i32, new: i32, dt: u32) -> bool {
    if prev <= 0 {
        return false;
    }
    let dt = dt.min(50_000) as i64;
    let expected = (prev as i64 * ACC2 * dt * dt) >> 48;
    (new as i64) < prev as i64 - expected
}

/// Calibration-mode session length.
pub const CAL_SESSION_US: u32 = 15_000_000;
/// Button hold time to enter calibration.
const CAL_BUTTON_HOLD_US: u32 = 2_000_000;

/// Settling time at session start before samples count.
const CAL_SETTLE_US: u32 = 1_000_000;
/// Band around the running zero average treated as "at rest".
const CAL_REST_BAND: i32 = 65535 / 64;
/// Retraction beyond the running zero that counts as a pull.
const CAL_PULL_MIN: i32 = 65535 / 16;

const CS_SETTLING: u8 = 0;
const CS_AT_REST: u8 = 1;
const CS_RETRACTING: u8 = 2;
const CS_POSSIBLY_RELEASING: u8 = 3;

/// Transient state of one calibration session.
struct CalSession {
    t_start: u32,
    state: u8,
    zero_sum: u32,
    zero_count: u32,
    max: u16,
    rt_sum_us: u32,
    rt_count: u32,
    release_t: u32,
    last_pos: u16,
}

impl CalSession {
    fn new(now: u32) -> Self {
        CalSession {
            t_start: now,
            state: CS_SETTLING,
            zero_sum: 0,
            zero_count: 0,
            max: 0,
            rt_sum_us: 0,
            rt_count: 0,
            release_t: 0,
            last_pos: 0,
        }
    }

    fn zero_avg(&self) -> i32 {
        if self.zero_count == 0 {
            0
        } else {
            (self.zero_sum / self.zero_count) as i32
        }
    }

    fn feed(&mut self, reading: PlungerReading) {
        let pos = reading.pos;
        if pos > self.max {
            self.max = pos;
        }

        match self.state {
            CS_SETTLING => {
                if reading.t.wrapping_sub(self.t_start) >= CAL_SETTLE_US {
                    self.state = CS_AT_REST;
                    self.zero_sum = pos as u32;
                    self.zero_count = 1;
                }
            }
            CS_AT_REST => {
                let zero = self.zero_avg();
                if (pos as i32 - zero).abs() <= CAL_REST_BAND {
                    self.zero_sum += pos as u32;
                    self.zero_count += 1;
                } else if pos as i32 > zero + CAL_PULL_MIN {
                    self.state = CS_RETRACTING;
                }
            }
            CS_RETRACTING => {
                if (pos as i32) < self.last_pos as i32 - CAL_REST_BAND {
                    // forward motion begun: could be a release
                    self.state = CS_POSSIBLY_RELEASING;
                    self.release_t = reading.t;
                } else if (pos as i32 - self.zero_avg()).abs() <= CAL_REST_BAND {
                    self.state = CS_AT_REST;
                }
            }
            _ => {
                if (pos as i32) <= self.zero_avg() + CAL_REST_BAND {
                    // made it back to rest: that was a release
                    self.rt_sum_us += reading.t.wrapping_sub(self.release_t);
                    self.rt_count += 1;
                    self.state = CS_AT_REST;
                } else if pos as i32 > self.last_pos as i32 + CAL_REST_BAND {
                    // pulled back again instead
                    self.state = CS_RETRACTING;
                }
            }
        }

        self.last_pos = pos;
    }

    /// Fold the session into a calibration record; an empty session
    /// produces the factory defaults.
    fn commit(self) -> Calibration {
        let defaults = Calibration::default();
        if self.zero_count == 0 {
            return defaults;
        }
        let zero = (self.zero_sum / self.zero_count) as u16;
        if self.max <= zero {
            return defaults;
        }
        let release_time_ms = if self.rt_count > 0 {
            (self.rt_sum_us / self.rt_count / 1_000).min(255) as u8
        } else {
            defaults.release_time_ms
        };
        Calibration {
            zero,
            max: self.max,
            release_time_ms,
        }
    }
}
