//! GPIO base drivers
//!
//! Two of the base driver types live directly on MCU pins: digital on/off
//! outputs and hardware-PWM outputs.
//!
//! The PWM variant carries a workaround for a hardware hazard: on the
//! target's timer units, the duty-cycle register latches only one write per
//! PWM cycle and silently drops the rest. Resetting the counter on every
//! write (the usual library workaround) truncates cycles and makes fades
//! flicker visibly. Instead we accept that a write can be lost and have the
//! main loop re-issue the last level to every PWM output every ~15ms, via
//! [`PwmOut::repoll`]. A lost write during a fade is superseded within one
//! video frame, and re-issuing an unchanged duty is invisible.

use crate::Output;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::PwmPin;

/// Plain digital output: off at level 0, on at any other level.
pub struct DigitalOut<P> {
    pin: P,
}

impl<P: OutputPin> DigitalOut<P> {
    pub fn new(pin: P) -> Self {
        DigitalOut { pin }
    }
}

impl<P: OutputPin> Output for DigitalOut<P> {
    fn set(&mut self, level: u8) {
        if level == 0 {
            self.pin.set_low().ok();
        } else {
            self.pin.set_high().ok();
        }
    }
}

/// Hardware-PWM output with the re-poll workaround.
pub struct PwmOut<P> {
    pin: P,
    last: u8,
}

impl<P> PwmOut<P>
where
    P: PwmPin<Duty = u16>,
{
    pub fn new(mut pin: P) -> Self {
        pin.enable();
        let mut out = PwmOut { pin, last: 0 };
        out.apply();
        out
    }

    /// Re-issue the last level. Idempotent; called periodically from the
    /// main loop to repair writes the hardware dropped.
    pub fn repoll(&mut self) {
        self.apply();
    }

    fn apply(&mut self) {
        let max = self.pin.get_max_duty() as u32;
        let duty = (max * self.last as u32 / 255) as u16;
        self.pin.set_duty(duty);
    }
}

impl<P> Output for PwmOut<P>
where
    P: PwmPin<Duty = u16>,
{
    fn set(&mut self, level: u8) {
        self.last = level;
        self.apply();
    }
}
