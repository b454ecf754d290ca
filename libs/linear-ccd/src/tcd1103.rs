//! Toshiba TCD1103-style CCDs: free-running master clock, 2:1 pixel ratio
//!
//! This family wants a continuous master clock and transfers one pixel per
//! two clock cycles. Rather than generating a second, half-rate ADC
//! trigger (there is no timer left for one), the ADC is configured so that
//! its conversion time `T_ADC` satisfies `T_M + e1 < T_ADC < 2*T_M - e2`
//! for master clock period `T_M`: the ADC ignores hardware triggers while
//! a conversion is in flight, so it is always still busy on the first tick
//! after a sample and always ready again on the second. The result is
//! exactly one sample per two ticks with deterministic phase, because the
//! ADC and the timer run from the same clock. The nominal choice is
//! `T_M = T_ADC/2 + 0.25us`.
//!
//! Frame start is the ICG/SH pulse sequence. Its last phase is a critical
//! section that must complete within the high half of one master clock
//! cycle (roughly 600ns of slack, of which the register writes eat about
//! 200ns): stop the ADC, align to a cycle boundary, re-arm the DMA, wait
//! one further full cycle, resume the ADC, wait for the next boundary, and
//! only then raise ICG. Missing the window shifts the whole frame by one
//! pixel; the error is visible as a single-frame position jitter and heals
//! on the next frame, because the sequence realigns from scratch each
//! time.

use crate::buffer::FrameBuffers;
use crate::FrameSource;
use embedded_hal::blocking::delay::DelayUs;

/// Pixels per readout, including the light-shielded dummy elements at the
/// ends of the array.
pub const PIXELS: usize = 1500;

/// Trigger-skip timing check: one ADC sample per two master clock ticks is
/// guaranteed when the conversion is longer than one tick (so the first
/// trigger is ignored) but shorter than two (so the second one isn't).
/// The 50ns guard bands keep the phases away from the race at either edge.
pub fn timing_valid(t_m_ns: u32, t_adc_ns: u32) -> bool {
    t_adc_ns > t_m_ns + 50 && t_adc_ns + 50 < 2 * t_m_ns
}

/// The nominal master clock period for a given ADC conversion time,
/// centered in the valid window.
pub fn nominal_master_period_ns(t_adc_ns: u32) -> u32 {
    t_adc_ns / 2 + 250
}

/// The platform side of the sensor: pins, ADC gating, DMA and the master
/// clock phase.
pub trait Tcd1103Io {
    fn icg_low(&mut self);
    fn icg_high(&mut self);
    fn sh_high(&mut self);
    fn sh_low(&mut self);

    /// Gate the ADC's hardware trigger off / back on.
    fn adc_stop(&mut self);
    fn adc_resume(&mut self);

    /// Spin until the master clock begins a new cycle. Bounded by one
    /// period, i.e. under 2us at any supported clock rate.
    fn sync_clock(&mut self);

    /// Re-arm the pixel DMA for `buf.len()` samples into `buf`. The
    /// transfer owns the buffer until the completion interrupt fires.
    fn rearm(&mut self, buf: &mut [u8]);
}

/// Frame driver for the TCD1103.
pub struct Tcd1103<IO, D> {
    io: IO,
    delay: D,
    frames: FrameBuffers<PIXELS>,
    running: bool,
    /// End of the last SH pulse: start of the integration now in progress.
    t_sh: u32,
    t_sh_prev: u32,
    min_integration_us: u32,
    avg_cycle_us: u32,
}

impl<IO, D> Tcd1103<IO, D>
where
    IO: Tcd1103Io,
    D: DelayUs<u16>,
{
    pub fn new(io: IO, delay: D) -> Self {
        Tcd1103 {
            io,
            delay,
            frames: FrameBuffers::new(),
            running: false,
            t_sh: 0,
            t_sh_prev: 0,
            min_integration_us: 0,
            avg_cycle_us: 0,
        }
    }

    pub fn start(&mut self, now: u32) {
        self.start_frame(now);
    }

    /// The ICG/SH frame-start sequence.
    fn start_frame(&mut self, now: u32) {
        // ICG low, held >= 100ns. One extra write pads the hold time to
        // ~150ns without needing a timer.
        self.io.icg_low();
        self.io.icg_low();

        // SH pulse > 1us; its falling edge ends the previous integration
        // and starts the next one.
        self.io.sh_high();
        self.delay.delay_us(2);
        self.io.sh_low();
        self.t_sh_prev = self.t_sh;
        self.t_sh = now;

        self.delay.delay_us(2);

        // Critical section: everything from here to icg_high must land
        // inside the high half of a master clock cycle.
        self.io.adc_stop();
        self.io.sync_clock();
        self.io.rearm(self.frames.dma_buffer());
        // One further full cycle before resuming. Empirically required
        // for the DMA unit to be ready; revisit only with systematic
        // frame-alignment testing on the target.
        self.io.sync_clock();
        self.io.adc_resume();
        self.io.sync_clock();
        self.io.icg_high();

        self.running = true;
    }

    pub fn on_transfer_done(&mut self, now: u32) {
        self.running = false;

        let midpoint = self
            .t_sh_prev
            .wrapping_add(self.t_sh.wrapping_sub(self.t_sh_prev) / 2);
        self.frames.frame_done(midpoint);

        let cycle = now.wrapping_sub(self.t_sh);
        self.avg_cycle_us = self.avg_cycle_us - self.avg_cycle_us / 8 + cycle / 8;

        if now.wrapping_sub(self.t_sh) >= self.min_integration_us {
            self.start_frame(now);
        }
    }

    pub fn poll(&mut self, now: u32) {
        if !self.running && now.wrapping_sub(self.t_sh) >= self.min_integration_us {
            self.start_frame(now);
        }
    }
}

impl<IO, D> FrameSource for Tcd1103<IO, D>
where
    IO: Tcd1103Io,
    D: DelayUs<u16>,
{
    fn ready(&self) -> bool {
        self.frames.ready()
    }

    fn frame(&self) -> Option<(&[u8], u32)> {
        self.frames.stable().map(|(buf, t)| (&buf[..], t))
    }

    fn release(&mut self) {
        self.frames.release();
    }

    fn set_min_integration_time(&mut self, us: u32) {
        self.min_integration_us = us;
    }

    fn pixel_count(&self) -> usize {
        PIXELS
    }

    fn avg_cycle_time_us(&self) -> u32 {
        self.avg_cycle_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    struct IoLog {
        ops: Vec<&'static str>,
    }

    impl Tcd1103Io for IoLog {
        fn icg_low(&mut self) {
            self.ops.push("icg_low");
        }
        fn icg_high(&mut self) {
            self.ops.push("icg_high");
        }
        fn sh_high(&mut self) {
            self.ops.push("sh_high");
        }
        fn sh_low(&mut self) {
            self.ops.push("sh_low");
        }
        fn adc_stop(&mut self) {
            self.ops.push("adc_stop");
        }
        fn adc_resume(&mut self) {
            self.ops.push("adc_resume");
        }
        fn sync_clock(&mut self) {
            self.ops.push("sync");
        }
        fn rearm(&mut self, buf: &mut [u8]) {
            self.ops.push("rearm");
            buf[0] = 7;
        }
    }

    struct NoDelay;
    impl DelayUs<u16> for NoDelay {
        fn delay_us(&mut self, _us: u16) {}
    }

    #[test]
    fn frame_start_sequence_order() {
        let mut s = Tcd1103::new(IoLog::default(), NoDelay);
        s.start(0);
        assert_eq!(
            s.io.ops,
            [
                "icg_low", "icg_low", "sh_high", "sh_low", "adc_stop", "sync", "rearm", "sync",
                "adc_resume", "sync", "icg_high",
            ]
        );
    }

    #[test]
    fn timestamps_at_sh_midpoint() {
        let mut s = Tcd1103::new(IoLog::default(), NoDelay);
        s.start(10_000);
        s.on_transfer_done(14_000);
        let (frame, t) = s.frame().unwrap();
        assert_eq!(frame[0], 7);
        assert_eq!(t, 5_000);
    }

    #[test]
    fn adc_window_arithmetic() {
        // a 1.6us conversion gives a nominal 1.05us master period
        let t_m = nominal_master_period_ns(1_600);
        assert_eq!(t_m, 1_050);
        assert!(timing_valid(t_m, 1_600));
        // degenerate cases fall outside the window
        assert!(!timing_valid(1_600, 1_600));
        assert!(!timing_valid(800, 1_600));
    }
}
