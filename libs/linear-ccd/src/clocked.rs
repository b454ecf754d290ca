//! Bucket-brigade sensors with a host-generated per-pixel clock
//!
//! The TSL14xx photodiode arrays shift one pixel charge onto the analog
//! output for every clock edge we feed them. The fastest way to read them
//! is to let the ADC pace the clock: run the ADC in continuous mode and
//! have its sample-complete event trigger a linked chain of DMA channels,
//! Clock-Up then ADC-transfer then Clock-Down. The clock-up channel must
//! come first, because the sensor starts exposing the next pixel on the
//! rising edge while the ADC is already converting the current one; and
//! the up and down writes must not be adjacent transfers against the same
//! GPIO toggle register, because the sensor needs a 50ns minimum high
//! pulse that back-to-back writes would violate. Building that chain is
//! the platform's job, behind [`CaptureChain`]; the frame pacing, buffer
//! hand-off and integration bookkeeping live here.

use crate::buffer::FrameBuffers;
use crate::FrameSource;

/// The platform's linked-DMA capture chain for one sensor.
pub trait CaptureChain {
    /// Pulse the SI line: latch the integrated charge into the shift
    /// register and begin the next integration period.
    fn pulse_si(&mut self);

    /// Arm the chain for `buf.len()` samples into `buf` and start the ADC
    /// free-running. The chain clocks the array `buf.len() + 1` times (the
    /// trailing edge flushes the last pixel). The chain owns the buffer
    /// until the completion interrupt fires; the caller guarantees the
    /// slice stays valid and unread for that window.
    fn begin(&mut self, buf: &mut [u8]);

    /// Stop the clock chain and assert the end-of-frame latch.
    fn end(&mut self);
}

/// Frame driver for one clocked sensor with `N` pixels.
pub struct ClockedSensor<C, const N: usize> {
    chain: C,
    frames: FrameBuffers<N>,
    running: bool,
    /// Time of the last SI pulse: the boundary between the frame being
    /// read out and the integration now in progress.
    t_si: u32,
    t_si_prev: u32,
    min_integration_us: u32,
    avg_cycle_us: u32,
}

/// TAOS TSL1410R, 1280 pixels.
pub type Tsl1410r<C> = ClockedSensor<C, 1280>;
/// TAOS TSL1412S, 1536 pixels.
pub type Tsl1412s<C> = ClockedSensor<C, 1536>;
/// TAOS TSL1401, 128 pixels.
pub type Tsl1401<C> = ClockedSensor<C, 128>;

impl<C: CaptureChain, const N: usize> ClockedSensor<C, N> {
    pub fn new(chain: C) -> Self {
        ClockedSensor {
            chain,
            frames: FrameBuffers::new(),
            running: false,
            t_si: 0,
            t_si_prev: 0,
            min_integration_us: 0,
            avg_cycle_us: 0,
        }
    }

    /// Kick off the first frame. Until the first SI pulse the array has
    /// been integrating since power-on, so the first frame is overexposed
    /// garbage; readers discard it naturally since a second frame follows
    /// within one cycle time.
    pub fn start(&mut self, now: u32) {
        self.start_frame(now);
    }

    fn start_frame(&mut self, now: u32) {
        self.chain.pulse_si();
        self.t_si_prev = self.t_si;
        self.t_si = now;
        self.chain.begin(self.frames.dma_buffer());
        self.running = true;
    }

    /// Transfer-complete interrupt: publish the frame and, if the
    /// integration floor already allows it, start the next one.
    pub fn on_transfer_done(&mut self, now: u32) {
        self.chain.end();
        self.running = false;

        let midpoint = self
            .t_si_prev
            .wrapping_add(self.t_si.wrapping_sub(self.t_si_prev) / 2);
        self.frames.frame_done(midpoint);

        let cycle = now.wrapping_sub(self.t_si);
        self.avg_cycle_us = self.avg_cycle_us - self.avg_cycle_us / 8 + cycle / 8;

        if now.wrapping_sub(self.t_si) >= self.min_integration_us {
            self.start_frame(now);
        }
    }

    /// Main-loop tick: restart the cycle once the integration floor has
    /// been met, when the completion interrupt couldn't.
    pub fn poll(&mut self, now: u32) {
        if !self.running && now.wrapping_sub(self.t_si) >= self.min_integration_us {
            self.start_frame(now);
        }
    }
}

impl<C: CaptureChain, const N: usize> FrameSource for ClockedSensor<C, N> {
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
        N
    }

    fn avg_cycle_time_us(&self) -> u32 {
        self.avg_cycle_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct ChainLog {
        si_pulses: u32,
        begins: u32,
        ends: u32,
        fill: u8,
    }

    impl CaptureChain for ChainLog {
        fn pulse_si(&mut self) {
            self.si_pulses += 1;
        }
        fn begin(&mut self, buf: &mut [u8]) {
            self.begins += 1;
            for p in buf.iter_mut() {
                *p = self.fill;
            }
            self.fill = self.fill.wrapping_add(1);
        }
        fn end(&mut self) {
            self.ends += 1;
        }
    }

    #[test]
    fn frames_flow_and_timestamp_at_integration_midpoint() {
        let mut s: ClockedSensor<ChainLog, 16> = ClockedSensor::new(ChainLog::default());
        s.start(1_000);
        s.on_transfer_done(3_000);

        assert!(s.ready());
        let (frame, t) = s.frame().unwrap();
        assert_eq!(frame[0], 0);
        // integration ran from t=0 (boot) to the SI at t=1000
        assert_eq!(t, 500);
        s.release();

        // the second frame integrated from 1000 to 3000
        s.on_transfer_done(5_000);
        let (frame, t) = s.frame().unwrap();
        assert_eq!(frame[0], 1);
        assert_eq!(t, 2_000);
    }

    #[test]
    fn integration_floor_defers_the_next_frame() {
        let mut s: ClockedSensor<ChainLog, 16> = ClockedSensor::new(ChainLog::default());
        s.set_min_integration_time(10_000);
        s.start(0);
        s.on_transfer_done(2_500);
        // floor not met: no new SI yet
        assert_eq!(s.chain.si_pulses, 1);
        s.poll(5_000);
        assert_eq!(s.chain.si_pulses, 1);
        s.poll(10_000);
        assert_eq!(s.chain.si_pulses, 2);
    }

    #[test]
    fn held_frame_drops_later_frames() {
        let mut s: ClockedSensor<ChainLog, 16> = ClockedSensor::new(ChainLog::default());
        s.start(0);
        s.on_transfer_done(1_000);
        let _ = s.frame().unwrap();
        s.on_transfer_done(2_000);
        s.on_transfer_done(3_000);
        // still showing the first frame
        let (frame, _) = s.frame().unwrap();
        assert_eq!(frame[0], 0);
    }
}
