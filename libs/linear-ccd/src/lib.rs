//! Linear image sensor acquisition
//!
//! Two families of linear sensors are supported, with different cycle
//! protocols but one outbound contract: a stream of timestamped pixel
//! frames behind the [`FrameSource`] trait, double-buffered so the reader
//! never races the transfer hardware.
//!
//! - [`clocked`]: bucket-brigade photodiode arrays (TSL1410R family) where
//!   we generate one clock edge per pixel and the ADC's own conversion
//!   cadence paces the readout.
//! - [`tcd1103`]: CCDs with a free-running master clock at twice the pixel
//!   rate (Toshiba TCD1103 family), where frame start is an ICG/SH pulse
//!   sequence with sub-microsecond timing obligations.
//!
//! The MCU-specific plumbing (chained DMA, ADC trigger wiring, the master
//! clock PWM) sits behind per-family traits; the frame state machines,
//! buffer hand-off and integration-time bookkeeping live here and are
//! testable on the host.

#![no_std]

#[cfg(test)]
extern crate std;

mod buffer;
pub mod clocked;
pub mod tcd1103;

pub use buffer::FrameBuffers;

/// A source of timestamped pixel frames.
///
/// The timestamp on a frame is the midpoint of its integration window, in
/// microseconds on the free-running system timer; a position computed from
/// the frame is best treated as "where the plunger was at that instant".
pub trait FrameSource {
    /// Is a freshly captured frame waiting?
    fn ready(&self) -> bool;

    /// Borrow the stable frame and its timestamp. Returns `None` until the
    /// first frame completes. The frame stays valid, and the transfer
    /// hardware stays out of it, until [`release`](FrameSource::release).
    fn frame(&self) -> Option<(&[u8], u32)>;

    /// Hand the stable buffer back so the next capture can use it. Frames
    /// completing while the client holds the buffer are dropped.
    fn release(&mut self);

    /// Floor on the integration window, e.g. to lengthen the exposure for
    /// diagnostics. The sensor can integrate longer (a frame readout takes
    /// what it takes) but never less.
    fn set_min_integration_time(&mut self, us: u32);

    /// Number of pixels per frame.
    fn pixel_count(&self) -> usize;

    /// Rolling average frame cycle time, for the diagnostic reports.
    fn avg_cycle_time_us(&self) -> u32;
}
