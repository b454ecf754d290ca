//! Plunger sensor interface and the bundled sensor types
//!
//! The reader upstairs only wants [`PlungerReading`]s; everything
//! sensor-specific sits behind [`PlungerSensor`]. Imaging sensors reduce
//! each frame to a position by finding the shadow edge the plunger casts
//! across the pixel array; analog sensors just scale an ADC sample.

use crate::config::Config;
use crate::plunger::PlungerReading;
use linear_ccd::FrameSource;

/// The narrow contract the core consumes. Methods with empty defaults
/// only matter to some sensor families.
pub trait PlungerSensor {
    /// One-shot hardware setup at boot.
    fn init(&mut self) {}

    /// Is a new observation available?
    fn ready(&mut self) -> bool;

    /// Take the latest observation. `now` is the current microsecond
    /// clock, for sensors whose readings aren't self-timestamped.
    /// Returns `None` when no usable observation could be made; the
    /// caller just tries again next cycle.
    fn read(&mut self, now: u32) -> Option<PlungerReading>;

    /// A configuration variable changed while running.
    fn on_config_change(&mut self, _var_id: u8, _cfg: &Config) {}

    /// Diagnostic exposure extension.
    fn set_extra_integration_time(&mut self, _us: u32) {}

    /// Idempotent re-centering, for sensor types that drift.
    fn auto_zero(&mut self) {}

    /// Keep the current frame pinned for a multi-report pixel dump (and
    /// release it again when the dump finishes).
    fn hold_frame(&mut self, _hold: bool) {}

    /// The pinned frame's pixels, for the dump. Non-imaging sensors have
    /// none.
    fn pixels(&self) -> Option<&[u8]> {
        None
    }

    /// Sensor resolution in position quanta.
    fn npix(&self) -> u32 {
        0
    }

    /// Rolling average cycle time, for the dump trailer report.
    fn avg_cycle_time_us(&self) -> u32 {
        0
    }

    /// Shadow edge pixel found in the last analyzed frame, if any.
    fn last_edge(&self) -> Option<u16> {
        None
    }

    /// The last analyzed frame had the sensor mounted backwards.
    fn reversed_orientation(&self) -> bool {
        false
    }
}

/// No plunger installed.
pub struct NullSensor;

impl PlungerSensor for NullSensor {
    fn ready(&mut self) -> bool {
        false
    }

    fn read(&mut self, _now: u32) -> Option<PlungerReading> {
        None
    }
}

/// A single analog channel, e.g. the wiper of a linear potentiometer.
/// The ADC plumbing is the platform's.
pub trait AnalogIn {
    /// A sample on the full 16-bit scale.
    fn sample(&mut self) -> u16;
}

/// Potentiometer (or any single-voltage) plunger sensor.
pub struct AnalogPlunger<A> {
    adc: A,
}

impl<A: AnalogIn> AnalogPlunger<A> {
    pub fn new(adc: A) -> Self {
        AnalogPlunger { adc }
    }
}

impl<A: AnalogIn> PlungerSensor for AnalogPlunger<A> {
    fn ready(&mut self) -> bool {
        true
    }

    fn read(&mut self, now: u32) -> Option<PlungerReading> {
        Some(PlungerReading {
            pos: self.adc.sample(),
            t: now,
        })
    }

    fn npix(&self) -> u32 {
        65535
    }
}

/// Running edge count from a quadrature encoder pair. The A/B edge ISRs
/// live on the platform (they must run at elevated priority, within one
/// quadrature period, or motion is miscounted); this just reads the
/// accumulated signed count.
pub trait QuadratureCounter {
    fn count(&mut self) -> i32;
}

/// Quadrature plunger sensor (optical or magnetic encoder bar).
///
/// The encoder only measures relative motion, so the mapping onto the
/// absolute sensor scale floats on an origin: wherever the plunger was at
/// the last [`auto_zero`](PlungerSensor::auto_zero) reads as the nominal
/// rest position. Auto-zeroing is idempotent and cheap, so the main loop
/// can re-center opportunistically whenever the plunger has been still.
pub struct QuadraturePlunger<Q> {
    counter: Q,
    /// Encoder counts across the full travel range.
    counts_per_range: i32,
    origin: i32,
}

/// Where the floating origin sits on the 16-bit scale: the factory rest
/// position, one sixth up from the forward end.
const QUAD_REST: i32 = 65535 / 6;

impl<Q: QuadratureCounter> QuadraturePlunger<Q> {
    pub fn new(counter: Q, counts_per_range: i32) -> Self {
        QuadraturePlunger {
            counter,
            counts_per_range: counts_per_range.max(1),
            origin: 0,
        }
    }
}

impl<Q: QuadratureCounter> PlungerSensor for QuadraturePlunger<Q> {
    fn init(&mut self) {
        self.auto_zero();
    }

    fn ready(&mut self) -> bool {
        true
    }

    fn read(&mut self, now: u32) -> Option<PlungerReading> {
        let rel = self.counter.count() - self.origin;
        let scaled = QUAD_REST + (rel as i64 * 65535 / self.counts_per_range as i64) as i32;
        Some(PlungerReading {
            pos: scaled.max(0).min(65535) as u16,
            t: now,
        })
    }

    fn npix(&self) -> u32 {
        self.counts_per_range as u32
    }

    fn auto_zero(&mut self) {
        self.origin = self.counter.count();
    }
}

/// Minimum bright/dark spread for a frame to count as having an edge at
/// all. Below this the image is either unlit or fully shadowed.
const MIN_CONTRAST: u8 = 40;

/// Pixels averaged at each end of the array for the reference levels.
const REF_PIXELS: usize = 8;

/// Result of scanning one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Pixel index of the shadow edge.
    pub pixel: u16,
    /// The bright end was at the high-index end of the array.
    pub reversed: bool,
}

/// Find the plunger's shadow edge: take the average brightness of each
/// end of the array, call the brighter end "open" and the darker end
/// "shadowed", and scan from the open end for the first crossing of the
/// midpoint between the two.
pub fn find_edge(pixels: &[u8]) -> Option<Edge> {
    if pixels.len() < 2 * REF_PIXELS {
        return None;
    }
    let head: u32 = pixels[..REF_PIXELS].iter().map(|&p| p as u32).sum::<u32>() / REF_PIXELS as u32;
    let tail: u32 = pixels[pixels.len() - REF_PIXELS..]
        .iter()
        .map(|&p| p as u32)
        .sum::<u32>()
        / REF_PIXELS as u32;

    let (hi, lo) = if head > tail { (head, tail) } else { (tail, head) };
    if hi - lo < MIN_CONTRAST as u32 {
        return None;
    }
    let mid = ((hi + lo) / 2) as u8;

    let reversed = tail > head;
    if reversed {
        for (i, &p) in pixels.iter().enumerate().rev() {
            if p < mid {
                return Some(Edge {
                    pixel: i as u16,
                    reversed,
                });
            }
        }
    } else {
        for (i, &p) in pixels.iter().enumerate() {
            if p < mid {
                return Some(Edge {
                    pixel: i as u16,
                    reversed,
                });
            }
        }
    }
    None
}

/// An imaging plunger sensor: any [`FrameSource`] plus the edge scan.
pub struct ImagingPlunger<S> {
    source: S,
    held: bool,
    last_edge: Option<Edge>,
    extra_integration_us: u32,
}

impl<S: FrameSource> ImagingPlunger<S> {
    pub fn new(source: S) -> Self {
        ImagingPlunger {
            source,
            held: false,
            last_edge: None,
            extra_integration_us: 0,
        }
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: FrameSource> PlungerSensor for ImagingPlunger<S> {
    fn ready(&mut self) -> bool {
        !self.held && self.source.ready()
    }

    fn read(&mut self, _now: u32) -> Option<PlungerReading> {
        if self.held {
            return None;
        }
        let npix = self.source.pixel_count();
        let result = {
            let (pixels, t) = self.source.frame()?;
            find_edge(pixels).map(|edge| (edge, t))
        };
        self.source.release();

        let (edge, t) = match result {
            Some(r) => r,
            // no edge: unusable frame (sensor unlit, plunger out of
            // frame); drop it silently
            None => {
                self.last_edge = None;
                return None;
            }
        };
        self.last_edge = Some(edge);

        // scale the pixel index onto the 16-bit sensor scale, flipping
        // reversed mountings so higher always means more retracted
        let scaled = (edge.pixel as u32 * 65535 / (npix as u32 - 1)) as u16;
        let pos = if edge.reversed { scaled } else { 65535 - scaled };
        Some(PlungerReading { pos, t })
    }

    fn set_extra_integration_time(&mut self, us: u32) {
        self.extra_integration_us = us;
        self.source.set_min_integration_time(us);
    }

    fn hold_frame(&mut self, hold: bool) {
        if self.held && !hold {
            self.source.release();
        }
        self.held = hold;
    }

    fn pixels(&self) -> Option<&[u8]> {
        self.source.frame().map(|(p, _)| p)
    }

    fn npix(&self) -> u32 {
        self.source.pixel_count() as u32
    }

    fn avg_cycle_time_us(&self) -> u32 {
        self.source.avg_cycle_time_us()
    }

    fn last_edge(&self) -> Option<u16> {
        self.last_edge.map(|e| e.pixel)
    }

    fn reversed_orientation(&self) -> bool {
        self.last_edge.map(|e| e.reversed).unwrap_or(false)
    }
}
