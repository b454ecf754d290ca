//! Port composition and the port bank

use crate::filters::{ChimeLogic, FilterAction, FlipperLogic};
use crate::gamma::GAMMA8;
use crate::{Driver, DriverBank};

/// Capacity of the port bank. The host protocol can address more, but
/// writes past the configured count are dropped.
pub const MAX_PORTS: usize = 128;

/// Boot-time description of one port. Assembled from the persistent
/// configuration; the composition is fixed until reboot.
#[derive(Debug, Clone, Copy)]
pub struct PortConfig {
    pub driver: Driver,
    /// Active-low wiring: invert the level just before the base driver.
    pub invert: bool,
    /// Apply gamma correction.
    pub gamma: bool,
    /// Noisemaker: force the level to 0 while night mode is engaged.
    pub noisy: bool,
    /// Night-mode indicator lamp: ignore the commanded level entirely and
    /// show the night-mode flag instead.
    pub night_indicator: bool,
    /// Mirror the level into the bank's launch-signal shadow for the
    /// plunger reader.
    pub zb_monitor: bool,
    /// Flipper-logic parameter byte, if the port carries that filter.
    pub flipper: Option<u8>,
    /// Chime-logic parameter byte, if the port carries that filter.
    pub chime: Option<u8>,
}

impl PortConfig {
    /// A bare port with no filters.
    pub fn plain(driver: Driver) -> Self {
        PortConfig {
            driver,
            invert: false,
            gamma: false,
            noisy: false,
            night_indicator: false,
            zb_monitor: false,
            flipper: None,
            chime: None,
        }
    }
}

/// One live output port: the driver tag, the filter chain state, and the
/// host-visible level.
#[derive(Debug, Clone)]
pub struct Port {
    cfg: PortConfig,
    flipper: Option<FlipperLogic>,
    chime: Option<ChimeLogic>,
    level: u8,
}

impl Port {
    fn new(cfg: PortConfig) -> Self {
        Port {
            flipper: cfg.flipper.map(FlipperLogic::new),
            chime: cfg.chime.map(ChimeLogic::new),
            cfg,
            level: 0,
        }
    }

    /// The last level the host commanded, before any filtering.
    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn driver(&self) -> Driver {
        self.cfg.driver
    }
}

/// The full set of configured ports plus the process-wide output state
/// they share: the night-mode flag, the launch-signal shadow, and the
/// pending list of ports with an armed protection timer.
pub struct PortBank {
    ports: heapless::Vec<Port, MAX_PORTS>,
    pending: heapless::Vec<u8, MAX_PORTS>,
    night_mode: bool,
    zb_level: u8,
}

impl PortBank {
    pub fn new() -> Self {
        PortBank {
            ports: heapless::Vec::new(),
            pending: heapless::Vec::new(),
            night_mode: false,
            zb_level: 0,
        }
    }

    /// Add a port at boot. Returns `Err` when the configuration asks for
    /// more ports than the bank can hold.
    pub fn push(&mut self, cfg: PortConfig) -> Result<(), ()> {
        self.ports.push(Port::new(cfg)).map(|_| ()).map_err(|_| ())
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn port(&self, idx: usize) -> Option<&Port> {
        self.ports.get(idx)
    }

    /// Current level of the launch-signal shadow port.
    pub fn zb_level(&self) -> u8 {
        self.zb_level
    }

    pub fn night_mode(&self) -> bool {
        self.night_mode
    }

    /// Host-facing write. Runs the level through the port's filter chain
    /// and hands the result to the base driver. Out-of-range indices are
    /// ignored.
    pub fn set<B: DriverBank>(&mut self, idx: usize, level: u8, now: u32, bank: &mut B) {
        if idx >= self.ports.len() {
            return;
        }
        let night = self.night_mode;
        let cfg = self.ports[idx].cfg;
        self.ports[idx].level = level;

        let mut v = level;
        if cfg.night_indicator {
            v = if night { 255 } else { 0 };
        }
        if cfg.zb_monitor {
            self.zb_level = v;
        }
        if cfg.gamma && !tlc5940_gamma(cfg.driver) {
            v = GAMMA8[v as usize];
        }
        if cfg.noisy && night {
            v = 0;
        }

        // the timed filters may swallow the write entirely
        let port = &mut self.ports[idx];
        let action = match (&mut port.chime, &mut port.flipper) {
            (Some(ch), _) => ch.on_set(v, now),
            (_, Some(fl)) => fl.on_set(v, now),
            _ => {
                write_physical(cfg.driver, cfg.invert, v, bank);
                return;
            }
        };
        if let Some(v) = action.write {
            write_physical(cfg.driver, cfg.invert, v, bank);
        }
        self.track(idx as u8, action);
    }

    /// Periodic service for the flipper/chime timers. Call from the main
    /// loop at millisecond-ish granularity.
    pub fn poll<B: DriverBank>(&mut self, now: u32, bank: &mut B) {
        let mut i = 0;
        while i < self.pending.len() {
            let idx = self.pending[i] as usize;
            let port = &mut self.ports[idx];
            let cfg = port.cfg;
            let action = match (&mut port.chime, &mut port.flipper) {
                (Some(ch), _) => ch.poll(now),
                (_, Some(fl)) => fl.poll(now),
                _ => FilterAction {
                    write: None,
                    arm: false,
                    disarm: true,
                },
            };
            if let Some(v) = action.write {
                write_physical(cfg.driver, cfg.invert, v, bank);
            }
            if action.disarm {
                self.pending.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Engage or disengage night mode, re-filtering every port the flag
    /// touches.
    pub fn set_night_mode<B: DriverBank>(&mut self, on: bool, now: u32, bank: &mut B) {
        if self.night_mode == on {
            return;
        }
        self.night_mode = on;
        for idx in 0..self.ports.len() {
            let (touched, level) = {
                let p = &self.ports[idx];
                (p.cfg.noisy || p.cfg.night_indicator, p.level)
            };
            if touched {
                self.set(idx, level, now, bank);
            }
        }
    }

    /// Re-assert every port's current filtered level. Used when the
    /// downstream chips come back from a power-loss or enable transition.
    pub fn refresh_all<B: DriverBank>(&mut self, now: u32, bank: &mut B) {
        for idx in 0..self.ports.len() {
            let level = self.ports[idx].level;
            self.set(idx, level, now, bank);
        }
    }

    fn track(&mut self, idx: u8, action: FilterAction) {
        if action.arm && !self.pending.contains(&idx) {
            // capacity matches the port count, so this cannot fail
            let _ = self.pending.push(idx);
        }
        if action.disarm {
            if let Some(pos) = self.pending.iter().position(|&p| p == idx) {
                self.pending.swap_remove(pos);
            }
        }
    }
}

fn tlc5940_gamma(driver: Driver) -> bool {
    matches!(driver, Driver::Tlc5940 { gamma: true, .. })
}

fn write_physical<B: DriverBank>(driver: Driver, invert: bool, v: u8, bank: &mut B) {
    let v = if invert { 255 - v } else { v };
    bank.write(driver, v);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Driver;

    /// Records the last level written per driver tag.
    struct Recorder {
        writes: heapless::Vec<(Driver, u8), 64>,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder {
                writes: heapless::Vec::new(),
            }
        }

        fn last_for(&self, driver: Driver) -> Option<u8> {
            self.writes
                .iter()
                .rev()
                .find(|(d, _)| *d == driver)
                .map(|&(_, v)| v)
        }
    }

    impl DriverBank for Recorder {
        fn write(&mut self, driver: Driver, level: u8) {
            let _ = self.writes.push((driver, level));
        }
    }

    const D0: Driver = Driver::GpioPwm(0);

    #[test]
    fn plain_port_passes_through() {
        let mut bank = PortBank::new();
        bank.push(PortConfig::plain(D0)).unwrap();
        let mut rec = Recorder::new();
        bank.set(0, 200, 0, &mut rec);
        assert_eq!(rec.last_for(D0), Some(200));
        assert_eq!(bank.port(0).unwrap().level(), 200);
    }

    #[test]
    fn invert_is_innermost() {
        let mut cfg = PortConfig::plain(D0);
        cfg.invert = true;
        cfg.gamma = true;
        let mut bank = PortBank::new();
        bank.push(cfg).unwrap();
        let mut rec = Recorder::new();
        bank.set(0, 255, 0, &mut rec);
        // gamma(255) == 255, then inverted
        assert_eq!(rec.last_for(D0), Some(0));
        bank.set(0, 0, 0, &mut rec);
        assert_eq!(rec.last_for(D0), Some(255));
    }

    #[test]
    fn noisy_port_muted_in_night_mode() {
        let mut cfg = PortConfig::plain(D0);
        cfg.noisy = true;
        let mut bank = PortBank::new();
        bank.push(cfg).unwrap();
        let mut rec = Recorder::new();

        bank.set(0, 128, 0, &mut rec);
        assert_eq!(rec.last_for(D0), Some(128));

        bank.set_night_mode(true, 1, &mut rec);
        assert_eq!(rec.last_for(D0), Some(0));
        // commanded level survives for when night mode ends
        assert_eq!(bank.port(0).unwrap().level(), 128);

        bank.set(0, 255, 2, &mut rec);
        assert_eq!(rec.last_for(D0), Some(0));

        bank.set_night_mode(false, 3, &mut rec);
        assert_eq!(rec.last_for(D0), Some(255));
    }

    #[test]
    fn night_indicator_tracks_flag_not_level() {
        let mut cfg = PortConfig::plain(D0);
        cfg.night_indicator = true;
        let mut bank = PortBank::new();
        bank.push(cfg).unwrap();
        let mut rec = Recorder::new();

        bank.set(0, 200, 0, &mut rec);
        assert_eq!(rec.last_for(D0), Some(0));
        bank.set_night_mode(true, 1, &mut rec);
        assert_eq!(rec.last_for(D0), Some(255));
    }

    #[test]
    fn zb_monitor_shadows_level() {
        let mut cfg = PortConfig::plain(Driver::Virtual);
        cfg.zb_monitor = true;
        let mut bank = PortBank::new();
        bank.push(cfg).unwrap();
        let mut rec = Recorder::new();

        assert_eq!(bank.zb_level(), 0);
        bank.set(0, 255, 0, &mut rec);
        assert_eq!(bank.zb_level(), 255);
        bank.set(0, 0, 1, &mut rec);
        assert_eq!(bank.zb_level(), 0);
    }

    #[test]
    fn set_zero_reaches_hardware_through_any_stateless_stack() {
        for flags in 0..8u8 {
            let mut cfg = PortConfig::plain(D0);
            cfg.invert = flags & 1 != 0;
            cfg.gamma = flags & 2 != 0;
            cfg.noisy = flags & 4 != 0;
            let mut bank = PortBank::new();
            bank.push(cfg).unwrap();
            let mut rec = Recorder::new();
            bank.set(0, 200, 0, &mut rec);
            bank.set(0, 0, 1, &mut rec);
            let expect = if cfg.invert { 255 } else { 0 };
            assert_eq!(rec.last_for(D0), Some(expect), "flags {:03b}", flags);
        }
    }

    #[test]
    fn chime_min_on_defers_physical_off() {
        // min 5ms / max 100ms, client lets go after 1ms
        let mut cfg = PortConfig::plain(D0);
        cfg.chime = Some(0x83);
        let mut bank = PortBank::new();
        bank.push(cfg).unwrap();
        let mut rec = Recorder::new();

        bank.set(0, 255, 0, &mut rec);
        assert_eq!(rec.last_for(D0), Some(255));
        bank.set(0, 0, 1_000, &mut rec);
        bank.poll(2_000, &mut rec);
        // still on at 2ms
        assert_eq!(rec.last_for(D0), Some(255));
        bank.poll(6_000, &mut rec);
        assert_eq!(rec.last_for(D0), Some(0));
    }

    #[test]
    fn flipper_hold_applies_through_invert() {
        let mut cfg = PortConfig::plain(D0);
        cfg.invert = true;
        cfg.flipper = Some(0xA0); // 50ms full, hold 170
        let mut bank = PortBank::new();
        bank.push(cfg).unwrap();
        let mut rec = Recorder::new();

        bank.set(0, 255, 0, &mut rec);
        assert_eq!(rec.last_for(D0), Some(0)); // 255 inverted
        bank.poll(50_000, &mut rec);
        assert_eq!(rec.last_for(D0), Some(255 - 170));
    }
}
