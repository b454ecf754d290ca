//! Protocol exerciser
//!
//! Runs the controller core on the host against a simulated cabinet, so
//! protocol changes can be poked at without flashing a board. The sim
//! wires up 32 PWM output ports, a launch button, and a scripted plunger
//! pull-and-release, then plays a handful of host messages at it:
//!
//! - SBA/PBA: the legacy on/off plus profile pair
//! - a flash-mode profile, sampled over a full cycle
//! - an extended bulk-brightness write
//! - night mode on and off
//!
//! After each step it logs the first few port levels. Run with
//! `RUST_LOG=info` (or `debug` for the raw report traffic). The scripted
//! plunger readings are also dumped as postcard-serialized
//! `PlungerReading`s at the end, which is handy as paste-in test data.

use cab_core::config::{port_type, Config, KeyAssign};
use cab_core::keycodes::KeyboardReport;
use cab_core::plunger::PlungerReading;
use cab_core::report::Report;
use cab_core::sensor::PlungerSensor;
use cab_core::{CabinetIo, Core};
use feedback::{Driver, DriverBank};

/// The simulated cabinet: a microsecond clock we advance by hand, a
/// queue of host messages, and the observed output levels.
struct SimCabinet {
    now: u32,
    inbox: std::collections::VecDeque<[u8; 8]>,
    levels: [u8; 128],
    reports: Vec<Report>,
}

impl SimCabinet {
    fn new() -> Self {
        SimCabinet {
            now: 0,
            inbox: std::collections::VecDeque::new(),
            levels: [0; 128],
            reports: Vec::new(),
        }
    }

    fn queue(&mut self, msg: [u8; 8]) {
        self.inbox.push_back(msg);
    }
}

impl DriverBank for SimCabinet {
    fn write(&mut self, driver: Driver, level: u8) {
        if let Driver::GpioPwm(i) = driver {
            self.levels[i as usize] = level;
        }
    }
}

impl CabinetIo for SimCabinet {
    fn now_us(&mut self) -> u32 {
        self.now
    }
    fn recv(&mut self) -> Option<[u8; 8]> {
        self.inbox.pop_front()
    }
    fn send(&mut self, report: &Report) -> bool {
        log::debug!("report {:02x?}", report);
        self.reports.push(*report);
        true
    }
    fn send_keyboard(&mut self, report: &KeyboardReport) -> bool {
        log::debug!("keyboard {:?}", report);
        true
    }
    fn send_media(&mut self, keys: u8) -> bool {
        log::debug!("media {:#04x}", keys);
        true
    }
    fn connected(&mut self) -> bool {
        true
    }
    fn accel(&mut self) -> (i16, i16) {
        (0, 0)
    }
    fn tv_state(&mut self) -> u8 {
        0
    }
    fn tv_poll(&mut self, _now: u32) {}
    fn tv_relay(&mut self, mode: u8) {
        log::info!("TV relay override: {}", mode);
    }
    fn power_status_allows_reboot(&mut self) -> bool {
        true
    }
    fn ir_poll(&mut self, _now: u32) {}
    fn ir_send(&mut self, slot: u8) {
        log::info!("IR transmit, slot {}", slot);
    }
    fn ir_begin_learning(&mut self) {}
    fn save_config(&mut self, _cfg: &Config) -> bool {
        log::info!("config save requested");
        true
    }
    fn reboot(&mut self) {
        log::warn!("reboot requested");
    }
    fn device_id(&mut self) -> [u8; 10] {
        *b"SIMULATED\0"
    }
    fn input_pin(&mut self, _pin: cab_core::config::PinId) -> bool {
        false
    }
    fn repoll_pwm(&mut self) {}
    fn flush_outputs(&mut self) {}
    fn set_outputs_enabled(&mut self, on: bool) {
        log::info!("external outputs {}", if on { "enabled" } else { "disabled" });
    }
    fn set_cal_lamp(&mut self, _on: bool) {}
    fn heartbeat(&mut self, _on: bool) {}
}

/// Plays back a canned pull-and-release trace, one reading per read.
struct ScriptedPlunger {
    script: Vec<PlungerReading>,
    next: usize,
}

impl PlungerSensor for ScriptedPlunger {
    fn ready(&mut self) -> bool {
        self.next < self.script.len()
    }
    fn read(&mut self, _now: u32) -> Option<PlungerReading> {
        let r = self.script.get(self.next).copied();
        self.next += 1;
        r
    }
}

/// Advance the simulated clock and run loop passes over `span_us`.
fn run(core: &mut Core<ScriptedPlunger>, sim: &mut SimCabinet, span_us: u32) {
    let mut elapsed = 0;
    while elapsed < span_us {
        sim.now = sim.now.wrapping_add(1_000);
        elapsed += 1_000;
        core.run_once(sim);
    }
}

fn dump_levels(sim: &SimCabinet, label: &str) {
    log::info!("{:24} ports 1-8: {:?}", label, &sim.levels[..8]);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut cfg = Config::default();
    for i in 0..32 {
        cfg.ports[i].typ = port_type::GPIO_PWM;
        cfg.ports[i].pin = i as u8;
    }
    cfg.ports[2].flags |= cab_core::config::port_flags::NOISY;
    cfg.plunger.sensor_type = cab_core::config::sensor_type::TSL1410R;
    cfg.plunger.cal.zero = 10_000;
    cfg.plunger.cal.max = 60_000;
    cfg.buttons[23].key = KeyAssign { typ: 1, val: 24 };

    let script = vec![
        PlungerReading { pos: 10_000, t: 1_000 },
        PlungerReading { pos: 35_000, t: 201_000 },
        PlungerReading { pos: 60_000, t: 401_000 },
        PlungerReading { pos: 45_000, t: 406_000 },
        PlungerReading { pos: 20_000, t: 416_000 },
        PlungerReading { pos: 0, t: 431_000 },
        PlungerReading { pos: 0, t: 531_000 },
    ];
    let postcard_script = script.clone();

    let plunger = ScriptedPlunger { script, next: 0 };
    let mut core = Core::new(cfg, plunger).expect("sim config fits the core tables");
    let mut sim = SimCabinet::new();

    log::info!("=============READY=============");

    // legacy round trip: ports 1-8 on at speed 2, profile 16 everywhere
    sim.queue([0x40, 0xFF, 0x00, 0x00, 0x00, 0x02, 0, 0]);
    sim.queue([0x10; 8]);
    run(&mut core, &mut sim, 10_000);
    dump_levels(&sim, "SBA+PBA profile 16");

    // flash mode on port 1: sample the square wave over half a cycle
    sim.queue([0x40, 0x01, 0x00, 0x00, 0x00, 0x02, 0, 0]);
    sim.queue([130, 48, 48, 48, 48, 48, 48, 48]);
    run(&mut core, &mut sim, 10_000);
    dump_levels(&sim, "flash square, phase 0");
    run(&mut core, &mut sim, 250_000);
    dump_levels(&sim, "flash square, half cycle");

    // extended bulk brightness: direct 8-bit levels
    sim.queue([0xC8, 0xFF, 0x80, 0x40, 0, 0, 0, 0]);
    run(&mut core, &mut sim, 10_000);
    dump_levels(&sim, "bulk 255/128/64");

    // night mode mutes the noisy port 3 and restores it afterwards
    sim.queue([65, 8, 1, 0, 0, 0, 0, 0]);
    run(&mut core, &mut sim, 10_000);
    dump_levels(&sim, "night mode on");
    sim.queue([65, 8, 0, 0, 0, 0, 0, 0]);
    run(&mut core, &mut sim, 10_000);
    dump_levels(&sim, "night mode off");

    // let the scripted plunger release play out
    run(&mut core, &mut sim, 300_000);
    let last = sim.reports.last().expect("at least one joystick report");
    log::info!(
        "last joystick report: status {:#04x}, z {}",
        last[0],
        i16::from_le_bytes([last[12], last[13]])
    );

    let mut buf = [0u8; 256];
    let used = postcard::to_slice(&postcard_script, &mut buf).expect("script fits the buffer");
    log::info!("postcard plunger trace ({} bytes): {:02x?}", used.len(), used);
}
