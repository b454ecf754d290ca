//! Shared test harness: the whole platform contract in RAM.

use crate::config::{port_type, Config, PinId};
use crate::keycodes::KeyboardReport;
use crate::mainloop::{CabinetIo, Core};
use crate::report::Report;
use crate::sensor::NullSensor;
use feedback::{Driver, DriverBank};

pub struct Rig {
    pub now: u32,
    pub levels: [u8; 128],
    pub sent: heapless::Vec<Report, 64>,
    pub sent_keyboard: heapless::Vec<KeyboardReport, 16>,
    pub sent_media: heapless::Vec<u8, 16>,
    pub connected: bool,
    pub send_ok: bool,
    pub save_ok: bool,
    pub saves: u32,
    pub reboots: u32,
    pub allow_reboot: bool,
    pub relay: Option<u8>,
    pub pins: [bool; 64],
    pub accel: (i16, i16),
    pub outputs_enabled: Option<bool>,
    pub pwm_repolls: u32,
    pub flushes: u32,
}

impl Rig {
    pub fn new() -> Self {
        Rig {
            now: 0,
            levels: [0; 128],
            sent: heapless::Vec::new(),
            sent_keyboard: heapless::Vec::new(),
            sent_media: heapless::Vec::new(),
            connected: true,
            send_ok: true,
            save_ok: true,
            saves: 0,
            reboots: 0,
            allow_reboot: true,
            relay: None,
            pins: [false; 64],
            accel: (0, 0),
            outputs_enabled: None,
            pwm_repolls: 0,
            flushes: 0,
        }
    }
}

impl DriverBank for Rig {
    fn write(&mut self, driver: Driver, level: u8) {
        match driver {
            Driver::GpioPwm(i) | Driver::GpioDigital(i) => {
                self.levels[i as usize] = level;
            }
            _ => {}
        }
    }
}

impl CabinetIo for Rig {
    fn now_us(&mut self) -> u32 {
        self.now
    }
    fn recv(&mut self) -> Option<[u8; 8]> {
        None
    }
    fn send(&mut self, report: &Report) -> bool {
        if !self.send_ok {
            return false;
        }
        self.sent.push(*report).is_ok()
    }
    fn send_keyboard(&mut self, report: &KeyboardReport) -> bool {
        self.sent_keyboard.push(*report).is_ok()
    }
    fn send_media(&mut self, keys: u8) -> bool {
        self.sent_media.push(keys).is_ok()
    }
    fn connected(&mut self) -> bool {
        self.connected
    }
    fn accel(&mut self) -> (i16, i16) {
        self.accel
    }
    fn tv_state(&mut self) -> u8 {
        0
    }
    fn tv_poll(&mut self, _now: u32) {}
    fn tv_relay(&mut self, mode: u8) {
        self.relay = Some(mode);
    }
    fn power_status_allows_reboot(&mut self) -> bool {
        self.allow_reboot
    }
    fn ir_poll(&mut self, _now: u32) {}
    fn ir_send(&mut self, _slot: u8) {}
    fn ir_begin_learning(&mut self) {}
    fn save_config(&mut self, _cfg: &Config) -> bool {
        self.saves += 1;
        self.save_ok
    }
    fn reboot(&mut self) {
        self.reboots += 1;
    }
    fn device_id(&mut self) -> [u8; 10] {
        [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
    }
    fn input_pin(&mut self, pin: PinId) -> bool {
        self.pins[pin.0 as usize % 64]
    }
    fn repoll_pwm(&mut self) {
        self.pwm_repolls += 1;
    }
    fn flush_outputs(&mut self) {
        self.flushes += 1;
    }
    fn set_outputs_enabled(&mut self, on: bool) {
        self.outputs_enabled = Some(on);
    }
    fn set_cal_lamp(&mut self, _on: bool) {}
    fn heartbeat(&mut self, _on: bool) {}
}

/// A core with `n` GPIO-PWM ports wired straight through.
pub fn core_with_ports(n: usize) -> Core<NullSensor> {
    let mut cfg = Config::default();
    for i in 0..n {
        cfg.ports[i].typ = port_type::GPIO_PWM;
        cfg.ports[i].pin = i as u8;
    }
    Core::new(cfg, NullSensor).unwrap()
}
