//! The cooperative main loop
//!
//! Single thread, no preemption between sections: one [`Core::run_once`]
//! pass services every subsystem in a fixed order, and the ISR-driven
//! pieces (pixel DMA completion, the 1kHz button scan) only touch
//! single-word state the loop reads. The pass order matters: host
//! commands are fully applied before the flash engine ticks, outputs are
//! flushed before the sensor read so a ZB-launch level change is visible
//! to the reader in the same pass, and reports go out last with
//! everything coherent.
//!
//! Everything outside the core (USB endpoints, the accelerometer driver,
//! the TV power latch, IR, flash persistence, the diagnostic LED) is
//! reached through the [`CabinetIo`] trait, so the whole loop runs
//! against a mock in tests.

use crate::buttons::{ButtonPins, ButtonScanner};
use crate::config::{port_flags, port_type, Config, PinId};
use crate::ledwiz::LedWizState;
use crate::plunger::{PlungerReader, JOYMAX};
use crate::report::{self, Report};
use crate::sensor::PlungerSensor;
use feedback::{Driver, DriverBank, PortBank, PortConfig};

/// TV relay override commands (vendor control subtype 11).
pub mod tv_relay {
    pub const OFF: u8 = 0;
    pub const ON: u8 = 1;
    pub const PULSE: u8 = 2;
}

/// Everything the core needs from the platform, in one narrow contract.
/// The `DriverBank` supertrait routes output-port writes to the GPIO
/// pools and peripheral chip drivers.
pub trait CabinetIo: DriverBank {
    /// Free-running microsecond clock, wrapping.
    fn now_us(&mut self) -> u32;

    /// Next 8-byte host command, if one is queued.
    fn recv(&mut self) -> Option<[u8; 8]>;

    /// Try to transmit an input report; false when the endpoint is busy
    /// or the host is gone.
    fn send(&mut self, report: &Report) -> bool;

    /// Try to transmit the keyboard interface report.
    fn send_keyboard(&mut self, report: &crate::keycodes::KeyboardReport) -> bool;

    /// Try to transmit the media-key report byte.
    fn send_media(&mut self, keys: u8) -> bool;

    /// USB connection is up.
    fn connected(&mut self) -> bool;

    /// Latest accelerometer reading, device frame, full joystick scale.
    /// Draining the device FIFO is the driver's business.
    fn accel(&mut self) -> (i16, i16);

    /// TV power state machine sub-state, three bits for the status byte.
    fn tv_state(&mut self) -> u8;
    fn tv_poll(&mut self, now: u32);
    fn tv_relay(&mut self, mode: u8);
    /// The TV state machine is idle enough that a reboot won't wedge the
    /// power-on sequence.
    fn power_status_allows_reboot(&mut self) -> bool;

    fn ir_poll(&mut self, now: u32);
    /// Transmit a learned IR command slot (1-based).
    fn ir_send(&mut self, slot: u8);
    fn ir_begin_learning(&mut self);

    /// Write the configuration to flash; false on failure.
    fn save_config(&mut self, cfg: &Config) -> bool;

    /// Reset the MCU. May return in tests; real platforms don't.
    fn reboot(&mut self);

    /// Factory-unique CPU identifier.
    fn device_id(&mut self) -> [u8; 10];

    /// Raw level of a digital input pin; true = active.
    fn input_pin(&mut self, pin: PinId) -> bool;

    /// Re-issue the last duty cycle on every GPIO-PWM output.
    fn repoll_pwm(&mut self);

    /// Push staged 74HC595 / TLC59116 writes out to the chips.
    fn flush_outputs(&mut self);

    /// Gate the external output chips' enable line.
    fn set_outputs_enabled(&mut self, on: bool);

    /// Calibration-mode indicator lamp.
    fn set_cal_lamp(&mut self, on: bool);

    /// Heartbeat LED level.
    fn heartbeat(&mut self, on: bool);
}

impl<T: CabinetIo> ButtonPins for T {
    fn read(&mut self, pin: PinId) -> bool {
        self.input_pin(pin)
    }
}

/// Boot-time construction failure: the configuration wants more than the
/// fixed-capacity tables hold. Unrecoverable without reconfiguring; the
/// platform parks in its diagnostic-flash loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    TooManyPorts,
}

/// How long the save-success status bit stays up after a save.
const SAVE_STATUS_WINDOW_US: u32 = 30_000_000;
/// GPIO-PWM re-poll cadence.
const PWM_REPOLL_US: u32 = 15_000;
/// Command-drain budget per loop pass.
const CMD_BUDGET_US: u32 = 5_000;

pub(crate) struct PixelDump {
    pub low_res: bool,
    pub next: u16,
    pub stage: u8, // 0 = pixels, 1 = stats trailer, 2 = cal trailer
}

/// The core context: all process-wide state, threaded through one owner
/// so tests can instantiate as many independent cores as they like.
pub struct Core<S> {
    pub cfg: Config,
    pub lw: LedWizState,
    pub ports: PortBank,
    pub buttons: ButtonScanner,
    pub reader: PlungerReader,
    pub sensor: S,

    pub(crate) pending_replies: heapless::Deque<Report, 8>,
    pub(crate) pixel_dump: Option<PixelDump>,
    pub(crate) ir_learning_until: Option<u32>,
    pub(crate) last_save_ok_t: Option<u32>,
    pub(crate) save_failed: bool,
    pub(crate) reboot_at: Option<u32>,
    pub(crate) plunger_enabled: bool,

    zb_pressed: bool,
    accel_xy: (i16, i16),
    last_joy_report_t: u32,
    last_tx_ok_t: u32,
    last_pwm_repoll_t: u32,
    last_button_tick_t: u32,
    last_cal_tick_t: u32,
    outputs_enabled: bool,
    heartbeat_t: u32,
    heartbeat_on: bool,
}

impl<S: PlungerSensor> Core<S> {
    /// Build the live core from a configuration image. The port stack is
    /// fixed from here until reboot.
    pub fn new(cfg: Config, sensor: S) -> Result<Self, BuildError> {
        let mut ports = PortBank::new();
        for (i, def) in cfg.ports[..cfg.visible_ports()].iter().enumerate() {
            let driver = match def.typ {
                port_type::GPIO_PWM => Driver::GpioPwm(def.pin),
                port_type::GPIO_DIGITAL => Driver::GpioDigital(def.pin),
                port_type::TLC5940 => Driver::Tlc5940 {
                    chan: def.pin,
                    gamma: def.flags & port_flags::GAMMA != 0,
                },
                port_type::HC595 => Driver::Hc595(def.pin),
                port_type::TLC59116 => Driver::Tlc59116 {
                    chip: def.pin >> 4,
                    chan: def.pin & 0x0F,
                },
                _ => Driver::Virtual,
            };
            let port_no = (i + 1) as u8;
            let pc = PortConfig {
                driver,
                invert: def.flags & port_flags::ACTIVE_LOW != 0,
                gamma: def.flags & port_flags::GAMMA != 0,
                noisy: def.flags & port_flags::NOISY != 0,
                night_indicator: def.flags & port_flags::NIGHT_INDICATOR != 0
                    || cfg.night_mode.port == port_no,
                zb_monitor: cfg.plunger.zb.port == port_no,
                flipper: if def.flags & port_flags::FLIPPER_LOGIC != 0 {
                    Some(def.params)
                } else {
                    None
                },
                chime: if def.flags & port_flags::CHIME_LOGIC != 0 {
                    Some(def.params)
                } else {
                    None
                },
            };
            ports.push(pc).map_err(|_| BuildError::TooManyPorts)?;
        }

        let buttons = ButtonScanner::new(&cfg);
        let reader = PlungerReader::new(cfg.plunger.cal);
        let plunger_enabled =
            cfg.plunger.enabled && cfg.plunger.sensor_type != crate::config::sensor_type::NONE;

        Ok(Core {
            buttons,
            reader,
            lw: LedWizState::new(),
            ports,
            sensor,
            cfg,
            pending_replies: heapless::Deque::new(),
            pixel_dump: None,
            ir_learning_until: None,
            last_save_ok_t: None,
            save_failed: false,
            reboot_at: None,
            plunger_enabled,
            zb_pressed: false,
            accel_xy: (0, 0),
            last_joy_report_t: 0,
            last_tx_ok_t: 0,
            last_pwm_repoll_t: 0,
            last_button_tick_t: 0,
            last_cal_tick_t: 0,
            outputs_enabled: false,
            heartbeat_t: 0,
            heartbeat_on: false,
        })
    }

    /// The status byte for the next joystick report.
    pub fn status_byte<IO: CabinetIo>(&mut self, now: u32, io: &mut IO) -> u8 {
        let mut s = 0u8;
        if self.plunger_enabled {
            s |= report::status::PLUNGER;
        }
        if self.ports.night_mode() {
            s |= report::status::NIGHT_MODE;
        }
        s |= (io.tv_state() << report::status::TV_STATE_SHIFT) & report::status::TV_STATE_MASK;
        if self.ir_learning_until.is_some() {
            s |= report::status::IR_LEARNING;
        }
        if let Some(t) = self.last_save_ok_t {
            if now.wrapping_sub(t) < SAVE_STATUS_WINDOW_US {
                s |= report::status::SAVE_OK;
            } else {
                self.last_save_ok_t = None;
            }
        }
        s
    }

    /// One pass of the cooperative loop.
    pub fn run_once<IO: CabinetIo>(&mut self, io: &mut IO) {
        let t0 = io.now_us();

        // 1. drain host commands within the time budget
        while let Some(msg) = io.recv() {
            self.handle_message(&msg, io);
            if io.now_us().wrapping_sub(t0) >= CMD_BUDGET_US {
                break;
            }
        }

        let now = io.now_us();

        // 2. IR subsystem, and the learning-mode timeout
        io.ir_poll(now);
        if let Some(t) = self.ir_learning_until {
            if now.wrapping_sub(t) < 0x8000_0000 {
                self.ir_learning_until = None;
            }
        }

        // 3. TV power state machine
        io.tv_poll(now);

        // 4. flash engine, one bank per pass
        self.lw.flash_tick(now, &mut self.ports, io);

        // 5. GPIO-PWM re-poll
        if now.wrapping_sub(self.last_pwm_repoll_t) >= PWM_REPOLL_US {
            self.last_pwm_repoll_t = now;
            io.repoll_pwm();
        }

        // 6. flipper/chime timers
        self.ports.poll(now, io);

        // 7. accelerometer
        let (ax, ay) = io.accel();
        self.accel_xy = orient(self.cfg.accel.orientation, ax, ay);

        // 8. peripheral chip flush
        io.flush_outputs();

        // 9. calibration button and session
        self.tick_calibration(now, io);

        // 10. plunger sensor
        if self.plunger_enabled && self.sensor.ready() {
            if let Some(reading) = self.sensor.read(now) {
                self.reader.process(reading);
            }
        }

        // 11. ZB launch virtual button
        self.tick_zb_launch();

        // 12. button scan at 1kHz
        let dt = now.wrapping_sub(self.last_button_tick_t);
        if dt >= 1_000 {
            self.last_button_tick_t = now;
            let events = self.buttons.tick(io, dt);
            if events.night_toggle {
                let night = !self.ports.night_mode();
                self.ports.set_night_mode(night, now, io);
            }
            if let Some(slot) = events.ir_send {
                io.ir_send(slot);
            }
            if let Some(level) = self.buttons.build_reports() {
                self.ports.set_night_mode(level, now, io);
            }
        }

        // 13. keyboard / media reports on dirty
        if let Some(kb) = self.buttons.take_keyboard() {
            if !io.send_keyboard(&kb) {
                // try again next pass
                self.buttons.force_keyboard_dirty();
            }
        }
        if let Some(m) = self.buttons.take_media() {
            if !io.send_media(m) {
                self.buttons.force_media_dirty();
            }
        }

        // 14. joystick / vendor reports
        self.tick_reports(now, io);

        // 15. pixel dump chunk
        self.tick_pixel_dump(io);

        // 16. heartbeat, connection management, watchdogs
        self.tick_health(now, io);
    }

    fn tick_calibration<IO: CabinetIo>(&mut self, now: u32, io: &mut IO) {
        let dt = now.wrapping_sub(self.last_cal_tick_t);
        self.last_cal_tick_t = now;
        let btn = self.cfg.plunger.cal_button;
        if btn.is_connected() {
            let pressed = io.input_pin(btn);
            if self.reader.tick_cal_button(pressed, dt) && !self.reader.calibrating() {
                self.reader.begin_calibration(now);
            }
        }
        io.set_cal_lamp(self.reader.calibrating());
        if self.reader.tick_calibration(now) {
            // session over: keep the results and persist them
            self.cfg.plunger.cal = self.reader.calibration();
            if !io.save_config(&self.cfg) {
                self.save_failed = true;
            }
        }
    }

    fn tick_zb_launch(&mut self) {
        let zb = self.cfg.plunger.zb;
        let active = self.ports.zb_level() > 0 && zb.btn != 0;
        // nominal full travel is ~3", so scale 1/1000" to position units
        let threshold = zb.push_distance as i32 * JOYMAX / 3_000;
        let pressed = active && (self.reader.firing() || self.reader.pushed_forward(threshold));
        if pressed != self.zb_pressed {
            self.buttons.virtual_press(zb.btn, pressed);
            self.zb_pressed = pressed;
        }
    }

    fn tick_reports<IO: CabinetIo>(&mut self, now: u32, io: &mut IO) {
        // vendor replies jump the queue; they're one-shot responses the
        // host is actively waiting on
        while let Some(reply) = self.pending_replies.front() {
            if io.send(reply) {
                self.last_tx_ok_t = now;
                self.pending_replies.pop_front();
            } else {
                return;
            }
        }

        let interval = self.cfg.report_interval_ms.max(1) as u32 * 1_000;
        if now.wrapping_sub(self.last_joy_report_t) < interval {
            return;
        }
        if !self.cfg.joystick_enabled {
            return;
        }

        let z = if self.ports.zb_level() > 0 || !self.plunger_enabled {
            0
        } else {
            self.reader.position()
        };
        let status = self.status_byte(now, io);
        let (x, y) = self.accel_xy;
        let r = report::joystick(status, self.buttons.joystick_buttons(), x, y, z);
        if io.send(&r) {
            self.last_joy_report_t = now;
            self.last_tx_ok_t = now;
        }
    }

    fn tick_health<IO: CabinetIo>(&mut self, now: u32, io: &mut IO) {
        // heartbeat at 1Hz
        if now.wrapping_sub(self.heartbeat_t) >= 500_000 {
            self.heartbeat_t = now;
            self.heartbeat_on = !self.heartbeat_on;
            io.heartbeat(self.heartbeat_on);
        }

        // keep external outputs disabled while the host is away, so chips
        // on a separate supply can't see spurious levels
        let connected = io.connected();
        if connected != self.outputs_enabled {
            io.set_outputs_enabled(connected);
            self.outputs_enabled = connected;
            if connected {
                self.ports.refresh_all(now, io);
            }
        }

        // delayed reboot from a save command
        if let Some(t) = self.reboot_at {
            if now.wrapping_sub(t) < 0x8000_0000 && io.power_status_allows_reboot() {
                self.reboot_at = None;
                io.reboot();
            }
        }

        // USB connection watchdog
        let timeout = self.cfg.disconnect_reboot_timeout as u32;
        if timeout > 0
            && !connected
            && now.wrapping_sub(self.last_tx_ok_t) >= timeout * 1_000_000
            && io.power_status_allows_reboot()
        {
            io.reboot();
        }
    }

    fn tick_pixel_dump<IO: CabinetIo>(&mut self, io: &mut IO) {
        let dump = match &mut self.pixel_dump {
            Some(d) => d,
            None => return,
        };

        if dump.stage == 0 {
            let stride = if dump.low_res {
                (self.sensor.npix() / 160).max(1) as u16
            } else {
                1
            };
            loop {
                let row = {
                    let pixels = match self.sensor.pixels() {
                        Some(p) => p,
                        None => {
                            dump.stage = 1;
                            break;
                        }
                    };
                    let mut row = [0u8; report::PIXELS_PER_REPORT];
                    let base = dump.next as usize;
                    let mut n = 0;
                    while n < row.len() {
                        let src = (base + n) * stride as usize;
                        if src >= pixels.len() {
                            break;
                        }
                        row[n] = pixels[src];
                        n += 1;
                    }
                    if n == 0 {
                        dump.stage = 1;
                        break;
                    }
                    report::pixel_row(dump.next, &row[..n])
                };
                if !io.send(&row) {
                    return;
                }
                dump.next += report::PIXELS_PER_REPORT as u16;
            }
        }

        if dump.stage == 1 {
            let r = report::pixel_trailer_stats(
                self.sensor.last_edge(),
                self.sensor.reversed_orientation(),
                self.sensor.avg_cycle_time_us(),
                0,
            );
            if !io.send(&r) {
                return;
            }
            dump.stage = 2;
        }

        let r = report::pixel_trailer_cal(&self.reader.calibration());
        if io.send(&r) {
            self.sensor.hold_frame(false);
            self.pixel_dump = None;
        }
    }
}

/// Map a device-frame accelerometer reading into the cabinet frame for
/// the configured mounting orientation.
fn orient(orientation: u8, x: i16, y: i16) -> (i16, i16) {
    match orientation {
        1 => (y, x.saturating_neg()),
        2 => (y.saturating_neg(), x),
        3 => (x.saturating_neg(), y.saturating_neg()),
        _ => (x, y),
    }
}
