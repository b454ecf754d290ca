//! Host command dispatch
//!
//! Host-to-device traffic is always an 8-byte output report. The first
//! byte routes it: the legacy LedWiz messages (SBA on/off banks, PBA
//! profile bytes where the first byte is itself a profile value), our
//! extended bank messages (SBX/PBX) that reach ports past the first 32,
//! the vendor control message (65) with its subtype byte, set-variable
//! (66), and the bulk brightness range 200..228. Anything malformed is
//! normalized where a sensible reading exists and otherwise dropped;
//! nothing the host sends is fatal.

use crate::cfgvar;
use crate::config::sensor_type;
use crate::ledwiz::{BANK_SIZE, DEFAULT_SPEED, NUM_BANKS};
use crate::mainloop::{CabinetIo, Core, PixelDump};
use crate::report;
use crate::sensor::PlungerSensor;

/// Vendor control subtypes (message type 65).
mod control {
    pub const NOP: u8 = 0;
    pub const SET_UNIT: u8 = 1;
    pub const CALIBRATE: u8 = 2;
    pub const PIXEL_DUMP: u8 = 3;
    pub const QUERY_CONFIG: u8 = 4;
    pub const ALL_OFF: u8 = 5;
    pub const SAVE_CONFIG: u8 = 6;
    pub const QUERY_DEVICE_ID: u8 = 7;
    pub const NIGHT_MODE: u8 = 8;
    pub const QUERY_VARIABLE: u8 = 9;
    pub const TV_RELAY: u8 = 11;
    pub const IR_LEARN: u8 = 12;
    pub const BUTTON_STATUS: u8 = 13;
}

/// Seconds before the post-save reboot when none is given explicitly.
const SET_UNIT_REBOOT_DELAY_S: u32 = 2;
/// IR learning window.
const IR_LEARN_WINDOW_US: u32 = 10_000_000;

fn valid_profile(v: u8) -> u8 {
    if v <= 49 || (129..=132).contains(&v) {
        v
    } else {
        48
    }
}

fn clamp_speed(s: u8) -> u8 {
    if s < 1 {
        1
    } else if s > 7 {
        7
    } else {
        s
    }
}

impl<S: PlungerSensor> Core<S> {
    /// Decode and apply one host message.
    pub fn handle_message<IO: CabinetIo>(&mut self, msg: &[u8; 8], io: &mut IO) {
        let now = io.now_us();
        match msg[0] {
            64 => self.on_sba(0, [msg[1], msg[2], msg[3], msg[4]], msg[5], now, io),
            65 => self.on_control(msg, now, io),
            66 => {
                cfgvar::set_var(&mut self.cfg, msg);
                self.on_var_changed(msg[1]);
            }
            // SBX: an SBA for port group n (final byte)
            67 => self.on_sba(msg[6] as usize, [msg[1], msg[2], msg[3], msg[4]], msg[5], now, io),
            68 => self.on_pbx(msg, now, io),
            200..=228 => self.on_bulk_brightness(msg, now, io),
            // anything else in the profile-value space is a PBA
            _ => self.on_pba(msg, now, io),
        }
    }

    fn on_sba<IO: CabinetIo>(
        &mut self,
        group: usize,
        mask: [u8; 4],
        speed: u8,
        now: u32,
        io: &mut IO,
    ) {
        if group >= NUM_BANKS {
            return;
        }
        self.lw.speed[group] = clamp_speed(speed);
        let base = group * BANK_SIZE;
        for bit in 0..BANK_SIZE {
            let port = base + bit;
            self.lw.on[port] = mask[bit / 8] & (1 << (bit % 8)) != 0;
            self.lw.apply(port, now, &mut self.ports, io);
        }
        self.lw.pba_idx = 0;
    }

    fn on_pba<IO: CabinetIo>(&mut self, msg: &[u8; 8], now: u32, io: &mut IO) {
        let base = self.lw.pba_idx as usize;
        for (i, &raw) in msg.iter().enumerate() {
            let port = base + i;
            self.lw.val[port] = valid_profile(raw);
            self.lw.apply(port, now, &mut self.ports, io);
        }
        self.lw.pba_idx = ((base + 8) % BANK_SIZE) as u8;
    }

    fn on_pbx<IO: CabinetIo>(&mut self, msg: &[u8; 8], now: u32, io: &mut IO) {
        let group = msg[1] as usize;
        let base = group * 8;
        if base + 8 > crate::config::MAX_OUT_PORTS {
            return;
        }
        // bytes 2..8 pack eight 6-bit values little-endian
        let mut packed = 0u64;
        for (i, &b) in msg[2..8].iter().enumerate() {
            packed |= (b as u64) << (8 * i);
        }
        for i in 0..8 {
            let v6 = ((packed >> (6 * i)) & 0x3F) as u8;
            // 60..63 select the flash modes; the rest is a profile value
            let val = if v6 >= 60 { v6 - 60 + 129 } else { valid_profile(v6) };
            self.lw.val[base + i] = val;
            self.lw.apply(base + i, now, &mut self.ports, io);
        }
        // unlike PBA, the cursor is untouched: PBX addresses its group
        // explicitly
    }

    fn on_bulk_brightness<IO: CabinetIo>(&mut self, msg: &[u8; 8], now: u32, io: &mut IO) {
        let base = (msg[0] - 200) as usize * 7;
        for (i, &level) in msg[1..8].iter().enumerate() {
            let port = base + i;
            if port >= crate::config::MAX_OUT_PORTS {
                break;
            }
            self.ports.set(port, level, now, io);
            // keep the LedWiz view coherent so a later SBA/PBA behaves as
            // if this level had been set through a profile
            self.lw.on[port] = level != 0;
            self.lw.val[port] = (level as u16 * 48 / 255) as u8;
        }
    }

    fn on_control<IO: CabinetIo>(&mut self, msg: &[u8; 8], now: u32, io: &mut IO) {
        match msg[1] {
            control::NOP => {}
            control::SET_UNIT => {
                let unit = msg[2] & 0x0F;
                self.cfg.unit_no = unit + 1;
                self.cfg.plunger.enabled = msg[3] != 0;
                self.plunger_enabled =
                    self.cfg.plunger.enabled && self.cfg.plunger.sensor_type != sensor_type::NONE;
                if io.save_config(&self.cfg) {
                    self.last_save_ok_t = Some(now);
                    self.reboot_at = Some(now.wrapping_add(SET_UNIT_REBOOT_DELAY_S * 1_000_000));
                } else {
                    self.save_failed = true;
                }
            }
            control::CALIBRATE => {
                self.reader.begin_calibration(now);
            }
            control::PIXEL_DUMP => {
                if self.plunger_enabled {
                    let extra_us = msg[3] as u32 * 100;
                    if extra_us > 0 {
                        self.sensor.set_extra_integration_time(extra_us);
                    }
                    self.sensor.hold_frame(true);
                    self.pixel_dump = Some(PixelDump {
                        low_res: msg[2] & 0x01 != 0,
                        next: 0,
                        stage: 0,
                    });
                }
            }
            control::QUERY_CONFIG => {
                let r = report::config_reply(&self.cfg, self.ports.len() as u16);
                self.push_reply(r);
            }
            control::ALL_OFF => {
                self.lw.reset();
                for port in 0..self.ports.len() {
                    self.lw.apply(port, now, &mut self.ports, io);
                }
                debug_assert_eq!(self.lw.speed, [DEFAULT_SPEED; NUM_BANKS]);
            }
            control::SAVE_CONFIG => {
                if io.save_config(&self.cfg) {
                    self.last_save_ok_t = Some(now);
                    let delay_s = msg[2] as u32;
                    if delay_s > 0 {
                        self.reboot_at = Some(now.wrapping_add(delay_s * 1_000_000));
                    }
                } else {
                    // failure: flag it and drop any requested reboot
                    self.save_failed = true;
                    self.reboot_at = None;
                }
            }
            control::QUERY_DEVICE_ID => {
                let id = io.device_id();
                self.push_reply(report::device_id_reply(&id));
            }
            control::NIGHT_MODE => {
                self.ports.set_night_mode(msg[2] != 0, now, io);
            }
            control::QUERY_VARIABLE => {
                let r = report::config_var_reply(&self.cfg, msg[2], msg[3]);
                self.push_reply(r);
            }
            control::TV_RELAY => {
                io.tv_relay(msg[2]);
            }
            control::IR_LEARN => {
                io.ir_begin_learning();
                self.ir_learning_until = Some(now.wrapping_add(IR_LEARN_WINDOW_US));
            }
            control::BUTTON_STATUS => {
                let mut states = 0u32;
                for slot in 1..=32u8 {
                    if self.buttons.logical(slot) {
                        states |= 1 << (slot - 1);
                    }
                }
                self.push_reply(report::button_status_reply(32, states));
            }
            _ => {
                log::warn!("unknown control subtype {}", msg[1]);
            }
        }
    }

    fn on_var_changed(&mut self, var_id: u8) {
        if var_id == 15 {
            self.reader.set_calibration(self.cfg.plunger.cal);
        }
        self.sensor.on_config_change(var_id, &self.cfg);
    }

    fn push_reply(&mut self, r: report::Report) {
        // a full queue means the host is spamming queries faster than it
        // drains replies; dropping the oldest keeps the newest answer
        if self.pending_replies.is_full() {
            self.pending_replies.pop_front();
        }
        let _ = self.pending_replies.push_back(r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledwiz::LW_TO_DOF;
    use crate::plunger::JOYMAX;
    use crate::testutil::{core_with_ports, Rig};

    #[test]
    fn sba_then_pba_ledwiz_roundtrip() {
        let mut core = core_with_ports(32);
        let mut rig = Rig::new();

        // SBA: ports 1..8 on, speed 2
        core.handle_message(&[0x40, 0xFF, 0x00, 0x00, 0x00, 0x02, 0, 0], &mut rig);
        assert_eq!(core.lw.pba_idx, 0);
        assert_eq!(core.lw.speed[0], 2);

        // PBA: 8 bytes of profile 16
        core.handle_message(&[0x10; 8], &mut rig);
        for i in 0..8 {
            assert_eq!(rig.levels[i], LW_TO_DOF[16]);
            assert_eq!(rig.levels[i], 85);
        }
        assert_eq!(core.lw.pba_idx, 8);

        // three more PBAs wrap the cursor
        core.handle_message(&[0; 8], &mut rig);
        core.handle_message(&[0; 8], &mut rig);
        core.handle_message(&[0; 8], &mut rig);
        assert_eq!(core.lw.pba_idx, 0);
    }

    #[test]
    fn sba_resets_pba_cursor() {
        let mut core = core_with_ports(32);
        let mut rig = Rig::new();
        core.handle_message(&[0x10; 8], &mut rig);
        assert_eq!(core.lw.pba_idx, 8);
        core.handle_message(&[0x40, 0, 0, 0, 0, 2, 0, 0], &mut rig);
        assert_eq!(core.lw.pba_idx, 0);
    }

    #[test]
    fn pba_normalizes_reserved_values() {
        let mut core = core_with_ports(32);
        let mut rig = Rig::new();
        core.handle_message(&[0x40, 0xFF, 0, 0, 0, 2, 0, 0], &mut rig);
        // 50 and 133 are reserved; both read as 48
        core.handle_message(&[50, 133, 49, 0, 0, 0, 0, 0], &mut rig);
        assert_eq!(core.lw.val[0], 48);
        assert_eq!(core.lw.val[1], 48);
        assert_eq!(core.lw.val[2], 49);
        assert_eq!(rig.levels[0], 255);
        assert_eq!(rig.levels[2], 255);
    }

    #[test]
    fn sba_speed_clamped() {
        let mut core = core_with_ports(32);
        let mut rig = Rig::new();
        core.handle_message(&[0x40, 0, 0, 0, 0, 0, 0, 0], &mut rig);
        assert_eq!(core.lw.speed[0], 1);
        core.handle_message(&[0x40, 0, 0, 0, 0, 9, 0, 0], &mut rig);
        assert_eq!(core.lw.speed[0], 7);
    }

    #[test]
    fn bulk_brightness_sets_direct_levels() {
        let mut core = core_with_ports(32);
        let mut rig = Rig::new();

        // type 200, payload byte 1 = 255: port 1 full on, 2..7 off
        core.handle_message(&[0xC8, 0xFF, 0, 0, 0, 0, 0, 0], &mut rig);
        assert_eq!(rig.levels[0], 255);
        for i in 1..7 {
            assert_eq!(rig.levels[i], 0);
        }
        // and the LedWiz view tracks it
        assert!(core.lw.on[0]);
        assert_eq!(core.lw.val[0], 48);
        assert!(!core.lw.on[1]);
    }

    #[test]
    fn sbx_reaches_upper_groups() {
        let mut core = core_with_ports(128);
        let mut rig = Rig::new();

        // group 1 (ports 33..64): all on, speed 3
        core.handle_message(&[67, 0xFF, 0xFF, 0xFF, 0xFF, 3, 1, 0], &mut rig);
        assert_eq!(core.lw.speed[1], 3);
        assert!(core.lw.on[32]);
        assert!(!core.lw.on[0]);
        // default profile 48: on ports light fully
        assert_eq!(rig.levels[32], 255);
    }

    #[test]
    fn pbx_unpacks_six_bit_levels() {
        let mut core = core_with_ports(128);
        let mut rig = Rig::new();
        core.handle_message(&[67, 0xFF, 0xFF, 0xFF, 0xFF, 2, 0, 0], &mut rig);

        // group 0, first value 48 (full), second value 60 (flash mode 129)
        let packed: u64 = 48 | (60 << 6);
        let mut msg = [68u8, 0, 0, 0, 0, 0, 0, 0];
        for i in 0..6 {
            msg[2 + i] = (packed >> (8 * i)) as u8;
        }
        core.handle_message(&msg, &mut rig);
        assert_eq!(core.lw.val[0], 48);
        assert_eq!(core.lw.val[1], 129);
        assert_eq!(rig.levels[0], 255);
        // the cursor is not a PBX concern
        assert_eq!(core.lw.pba_idx, 0);
    }

    #[test]
    fn all_off_restores_ledwiz_defaults() {
        let mut core = core_with_ports(32);
        let mut rig = Rig::new();
        core.handle_message(&[0x40, 0xFF, 0xFF, 0xFF, 0xFF, 5, 0, 0], &mut rig);
        core.handle_message(&[0x10; 8], &mut rig);
        core.handle_message(&[65, 5, 0, 0, 0, 0, 0, 0], &mut rig);
        for i in 0..32 {
            assert_eq!(rig.levels[i], 0);
            assert!(!core.lw.on[i]);
            assert_eq!(core.lw.val[i], 48);
        }
        assert_eq!(core.lw.speed[0], 2);
        assert_eq!(core.lw.pba_idx, 0);
    }

    #[test]
    fn save_failure_cancels_reboot_and_flags_status() {
        let mut core = core_with_ports(8);
        let mut rig = Rig::new();
        rig.save_ok = false;
        core.handle_message(&[65, 6, 5, 0, 0, 0, 0, 0], &mut rig);
        assert!(core.save_failed);
        assert_eq!(core.reboot_at, None);
        let status = core.status_byte(rig.now, &mut rig);
        assert_eq!(status & report::status::SAVE_OK, 0);
    }

    #[test]
    fn save_success_sets_status_window_and_reboot() {
        let mut core = core_with_ports(8);
        let mut rig = Rig::new();
        rig.now = 1_000;
        core.handle_message(&[65, 6, 5, 0, 0, 0, 0, 0], &mut rig);
        assert_eq!(rig.saves, 1);
        assert_eq!(core.reboot_at, Some(5_001_000));
        let status = core.status_byte(rig.now, &mut rig);
        assert_ne!(status & report::status::SAVE_OK, 0);
    }

    #[test]
    fn night_mode_command_flips_flag() {
        let mut core = core_with_ports(8);
        let mut rig = Rig::new();
        core.handle_message(&[65, 8, 1, 0, 0, 0, 0, 0], &mut rig);
        assert!(core.ports.night_mode());
        let status = core.status_byte(rig.now, &mut rig);
        assert_ne!(status & report::status::NIGHT_MODE, 0);
        core.handle_message(&[65, 8, 0, 0, 0, 0, 0, 0], &mut rig);
        assert!(!core.ports.night_mode());
    }

    #[test]
    fn queries_enqueue_vendor_replies() {
        let mut core = core_with_ports(8);
        let mut rig = Rig::new();
        core.handle_message(&[65, 4, 0, 0, 0, 0, 0, 0], &mut rig);
        core.handle_message(&[65, 7, 0, 0, 0, 0, 0, 0], &mut rig);
        assert_eq!(core.pending_replies.len(), 2);
        let cfg_reply = core.pending_replies.pop_front().unwrap();
        assert_eq!(cfg_reply[1], 0x88);
        assert_eq!(u16::from_le_bytes([cfg_reply[2], cfg_reply[3]]), 8);
        let id_reply = core.pending_replies.pop_front().unwrap();
        assert_eq!(id_reply[1], 0x90);
        assert_eq!(id_reply[2], 1);
    }

    #[test]
    fn set_variable_updates_live_calibration() {
        let mut core = core_with_ports(8);
        let mut rig = Rig::new();
        core.handle_message(&[66, 15, 0x10, 0x27, 0x60, 0xEA, 70, 0], &mut rig);
        assert_eq!(core.reader.calibration().zero, 10_000);
        assert_eq!(core.reader.calibration().max, 60_000);
    }

    #[test]
    fn tv_relay_command_forwards_mode() {
        let mut core = core_with_ports(8);
        let mut rig = Rig::new();
        core.handle_message(&[65, 11, 2, 0, 0, 0, 0, 0], &mut rig);
        assert_eq!(rig.relay, Some(2));
    }

    #[test]
    fn position_reports_clamp_to_joymax() {
        let core = core_with_ports(8);
        let p = core.reader.position() as i32;
        assert!((-JOYMAX..=JOYMAX).contains(&p));
    }
}
