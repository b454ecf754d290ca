//! Configuration variable map
//!
//! One declarative table drives both directions of the variable protocol:
//! host-to-device SET (message type 66) and device-to-host GET (the
//! query-variable control request). The table is expanded twice, once into
//! [`set_var`] and once into [`get_var`], so the two functions cannot
//! drift apart in variable IDs, field types or byte offsets.
//!
//! For array variables (buttons, output ports, IR command slots) the third
//! message byte selects the 1-based element index; out-of-range indices
//! are ignored. Unknown variable IDs are ignored entirely. SET only
//! touches the RAM image; persisting it is a separate explicit command.

use crate::config::{Config, PinId};

macro_rules! set_field {
    ($cfg:ident, $data:ident, $idx:ident, byte($($p:ident).+, $off:literal)) => {
        $cfg.$($p).+ = $data[$off];
    };
    ($cfg:ident, $data:ident, $idx:ident, byte_range($($p:ident).+, $off:literal, $lo:literal, $hi:literal)) => {
        if $data[$off] >= $lo && $data[$off] <= $hi {
            $cfg.$($p).+ = $data[$off];
        }
    };
    ($cfg:ident, $data:ident, $idx:ident, boolb($($p:ident).+, $off:literal)) => {
        $cfg.$($p).+ = $data[$off] != 0;
    };
    ($cfg:ident, $data:ident, $idx:ident, ui16($($p:ident).+, $off:literal)) => {
        $cfg.$($p).+ = u16::from_le_bytes([$data[$off], $data[$off + 1]]);
    };
    ($cfg:ident, $data:ident, $idx:ident, pin($($p:ident).+, $off:literal)) => {
        $cfg.$($p).+ = PinId($data[$off]);
    };
    ($cfg:ident, $data:ident, $idx:ident, pinn($($p:ident).+, $i:literal, $off:literal)) => {
        $cfg.$($p).+[$i] = PinId($data[$off]);
    };
    ($cfg:ident, $data:ident, $idx:ident, ibyte($arr:ident, $($p:ident).+, $off:literal)) => {
        if $idx >= 1 && $idx <= $cfg.$arr.len() {
            $cfg.$arr[$idx - 1].$($p).+ = $data[$off];
        }
    };
    ($cfg:ident, $data:ident, $idx:ident, ipin($arr:ident, $($p:ident).+, $off:literal)) => {
        if $idx >= 1 && $idx <= $cfg.$arr.len() {
            $cfg.$arr[$idx - 1].$($p).+ = PinId($data[$off]);
        }
    };
    ($cfg:ident, $data:ident, $idx:ident, iui32($arr:ident, $($p:ident).+, $off:literal)) => {
        if $idx >= 1 && $idx <= $cfg.$arr.len() {
            $cfg.$arr[$idx - 1].$($p).+ = u32::from_le_bytes([
                $data[$off],
                $data[$off + 1],
                $data[$off + 2],
                $data[$off + 3],
            ]);
        }
    };
}

macro_rules! get_field {
    ($cfg:ident, $data:ident, $idx:ident, byte($($p:ident).+, $off:literal)) => {
        $data[$off] = $cfg.$($p).+;
    };
    ($cfg:ident, $data:ident, $idx:ident, byte_range($($p:ident).+, $off:literal, $lo:literal, $hi:literal)) => {
        $data[$off] = $cfg.$($p).+;
    };
    ($cfg:ident, $data:ident, $idx:ident, boolb($($p:ident).+, $off:literal)) => {
        $data[$off] = $cfg.$($p).+ as u8;
    };
    ($cfg:ident, $data:ident, $idx:ident, ui16($($p:ident).+, $off:literal)) => {
        let v = $cfg.$($p).+.to_le_bytes();
        $data[$off] = v[0];
        $data[$off + 1] = v[1];
    };
    ($cfg:ident, $data:ident, $idx:ident, pin($($p:ident).+, $off:literal)) => {
        $data[$off] = $cfg.$($p).+.0;
    };
    ($cfg:ident, $data:ident, $idx:ident, pinn($($p:ident).+, $i:literal, $off:literal)) => {
        $data[$off] = $cfg.$($p).+[$i].0;
    };
    ($cfg:ident, $data:ident, $idx:ident, ibyte($arr:ident, $($p:ident).+, $off:literal)) => {
        if $idx >= 1 && $idx <= $cfg.$arr.len() {
            $data[$off] = $cfg.$arr[$idx - 1].$($p).+;
        }
    };
    ($cfg:ident, $data:ident, $idx:ident, ipin($arr:ident, $($p:ident).+, $off:literal)) => {
        if $idx >= 1 && $idx <= $cfg.$arr.len() {
            $data[$off] = $cfg.$arr[$idx - 1].$($p).+.0;
        }
    };
    ($cfg:ident, $data:ident, $idx:ident, iui32($arr:ident, $($p:ident).+, $off:literal)) => {
        if $idx >= 1 && $idx <= $cfg.$arr.len() {
            let v = $cfg.$arr[$idx - 1].$($p).+.to_le_bytes();
            $data[$off] = v[0];
            $data[$off + 1] = v[1];
            $data[$off + 2] = v[2];
            $data[$off + 3] = v[3];
        }
    };
}

macro_rules! gen_set {
    ($( $id:literal => { $( $kind:ident($($args:tt)*); )* } )*) => {
        /// Apply one set-variable message to the RAM configuration.
        pub fn set_var(cfg: &mut Config, data: &[u8; 8]) {
            let idx = data[2] as usize;
            let _ = idx;
            match data[1] {
                $(
                    $id => {
                        $( set_field!(cfg, data, idx, $kind($($args)*)); )*
                        cfg.host_configured = true;
                    }
                )*
                _ => {}
            }
        }
    };
}

macro_rules! gen_get {
    ($( $id:literal => { $( $kind:ident($($args:tt)*); )* } )*) => {
        /// Encode one variable's current value into a query reply buffer.
        /// The caller fills `data[1]` with the variable ID and, for array
        /// variables, `data[2]` with the element index.
        pub fn get_var(cfg: &Config, data: &mut [u8; 8]) {
            let idx = data[2] as usize;
            let _ = idx;
            match data[1] {
                $(
                    $id => {
                        $( get_field!(cfg, data, idx, $kind($($args)*)); )*
                    }
                )*
                _ => {}
            }
        }
    };
}

macro_rules! for_each_var {
    ($receiver:ident) => {
        $receiver! {
            1 => {
                ui16(usb_vendor_id, 2);
                ui16(usb_product_id, 4);
            }
            2 => {
                byte_range(unit_no, 2, 1, 16);
            }
            3 => {
                boolb(joystick_enabled, 2);
            }
            4 => {
                byte(accel.orientation, 2);
            }
            5 => {
                byte(plunger.sensor_type, 2);
            }
            6 => {
                pinn(plunger.pins, 0, 2);
                pinn(plunger.pins, 1, 3);
                pinn(plunger.pins, 2, 4);
                pinn(plunger.pins, 3, 5);
            }
            7 => {
                pin(plunger.cal_button, 2);
                pin(plunger.cal_lamp, 3);
            }
            8 => {
                byte(plunger.zb.port, 2);
                byte(plunger.zb.btn, 3);
                ui16(plunger.zb.push_distance, 4);
            }
            9 => {
                pin(tv_on.status_pin, 2);
                pin(tv_on.latch_pin, 3);
                pin(tv_on.relay_pin, 4);
                ui16(tv_on.delay_time, 5);
            }
            10 => {
                byte(tlc5940.nchips, 2);
                pin(tlc5940.sin, 3);
                pin(tlc5940.sclk, 4);
                pin(tlc5940.xlat, 5);
                pin(tlc5940.blank, 6);
                pin(tlc5940.gsclk, 7);
            }
            11 => {
                byte(hc595.nchips, 2);
                pin(hc595.sin, 3);
                pin(hc595.sclk, 4);
                pin(hc595.latch, 5);
                pin(hc595.ena, 6);
            }
            12 => {
                ipin(buttons, pin, 3);
                ibyte(buttons, key.typ, 4);
                ibyte(buttons, key.val, 5);
                ibyte(buttons, flags, 6);
                ibyte(buttons, ir_cmd, 7);
            }
            13 => {
                ibyte(ports, typ, 3);
                ibyte(ports, pin, 4);
                ibyte(ports, flags, 5);
                ibyte(ports, params, 6);
            }
            14 => {
                byte(disconnect_reboot_timeout, 2);
            }
            15 => {
                ui16(plunger.cal.zero, 2);
                ui16(plunger.cal.max, 4);
                byte(plunger.cal.release_time_ms, 6);
            }
            16 => {
                byte(expansion.n_main, 2);
                byte(expansion.n_power, 3);
                byte(expansion.n_chime, 4);
            }
            17 => {
                byte(night_mode.btn, 2);
                byte(night_mode.flags, 3);
                byte(night_mode.port, 4);
            }
            18 => {
                byte(shift_button.btn, 2);
                byte(shift_button.mode, 3);
            }
            19 => {
                pin(ir.sensor_pin, 2);
                pin(ir.emitter_pin, 3);
            }
            20 => {
                ibyte(ir_commands, protocol, 3);
                ibyte(ir_commands, flags, 4);
            }
            21 => {
                iui32(ir_commands, code, 3);
            }
            22 => {
                ui16(tlc59116.chip_mask, 2);
                pin(tlc59116.sda, 4);
                pin(tlc59116.scl, 5);
                pin(tlc59116.reset, 6);
            }
            23 => {
                byte(accel.range, 2);
                byte(accel.auto_center, 3);
            }
            24 => {
                ibyte(buttons, shifted.typ, 3);
                ibyte(buttons, shifted.val, 4);
                ibyte(buttons, shifted_ir, 5);
            }
            25 => {
                byte(report_interval_ms, 2);
            }
        }
    };
}

for_each_var!(gen_set);
for_each_var!(gen_get);

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(cfg: &Config, id: u8, idx: u8) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = 65;
        out[1] = id;
        out[2] = idx;
        get_var(cfg, &mut out);
        out
    }

    #[test]
    fn scalar_roundtrip() {
        let mut cfg = Config::default();
        set_var(&mut cfg, &[66, 1, 0x09, 0x12, 0xEA, 0xEA, 0, 0]);
        assert_eq!(cfg.usb_vendor_id, 0x1209);
        assert_eq!(cfg.usb_product_id, 0xEAEA);
        let r = roundtrip(&cfg, 1, 0);
        assert_eq!(&r[2..6], &[0x09, 0x12, 0xEA, 0xEA]);
    }

    #[test]
    fn unit_number_validated() {
        let mut cfg = Config::default();
        set_var(&mut cfg, &[66, 2, 0, 0, 0, 0, 0, 0]);
        assert_eq!(cfg.unit_no, 8); // out of range, unchanged
        set_var(&mut cfg, &[66, 2, 16, 0, 0, 0, 0, 0]);
        assert_eq!(cfg.unit_no, 16);
    }

    #[test]
    fn button_slot_roundtrip() {
        let mut cfg = Config::default();
        // button 5: pin PTC4, keyboard key 0x28, pulse mode, IR slot 2
        set_var(&mut cfg, &[66, 12, 5, (2 << 5) | 4, 2, 0x28, 0x01, 2]);
        let b = &cfg.buttons[4];
        assert_eq!(b.pin.0, (2 << 5) | 4);
        assert_eq!(b.key.typ, 2);
        assert_eq!(b.key.val, 0x28);
        assert_eq!(b.flags, 0x01);
        assert_eq!(b.ir_cmd, 2);

        let r = roundtrip(&cfg, 12, 5);
        assert_eq!(&r[3..8], &[(2 << 5) | 4, 2, 0x28, 0x01, 2]);
    }

    #[test]
    fn out_of_range_index_ignored() {
        let mut cfg = Config::default();
        set_var(&mut cfg, &[66, 12, 0, 1, 2, 3, 4, 5]);
        set_var(&mut cfg, &[66, 12, 33, 1, 2, 3, 4, 5]);
        assert!(cfg.buttons.iter().all(|b| b.key.typ == 0));
    }

    #[test]
    fn unknown_variable_ignored() {
        let mut cfg = Config::default();
        set_var(&mut cfg, &[66, 99, 1, 2, 3, 4, 5, 6]);
        assert!(!cfg.host_configured);
    }

    #[test]
    fn ir_code_spans_two_variables() {
        let mut cfg = Config::default();
        set_var(&mut cfg, &[66, 20, 1, 2, 0x01, 0, 0, 0]);
        set_var(&mut cfg, &[66, 21, 1, 0x78, 0x56, 0x34, 0x12, 0]);
        assert_eq!(cfg.ir_commands[0].protocol, 2);
        assert_eq!(cfg.ir_commands[0].flags, 0x01);
        assert_eq!(cfg.ir_commands[0].code, 0x12345678);
    }

    #[test]
    fn calibration_roundtrip() {
        let mut cfg = Config::default();
        set_var(&mut cfg, &[66, 15, 0x10, 0x27, 0x60, 0xEA, 70, 0]);
        assert_eq!(cfg.plunger.cal.zero, 10000);
        assert_eq!(cfg.plunger.cal.max, 60000);
        assert_eq!(cfg.plunger.cal.release_time_ms, 70);
        let r = roundtrip(&cfg, 15, 0);
        assert_eq!(&r[2..7], &[0x10, 0x27, 0x60, 0xEA, 70]);
    }
}
