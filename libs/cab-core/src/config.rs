//! Persistent configuration
//!
//! An in-memory image of the flash-resident settings record. Read-mostly:
//! the dispatcher rewrites fields when the host sends set-variable
//! messages, and the image goes back to flash only on an explicit save
//! command. Everything that shapes the port stack or the button table is
//! only consulted at boot; changing those requires a save and reboot.

/// A GPIO pin identity on the wire: `(port << 5) | pin`, with `0xFF`
/// meaning not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinId(pub u8);

impl PinId {
    pub const NC: PinId = PinId(0xFF);

    pub fn is_connected(self) -> bool {
        self.0 != 0xFF
    }

    /// GPIO port index (A=0 .. E=4).
    pub fn port(self) -> u8 {
        self.0 >> 5
    }

    pub fn pin(self) -> u8 {
        self.0 & 0x1F
    }
}

impl Default for PinId {
    fn default() -> Self {
        PinId::NC
    }
}

pub const MAX_OUT_PORTS: usize = 128;
pub const MAX_BUTTONS: usize = 32;
pub const MAX_IR_CODES: usize = 16;

/// Output port types on the wire.
pub mod port_type {
    pub const DISABLED: u8 = 0;
    pub const GPIO_PWM: u8 = 1;
    pub const GPIO_DIGITAL: u8 = 2;
    pub const TLC5940: u8 = 3;
    pub const HC595: u8 = 4;
    pub const VIRTUAL: u8 = 5;
    pub const TLC59116: u8 = 6;
}

/// Output port flag bits on the wire.
pub mod port_flags {
    /// Active-high wiring: 0V on the pin turns the device on.
    pub const ACTIVE_LOW: u8 = 0x01;
    /// Noisemaker; muted in night mode.
    pub const NOISY: u8 = 0x02;
    /// Gamma-correct the level.
    pub const GAMMA: u8 = 0x04;
    /// Flipper logic; the params byte carries the timing.
    pub const FLIPPER_LOGIC: u8 = 0x08;
    /// Chime logic; the params byte carries the min/max window.
    pub const CHIME_LOGIC: u8 = 0x10;
    /// Night-mode indicator lamp.
    pub const NIGHT_INDICATOR: u8 = 0x20;
}

/// Button key types on the wire.
pub mod key_type {
    pub const NONE: u8 = 0;
    pub const JOYSTICK: u8 = 1;
    pub const KEYBOARD: u8 = 2;
    pub const MODIFIER: u8 = 3;
    pub const MEDIA: u8 = 4;
    pub const SPECIAL: u8 = 5;
}

/// Special button codes (key type [`key_type::SPECIAL`]).
pub mod special_key {
    /// Night mode toggle, momentary pushbutton.
    pub const NIGHT_TOGGLE: u8 = 1;
    /// Night mode on/off, toggle switch.
    pub const NIGHT_SWITCH: u8 = 2;
}

/// One key assignment: a type code plus a type-specific value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyAssign {
    pub typ: u8,
    pub val: u8,
}

impl KeyAssign {
    pub fn is_some(self) -> bool {
        self.typ != key_type::NONE
    }
}

/// One physical button slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonCfg {
    pub pin: PinId,
    pub key: KeyAssign,
    /// Bit 0x01: pulse mode.
    pub flags: u8,
    /// IR command slot to transmit on press (1-based, 0 = none).
    pub ir_cmd: u8,
    /// Meaning while the shift button is held.
    pub shifted: KeyAssign,
    pub shifted_ir: u8,
}

impl ButtonCfg {
    pub const FLAG_PULSE: u8 = 0x01;
}

/// One output port slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortCfg {
    pub typ: u8,
    /// Pin ID for GPIO types, channel/bit index for the chip chains.
    pub pin: u8,
    pub flags: u8,
    /// Flipper/chime parameter byte.
    pub params: u8,
}

/// Plunger calibration results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Sensor reading at the rest position.
    pub zero: u16,
    /// Sensor reading at maximum retraction.
    pub max: u16,
    /// Measured release travel time, milliseconds.
    pub release_time_ms: u8,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            zero: 65535 / 6,
            max: 65535,
            release_time_ms: 65,
        }
    }
}

/// Plunger sensor types on the wire.
pub mod sensor_type {
    pub const NONE: u8 = 0;
    pub const TSL1410R: u8 = 1;
    pub const TSL1412S: u8 = 3;
    pub const POT: u8 = 5;
    pub const TCD1103: u8 = 8;
}

#[derive(Debug, Clone, Copy)]
pub struct PlungerCfg {
    /// Master enable; clearing it turns the device into an output-only
    /// unit even with a sensor configured.
    pub enabled: bool,
    pub sensor_type: u8,
    pub pins: [PinId; 4],
    pub cal_button: PinId,
    pub cal_lamp: PinId,
    pub cal: Calibration,
    pub zb: ZbLaunchCfg,
}

impl Default for PlungerCfg {
    fn default() -> Self {
        PlungerCfg {
            enabled: true,
            sensor_type: 0,
            pins: [PinId::NC; 4],
            cal_button: PinId::NC,
            cal_lamp: PinId::NC,
            cal: Calibration::default(),
            zb: ZbLaunchCfg::default(),
        }
    }
}

/// ZB Launch Ball: a DOF output port signals that the running table wants
/// a launch button instead of an analog plunger.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZbLaunchCfg {
    /// Output port number carrying the signal (1-based, 0 = feature off).
    pub port: u8,
    /// Button slot to press (1-based).
    pub btn: u8,
    /// Forward push distance that also fires the button, in 1/1000".
    pub push_distance: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TvOnCfg {
    pub status_pin: PinId,
    pub latch_pin: PinId,
    pub relay_pin: PinId,
    /// Power-on to relay-pulse delay, in 10ms units.
    pub delay_time: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Tlc5940Cfg {
    pub nchips: u8,
    pub sin: PinId,
    pub sclk: PinId,
    pub xlat: PinId,
    pub blank: PinId,
    pub gsclk: PinId,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Hc595Cfg {
    pub nchips: u8,
    pub sin: PinId,
    pub sclk: PinId,
    pub latch: PinId,
    pub ena: PinId,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Tlc59116Cfg {
    /// Population mask over the 16 bus addresses.
    pub chip_mask: u16,
    pub sda: PinId,
    pub scl: PinId,
    pub reset: PinId,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NightModeCfg {
    /// Button slot controlling night mode (1-based, 0 = none).
    pub btn: u8,
    /// Bit 0x01: the button is a toggle switch rather than a momentary
    /// pushbutton. Bit 0x02: the button only acts while shifted.
    pub flags: u8,
    /// Output port of the indicator lamp (1-based, 0 = none).
    pub port: u8,
}

impl NightModeCfg {
    pub const FLAG_SWITCH: u8 = 0x01;
    pub const FLAG_SHIFTED: u8 = 0x02;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftButtonCfg {
    /// Button slot acting as the shift button (1-based, 0 = none).
    pub btn: u8,
    /// 0 = shift-or-key (the button's own key fires only on an unused
    /// hold), 1 = shift-and-key (the key always fires).
    pub mode: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IrCfg {
    pub sensor_pin: PinId,
    pub emitter_pin: PinId,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IrCommand {
    pub protocol: u8,
    /// Bit 0x01: transmit as part of the TV-ON sequence.
    pub flags: u8,
    pub code: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccelCfg {
    /// Mounting orientation: 0 ports-at-front, 1 left, 2 right, 3 rear.
    pub orientation: u8,
    /// Dynamic range selector for the accelerometer driver.
    pub range: u8,
    /// Auto-centering interval selector.
    pub auto_center: u8,
}

/// Expansion board population, kept for the config tool's benefit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpansionCfg {
    pub n_main: u8,
    pub n_power: u8,
    pub n_chime: u8,
}

/// The whole persistent configuration image.
#[derive(Debug, Clone)]
pub struct Config {
    pub usb_vendor_id: u16,
    pub usb_product_id: u16,
    /// Nominal unit number, 1..16. Reported to the host zero-based.
    pub unit_no: u8,
    pub joystick_enabled: bool,
    /// Joystick report cadence, milliseconds.
    pub report_interval_ms: u8,
    /// Reboot when the USB connection has been down this many seconds;
    /// 0 disables the watchdog.
    pub disconnect_reboot_timeout: u8,
    pub accel: AccelCfg,
    pub plunger: PlungerCfg,
    pub tv_on: TvOnCfg,
    pub tlc5940: Tlc5940Cfg,
    pub hc595: Hc595Cfg,
    pub tlc59116: Tlc59116Cfg,
    pub night_mode: NightModeCfg,
    pub shift_button: ShiftButtonCfg,
    pub ir: IrCfg,
    pub ir_commands: [IrCommand; MAX_IR_CODES],
    pub expansion: ExpansionCfg,
    pub buttons: [ButtonCfg; MAX_BUTTONS],
    pub ports: [PortCfg; MAX_OUT_PORTS],
    /// Set once the host has sent any configuration at all; reported in
    /// the config query reply so the setup tool can tell a factory-fresh
    /// device from a configured one.
    pub host_configured: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            // LedWiz-compatible identity so legacy host software finds us
            usb_vendor_id: 0xFAFA,
            usb_product_id: 0x00F0,
            unit_no: 8,
            joystick_enabled: true,
            report_interval_ms: 10,
            disconnect_reboot_timeout: 0,
            accel: AccelCfg::default(),
            plunger: PlungerCfg::default(),
            tv_on: TvOnCfg::default(),
            tlc5940: Tlc5940Cfg::default(),
            hc595: Hc595Cfg::default(),
            tlc59116: Tlc59116Cfg::default(),
            night_mode: NightModeCfg::default(),
            shift_button: ShiftButtonCfg::default(),
            ir: IrCfg::default(),
            ir_commands: [IrCommand::default(); MAX_IR_CODES],
            expansion: ExpansionCfg::default(),
            buttons: [ButtonCfg::default(); MAX_BUTTONS],
            ports: [PortCfg::default(); MAX_OUT_PORTS],
            host_configured: false,
        }
    }
}

impl Config {
    /// Number of ports visible to the host: everything up to the first
    /// disabled slot.
    pub fn visible_ports(&self) -> usize {
        self.ports
            .iter()
            .position(|p| p.typ == port_type::DISABLED)
            .unwrap_or(MAX_OUT_PORTS)
    }
}

/// Signature at the head of the host-patchable setup blob baked into the
/// firmware image. The download tool may overwrite the blob in the binary
/// before flashing; at boot, if there is no saved configuration record,
/// the blob's payload is replayed as set-variable messages.
pub const SETUP_BLOB_SIGNATURE: &[u8; 32] = b"**CAB-IO.FACTORY.SETUP.MSGS***\x00\x00";

/// Replay a setup blob onto `cfg`. The payload is a stream of 8-byte
/// set-variable messages; anything that is not one is skipped.
pub fn apply_setup_blob(cfg: &mut Config, blob: &[u8]) -> bool {
    if blob.len() < 34 || &blob[..32] != SETUP_BLOB_SIGNATURE {
        return false;
    }
    let len = u16::from_le_bytes([blob[32], blob[33]]) as usize;
    let payload = match blob.get(34..34 + len) {
        Some(p) => p,
        None => return false,
    };
    for msg in payload.chunks_exact(8) {
        if msg[0] == 66 {
            let mut m = [0u8; 8];
            m.copy_from_slice(msg);
            crate::cfgvar::set_var(cfg, &m);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_id_fields() {
        let p = PinId(2 << 5 | 13); // PTC13
        assert_eq!(p.port(), 2);
        assert_eq!(p.pin(), 13);
        assert!(p.is_connected());
        assert!(!PinId::NC.is_connected());
    }

    #[test]
    fn visible_ports_stop_at_first_disabled() {
        let mut cfg = Config::default();
        assert_eq!(cfg.visible_ports(), 0);
        for i in 0..10 {
            cfg.ports[i].typ = port_type::VIRTUAL;
        }
        // a configured port after a disabled one stays invisible
        cfg.ports[12].typ = port_type::VIRTUAL;
        assert_eq!(cfg.visible_ports(), 10);
    }

    #[test]
    fn setup_blob_replays_messages() {
        let mut blob = [0u8; 32 + 2 + 16];
        blob[..32].copy_from_slice(SETUP_BLOB_SIGNATURE);
        blob[32..34].copy_from_slice(&16u16.to_le_bytes());
        // var 2: unit number 3
        blob[34..42].copy_from_slice(&[66, 2, 3, 0, 0, 0, 0, 0]);
        // var 14: disconnect reboot timeout 10s
        blob[42..50].copy_from_slice(&[66, 14, 10, 0, 0, 0, 0, 0]);

        let mut cfg = Config::default();
        assert!(apply_setup_blob(&mut cfg, &blob));
        assert_eq!(cfg.unit_no, 3);
        assert_eq!(cfg.disconnect_reboot_timeout, 10);
    }

    #[test]
    fn setup_blob_rejects_bad_signature() {
        let mut cfg = Config::default();
        assert!(!apply_setup_blob(&mut cfg, b"not a setup blob"));
    }
}
