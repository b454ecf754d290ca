//! Button scanning and HID event synthesis
//!
//! A 1kHz tick samples every configured input pin into a 5-bit rolling
//! history; the debounced physical state only moves when five consecutive
//! samples agree, which rejects anything shorter than 5ms. On top of the
//! physical state sit the logical-state policies:
//!
//! - plain buttons report the physical state directly;
//! - pulse-mode buttons turn each physical edge into a clean 200ms
//!   keystroke with a 200ms guard gap, for latched cabinet switches (a
//!   coin door) whose *changes* are what the host wants to see;
//! - the shift button either always reports its own key (shift-and-key)
//!   or reports it only when released after an unused hold (shift-or-key,
//!   with a 50ms synthetic pulse on release);
//! - virtual buttons have no pin and are pressed by refcount, e.g. by the
//!   plunger's launch-button synthesis.

use crate::config::{
    key_type, special_key, ButtonCfg, Config, KeyAssign, NightModeCfg, PinId, MAX_BUTTONS,
};
use crate::keycodes::{KeyboardReport, MEDIA_BIT};

/// Debounced pulse length and guard gap for pulse-mode buttons.
const PULSE_US: u32 = 200_000;
/// Synthetic key pulse when a shift-or-key shift button is released
/// unused.
const SHIFT_PULSE_US: u32 = 50_000;

/// Reads the raw state of a button input pin; true = pressed. The
/// platform wires pull-ups and polarity so this is a plain level read.
pub trait ButtonPins {
    fn read(&mut self, pin: PinId) -> bool;
}

const PULSE_NONE: u8 = 0;
const PULSE_OFF: u8 = 1;
const PULSE_OFF_TO_ON: u8 = 2;
const PULSE_ON: u8 = 3;
const PULSE_ON_TO_OFF: u8 = 4;

#[derive(Debug, Clone, Copy, Default)]
struct Button {
    cfg: ButtonCfg,
    history: u8,
    physical: bool,
    logical: bool,
    prev_logical: bool,
    pulse_state: u8,
    pulse_timer_us: u32,
    virt_press: u8,
}

const SHIFT_NONE: u8 = 0;
const SHIFT_DOWN_UNUSED: u8 = 1;
const SHIFT_DOWN_USED: u8 = 2;
const SHIFT_KEY_PULSE: u8 = 3;

/// Things a scan pass wants the rest of the core to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanEvents {
    /// Toggle the global night-mode flag.
    pub night_toggle: bool,
    /// Force the night-mode flag to this state (toggle-switch mode).
    pub night_switch: Option<bool>,
    /// Transmit this IR command slot (1-based).
    pub ir_send: Option<u8>,
}

/// The live button table plus the report assembly state.
pub struct ButtonScanner {
    buttons: [Button; MAX_BUTTONS],
    nbuttons: usize,
    shift_btn: u8,
    shift_mode: u8,
    shift_state: u8,
    shift_timer_us: u32,
    shift_engaged: bool,
    night: NightModeCfg,
    js_buttons: u32,
    keyboard: KeyboardReport,
    media: u8,
    kb_dirty: bool,
    media_dirty: bool,
}

impl ButtonScanner {
    pub fn new(cfg: &Config) -> Self {
        let mut buttons = [Button::default(); MAX_BUTTONS];
        for (b, c) in buttons.iter_mut().zip(cfg.buttons.iter()) {
            b.cfg = *c;
            if c.flags & ButtonCfg::FLAG_PULSE != 0 {
                b.pulse_state = PULSE_OFF;
            }
        }
        ButtonScanner {
            buttons,
            nbuttons: MAX_BUTTONS,
            shift_btn: cfg.shift_button.btn,
            shift_mode: cfg.shift_button.mode,
            shift_state: SHIFT_NONE,
            shift_timer_us: 0,
            shift_engaged: false,
            night: cfg.night_mode,
            js_buttons: 0,
            keyboard: KeyboardReport::default(),
            media: 0,
            kb_dirty: false,
            media_dirty: false,
        }
    }

    /// Is the shift modifier currently engaged?
    pub fn shifted(&self) -> bool {
        self.shift_engaged
    }

    /// Press or release a virtual button (1-based slot). Calls nest;
    /// the button stays pressed while the refcount is nonzero.
    pub fn virtual_press(&mut self, slot: u8, on: bool) {
        if slot == 0 || slot as usize > self.nbuttons {
            return;
        }
        let b = &mut self.buttons[slot as usize - 1];
        if on {
            b.virt_press = b.virt_press.saturating_add(1);
        } else if b.virt_press > 0 {
            b.virt_press -= 1;
        }
    }

    fn has_shifted_meaning(&self, idx: usize) -> bool {
        let cfg = &self.buttons[idx].cfg;
        cfg.shifted.is_some()
            || cfg.shifted_ir != 0
            || (self.night.btn as usize == idx + 1
                && self.night.flags & NightModeCfg::FLAG_SHIFTED != 0
                && self.night.flags & NightModeCfg::FLAG_SWITCH == 0)
    }

    /// One 1kHz scan tick. `dt_us` is the actual time since the previous
    /// tick.
    pub fn tick<P: ButtonPins>(&mut self, pins: &mut P, dt_us: u32) -> ScanEvents {
        let mut events = ScanEvents::default();

        // debounce pass
        for b in self.buttons[..self.nbuttons].iter_mut() {
            if b.cfg.pin.is_connected() {
                let raw = pins.read(b.cfg.pin) as u8;
                b.history = (b.history << 1 | raw) & 0x1F;
                if b.history == 0x1F {
                    b.physical = true;
                } else if b.history == 0 {
                    b.physical = false;
                }
            }
        }

        // shift button state machine
        let shift_idx = self.shift_btn as usize;
        let shift_valid = shift_idx >= 1 && shift_idx <= self.nbuttons;
        if shift_valid && self.shift_mode == 0 {
            let down = self.buttons[shift_idx - 1].physical;
            match self.shift_state {
                SHIFT_NONE => {
                    if down {
                        self.shift_state = SHIFT_DOWN_UNUSED;
                    }
                }
                SHIFT_DOWN_UNUSED => {
                    if !down {
                        // released without use: report the shift button's
                        // own key for a moment
                        self.shift_state = SHIFT_KEY_PULSE;
                        self.shift_timer_us = SHIFT_PULSE_US;
                    }
                }
                SHIFT_DOWN_USED => {
                    if !down {
                        self.shift_state = SHIFT_NONE;
                    }
                }
                _ => {
                    self.shift_timer_us = self.shift_timer_us.saturating_sub(dt_us);
                    if self.shift_timer_us == 0 {
                        self.shift_state = SHIFT_NONE;
                    }
                }
            }
        }
        self.shift_engaged = if !shift_valid {
            false
        } else if self.shift_mode == 0 {
            self.shift_state == SHIFT_DOWN_UNUSED || self.shift_state == SHIFT_DOWN_USED
        } else {
            // shift-and-key: the button is a plain modifier, engaged
            // whenever held
            self.buttons[shift_idx - 1].physical
        };
        let shifted = self.shift_engaged;

        // logical state policies
        for idx in 0..self.nbuttons {
            let is_shift_btn = shift_idx == idx + 1;
            let b = &mut self.buttons[idx];
            b.prev_logical = b.logical;

            let pressed = b.physical || b.virt_press > 0;
            if b.pulse_state == PULSE_NONE {
                b.logical = pressed;
            } else {
                b.pulse_timer_us = b.pulse_timer_us.saturating_sub(dt_us);
                let expired = b.pulse_timer_us == 0;
                match b.pulse_state {
                    PULSE_OFF => {
                        b.logical = false;
                        if expired && pressed {
                            b.pulse_state = PULSE_OFF_TO_ON;
                            b.pulse_timer_us = PULSE_US;
                            b.logical = true;
                        }
                    }
                    PULSE_OFF_TO_ON => {
                        b.logical = true;
                        if expired {
                            // guard gap before the next edge may fire
                            b.pulse_state = PULSE_ON;
                            b.pulse_timer_us = PULSE_US;
                            b.logical = false;
                        }
                    }
                    PULSE_ON => {
                        b.logical = false;
                        if expired && !pressed {
                            b.pulse_state = PULSE_ON_TO_OFF;
                            b.pulse_timer_us = PULSE_US;
                            b.logical = true;
                        }
                    }
                    _ => {
                        b.logical = true;
                        if expired {
                            b.pulse_state = PULSE_OFF;
                            b.pulse_timer_us = PULSE_US;
                            b.logical = false;
                        }
                    }
                }
            }

            // in shift-or-key mode the shift button's own key fires only
            // during the release pulse
            if is_shift_btn && self.shift_mode == 0 {
                b.logical = self.shift_state == SHIFT_KEY_PULSE;
            }

            // rising edge actions
            if b.logical && !b.prev_logical {
                let idx1 = (idx + 1) as u8;
                if !is_shift_btn && shifted && self.shift_mode == 0 && self.has_shifted_meaning(idx)
                {
                    self.shift_state = SHIFT_DOWN_USED;
                }
                self.button_pressed(idx1, shifted, &mut events);
            }
        }

        events
    }

    /// Rising-edge bookkeeping: night mode and IR side effects.
    fn button_pressed(&mut self, slot: u8, shifted: bool, events: &mut ScanEvents) {
        let cfg = &self.buttons[slot as usize - 1].cfg;

        if self.night.btn == slot {
            let wants_shift = self.night.flags & NightModeCfg::FLAG_SHIFTED != 0;
            if self.night.flags & NightModeCfg::FLAG_SWITCH == 0 && (!wants_shift || shifted) {
                events.night_toggle = true;
            }
        }

        let key = if shifted && cfg.shifted.is_some() {
            cfg.shifted
        } else {
            cfg.key
        };
        if key.typ == key_type::SPECIAL && key.val == special_key::NIGHT_TOGGLE {
            events.night_toggle = true;
        }

        let ir = if shifted && cfg.shifted_ir != 0 {
            cfg.shifted_ir
        } else {
            cfg.ir_cmd
        };
        if ir != 0 {
            events.ir_send = Some(ir);
        }
    }

    /// Compose the outbound report images from the current logical
    /// states. Returns the night-switch level if a switch-mode night
    /// button is configured.
    pub fn build_reports(&mut self) -> Option<bool> {
        let shifted = self.shifted();
        let mut js = 0u32;
        let mut kb = KeyboardReport::default();
        let mut media = 0u8;
        let mut night_switch = None;

        for idx in 0..self.nbuttons {
            let b = &self.buttons[idx];

            // switch-mode night buttons report level, not edges
            if self.night.btn as usize == idx + 1
                && self.night.flags & NightModeCfg::FLAG_SWITCH != 0
            {
                night_switch = Some(b.logical);
            }
            if !b.logical {
                continue;
            }

            let key = effective_key(&b.cfg, shifted);
            match key.typ {
                key_type::JOYSTICK => {
                    if (1..=32).contains(&key.val) {
                        js |= 1 << (key.val - 1);
                    }
                }
                key_type::KEYBOARD => kb.add_key(key.val),
                key_type::MODIFIER => kb.modifiers |= key.val,
                key_type::MEDIA => media |= MEDIA_BIT[key.val as usize],
                _ => {}
            }
        }

        self.js_buttons = js;
        if kb != self.keyboard {
            self.keyboard = kb;
            self.kb_dirty = true;
        }
        if media != self.media {
            self.media = media;
            self.media_dirty = true;
        }
        night_switch
    }

    pub fn joystick_buttons(&self) -> u32 {
        self.js_buttons
    }

    /// The keyboard report, if it changed since the last take.
    pub fn take_keyboard(&mut self) -> Option<KeyboardReport> {
        if self.kb_dirty {
            self.kb_dirty = false;
            Some(self.keyboard)
        } else {
            None
        }
    }

    /// The media-key report byte, if it changed since the last take.
    pub fn take_media(&mut self) -> Option<u8> {
        if self.media_dirty {
            self.media_dirty = false;
            Some(self.media)
        } else {
            None
        }
    }

    /// Re-arm the keyboard dirty flag after a failed transmit.
    pub fn force_keyboard_dirty(&mut self) {
        self.kb_dirty = true;
    }

    /// Re-arm the media dirty flag after a failed transmit.
    pub fn force_media_dirty(&mut self) {
        self.media_dirty = true;
    }

    /// Logical state of a 1-based slot, for the button status dump.
    pub fn logical(&self, slot: u8) -> bool {
        let idx = slot as usize;
        idx >= 1 && idx <= self.nbuttons && self.buttons[idx - 1].logical
    }
}

fn effective_key(cfg: &ButtonCfg, shifted: bool) -> KeyAssign {
    if shifted && cfg.shifted.is_some() {
        cfg.shifted
    } else {
        cfg.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    struct Pins {
        down: [bool; MAX_BUTTONS],
    }

    impl Pins {
        fn new() -> Self {
            Pins {
                down: [false; MAX_BUTTONS],
            }
        }
    }

    impl ButtonPins for Pins {
        fn read(&mut self, pin: PinId) -> bool {
            // tests assign pin ids 0..MAX_BUTTONS
            self.down[pin.0 as usize]
        }
    }

    fn config_with_button(slot: usize, key: KeyAssign, flags: u8) -> Config {
        let mut cfg = Config::default();
        cfg.buttons[slot].pin = PinId(slot as u8);
        cfg.buttons[slot].key = key;
        cfg.buttons[slot].flags = flags;
        cfg
    }

    fn settle<P: ButtonPins>(s: &mut ButtonScanner, pins: &mut P, ticks: u32) {
        for _ in 0..ticks {
            s.tick(pins, 1_000);
        }
    }

    #[test]
    fn debounce_needs_five_agreeing_samples() {
        let cfg = config_with_button(0, KeyAssign { typ: 1, val: 1 }, 0);
        let mut s = ButtonScanner::new(&cfg);
        let mut pins = Pins::new();

        pins.down[0] = true;
        for _ in 0..4 {
            s.tick(&mut pins, 1_000);
            assert!(!s.logical(1));
        }
        s.tick(&mut pins, 1_000);
        assert!(s.logical(1));

        // a 3ms glitch low does not release the button
        pins.down[0] = false;
        settle(&mut s, &mut pins, 3);
        assert!(s.logical(1));
        pins.down[0] = true;
        settle(&mut s, &mut pins, 5);
        assert!(s.logical(1));
    }

    #[test]
    fn joystick_bitmap_and_media_byte() {
        let mut cfg = config_with_button(0, KeyAssign { typ: 1, val: 5 }, 0);
        cfg.buttons[1].pin = PinId(1);
        cfg.buttons[1].key = KeyAssign { typ: 4, val: 0xE9 };
        let mut s = ButtonScanner::new(&cfg);
        let mut pins = Pins::new();

        pins.down[0] = true;
        pins.down[1] = true;
        settle(&mut s, &mut pins, 5);
        s.build_reports();
        assert_eq!(s.joystick_buttons(), 1 << 4);
        assert_eq!(s.take_media(), Some(0x01));
        // unchanged reports are not re-sent
        s.build_reports();
        assert_eq!(s.take_media(), None);
    }

    #[test]
    fn pulse_mode_keystroke_and_gap() {
        let cfg = config_with_button(0, KeyAssign { typ: 2, val: 0x4D }, ButtonCfg::FLAG_PULSE);
        let mut s = ButtonScanner::new(&cfg);
        let mut pins = Pins::new();

        pins.down[0] = true;
        settle(&mut s, &mut pins, 5); // debounce
        assert!(s.logical(1)); // pulse begins

        // on through ~200ms
        settle(&mut s, &mut pins, 190);
        assert!(s.logical(1));

        // then the guard gap forces it off although the switch is still on
        settle(&mut s, &mut pins, 20);
        assert!(!s.logical(1));
        settle(&mut s, &mut pins, 400);
        assert!(!s.logical(1));

        // the closing edge fires its own pulse
        pins.down[0] = false;
        settle(&mut s, &mut pins, 6);
        assert!(s.logical(1));
        settle(&mut s, &mut pins, 250);
        assert!(!s.logical(1));
    }

    #[test]
    fn virtual_press_refcount() {
        let cfg = config_with_button(2, KeyAssign { typ: 1, val: 3 }, 0);
        let mut s = ButtonScanner::new(&cfg);
        let mut pins = Pins::new();

        s.virtual_press(3, true);
        s.virtual_press(3, true);
        s.tick(&mut pins, 1_000);
        assert!(s.logical(3));
        s.virtual_press(3, false);
        s.tick(&mut pins, 1_000);
        assert!(s.logical(3));
        s.virtual_press(3, false);
        s.tick(&mut pins, 1_000);
        assert!(!s.logical(3));
    }

    #[test]
    fn shift_or_key_pulses_only_on_unused_release() {
        let mut cfg = config_with_button(0, KeyAssign { typ: 1, val: 1 }, 0);
        cfg.buttons[1].pin = PinId(1);
        cfg.buttons[1].key = KeyAssign { typ: 1, val: 2 };
        cfg.buttons[1].shifted = KeyAssign { typ: 1, val: 9 };
        cfg.shift_button.btn = 1;
        let mut s = ButtonScanner::new(&cfg);
        let mut pins = Pins::new();

        // hold shift, press the shifted button: shift's own key must not
        // fire, and button 2 reports its shifted assignment
        pins.down[0] = true;
        settle(&mut s, &mut pins, 6);
        assert!(!s.logical(1));
        pins.down[1] = true;
        settle(&mut s, &mut pins, 6);
        s.build_reports();
        assert_eq!(s.joystick_buttons(), 1 << 8);

        pins.down[1] = false;
        pins.down[0] = false;
        settle(&mut s, &mut pins, 6);
        assert!(!s.logical(1)); // used hold: no pulse

        // a tap with no shifted use produces the 50ms pulse
        pins.down[0] = true;
        settle(&mut s, &mut pins, 6);
        pins.down[0] = false;
        settle(&mut s, &mut pins, 6);
        assert!(s.logical(1));
        settle(&mut s, &mut pins, 60);
        assert!(!s.logical(1));
    }

    #[test]
    fn shift_and_key_mode_always_sends_own_key() {
        let mut cfg = config_with_button(0, KeyAssign { typ: 1, val: 1 }, 0);
        cfg.buttons[1].pin = PinId(1);
        cfg.buttons[1].key = KeyAssign { typ: 1, val: 2 };
        cfg.buttons[1].shifted = KeyAssign { typ: 1, val: 9 };
        cfg.shift_button.btn = 1;
        cfg.shift_button.mode = 1;
        let mut s = ButtonScanner::new(&cfg);
        let mut pins = Pins::new();

        pins.down[0] = true;
        pins.down[1] = true;
        settle(&mut s, &mut pins, 6);
        // the shift button reports its own key and shifts button 2
        assert!(s.logical(1));
        s.build_reports();
        assert_eq!(s.joystick_buttons(), (1 << 0) | (1 << 8));
    }

    #[test]
    fn debounced_state_changes_at_most_once_per_five_ticks() {
        let cfg = config_with_button(0, KeyAssign { typ: 1, val: 1 }, 0);
        let mut s = ButtonScanner::new(&cfg);
        let mut pins = Pins::new();

        // pseudorandom contact noise
        let mut seed: u32 = 0x2F6E_2B1D;
        let mut last_state = s.logical(1);
        let mut last_change: i32 = -5;
        for tick in 0..2_000i32 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            pins.down[0] = (seed >> 16) & 1 != 0;
            s.tick(&mut pins, 1_000);
            let state = s.logical(1);
            if state != last_state {
                assert!(tick - last_change >= 5, "changed after {} ticks", tick - last_change);
                last_change = tick;
                last_state = state;
            }
        }
    }

    #[test]
    fn night_toggle_button_reports_event() {
        let cfg = config_with_button(0, KeyAssign { typ: 5, val: 1 }, 0);
        let mut s = ButtonScanner::new(&cfg);
        let mut pins = Pins::new();

        pins.down[0] = true;
        let mut toggled = false;
        for _ in 0..6 {
            toggled |= s.tick(&mut pins, 1_000).night_toggle;
        }
        assert!(toggled);
        // held down: only the edge toggles
        assert!(!s.tick(&mut pins, 1_000).night_toggle);
    }
}
