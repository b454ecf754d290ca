//! USB usage bookkeeping for the keyboard and media-key reports

#[cfg(feature = "use-serde")]
use serde::{Deserialize, Serialize};

/// Media-key usages we advertise in the HID descriptor, and the report
/// bit each one occupies.
pub mod media_usage {
    pub const VOLUME_UP: u8 = 0xE9;
    pub const VOLUME_DOWN: u8 = 0xEA;
    pub const MUTE: u8 = 0xE2;
    pub const PLAY_PAUSE: u8 = 0xCD;
    pub const NEXT_TRACK: u8 = 0xB5;
    pub const PREV_TRACK: u8 = 0xB6;
    pub const STOP: u8 = 0xB7;
}

/// Maps a consumer-page usage number to its bit in our one-byte media
/// report; 0 for usages the descriptor doesn't carry. A full 256-entry
/// table keeps the per-button lookup branch-free.
pub const MEDIA_BIT: [u8; 256] = {
    let mut t = [0u8; 256];
    t[media_usage::VOLUME_UP as usize] = 0x01;
    t[media_usage::VOLUME_DOWN as usize] = 0x02;
    t[media_usage::MUTE as usize] = 0x04;
    t[media_usage::PLAY_PAUSE as usize] = 0x08;
    t[media_usage::NEXT_TRACK as usize] = 0x10;
    t[media_usage::PREV_TRACK as usize] = 0x20;
    t[media_usage::STOP as usize] = 0x40;
    t
};

/// The keyboard interface's input report: modifier mask plus up to six
/// concurrent keys, phantom-state (all 0x01) past that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "use-serde", derive(Serialize, Deserialize))]
pub struct KeyboardReport {
    pub modifiers: u8,
    pub keys: [u8; 6],
}

impl KeyboardReport {
    pub const ROLLOVER: u8 = 0x01;

    /// Add one key usage; flips the whole report to the phantom state on
    /// overflow.
    pub fn add_key(&mut self, usage: u8) {
        if self.keys[5] != 0 {
            self.keys = [Self::ROLLOVER; 6];
            return;
        }
        for slot in self.keys.iter_mut() {
            if *slot == 0 {
                *slot = usage;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_lut_covers_advertised_usages() {
        assert_eq!(MEDIA_BIT[0xE9], 0x01);
        assert_eq!(MEDIA_BIT[0xEA], 0x02);
        assert_eq!(MEDIA_BIT[0xE2], 0x04);
        assert_eq!(MEDIA_BIT[0x28], 0); // Return is not a media key
    }

    #[test]
    fn keyboard_rollover_past_six_keys() {
        let mut r = KeyboardReport::default();
        for k in 4..10 {
            r.add_key(k);
        }
        assert_eq!(r.keys, [4, 5, 6, 7, 8, 9]);
        r.add_key(10);
        assert_eq!(r.keys, [KeyboardReport::ROLLOVER; 6]);
    }
}
