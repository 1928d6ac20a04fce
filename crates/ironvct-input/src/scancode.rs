/// Keyboard scan code in the remote protocol's space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scancode {
    code: u8,
    extended: bool,
}

impl Scancode {
    pub const fn from_u8(extended: bool, code: u8) -> Self {
        Self { code, extended }
    }

    pub const fn from_u16(scancode: u16) -> Self {
        let extended = scancode & 0xE000 == 0xE000;

        #[allow(clippy::cast_possible_truncation)] // truncating on purpose
        let code = scancode as u8;

        Self { code, extended }
    }

    pub const fn as_u8(self) -> (bool, u8) {
        (self.extended, self.code)
    }

    pub const fn as_u16(self) -> u16 {
        if self.extended {
            self.code as u16 | 0xE000
        } else {
            self.code as u16
        }
    }

    pub const fn is_extended(self) -> bool {
        self.extended
    }
}

impl From<u16> for Scancode {
    fn from(code: u16) -> Self {
        Self::from_u16(code)
    }
}

/// Offset between X11 keycodes and evdev key codes in the common server setup.
const EVDEV_OFFSET: u8 = 8;

/// Maps an X11 keycode into the protocol scancode space.
///
/// The main block of evdev codes coincides with the XT set-1 scancodes; keys
/// outside it carry the extended prefix. Returns `None` for codes with no
/// scancode equivalent.
pub fn keycode_to_scancode(keycode: u8) -> Option<Scancode> {
    let evdev = keycode.checked_sub(EVDEV_OFFSET)?;

    let scancode = match evdev {
        // KEY_ESC through KEY_F12: scancode equals the evdev code.
        1..=88 => Scancode::from_u8(false, evdev),
        96 => Scancode::from_u8(true, 0x1C),  // KEY_KPENTER
        97 => Scancode::from_u8(true, 0x1D),  // KEY_RIGHTCTRL
        98 => Scancode::from_u8(true, 0x35),  // KEY_KPSLASH
        99 => Scancode::from_u8(true, 0x37),  // KEY_SYSRQ
        100 => Scancode::from_u8(true, 0x38), // KEY_RIGHTALT
        102 => Scancode::from_u8(true, 0x47), // KEY_HOME
        103 => Scancode::from_u8(true, 0x48), // KEY_UP
        104 => Scancode::from_u8(true, 0x49), // KEY_PAGEUP
        105 => Scancode::from_u8(true, 0x4B), // KEY_LEFT
        106 => Scancode::from_u8(true, 0x4D), // KEY_RIGHT
        107 => Scancode::from_u8(true, 0x4F), // KEY_END
        108 => Scancode::from_u8(true, 0x50), // KEY_DOWN
        109 => Scancode::from_u8(true, 0x51), // KEY_PAGEDOWN
        110 => Scancode::from_u8(true, 0x52), // KEY_INSERT
        111 => Scancode::from_u8(true, 0x53), // KEY_DELETE
        119 => Scancode::from_u8(true, 0x45), // KEY_PAUSE, collapsed to the extended form
        125 => Scancode::from_u8(true, 0x5B), // KEY_LEFTMETA
        126 => Scancode::from_u8(true, 0x5C), // KEY_RIGHTMETA
        127 => Scancode::from_u8(true, 0x5D), // KEY_COMPOSE
        _ => return None,
    };

    Some(scancode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scancode_u16_roundtrip() {
        let plain = Scancode::from_u8(false, 0x1E);
        assert_eq!(Scancode::from_u16(plain.as_u16()), plain);

        let extended = Scancode::from_u8(true, 0x4B);
        assert_eq!(extended.as_u16(), 0xE04B);
        assert_eq!(Scancode::from_u16(0xE04B), extended);
    }

    #[test]
    fn main_block_maps_one_to_one() {
        // X11 keycode 38 is evdev KEY_A (30), scancode 0x1E.
        assert_eq!(keycode_to_scancode(38), Some(Scancode::from_u8(false, 0x1E)));
        // X11 keycode 9 is evdev KEY_ESC (1).
        assert_eq!(keycode_to_scancode(9), Some(Scancode::from_u8(false, 0x01)));
    }

    #[test]
    fn navigation_keys_are_extended() {
        // X11 keycode 111 is evdev KEY_UP (103).
        let scancode = keycode_to_scancode(111).unwrap();
        assert!(scancode.is_extended());
        assert_eq!(scancode.as_u16(), 0xE048);
    }

    #[test]
    fn out_of_range_keycode_has_no_mapping() {
        assert_eq!(keycode_to_scancode(0), None);
        assert_eq!(keycode_to_scancode(255), None);
    }
}
