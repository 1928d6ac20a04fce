use bitflags::bitflags;
use smallvec::SmallVec;

use crate::Keysym;

bitflags! {
    /// X11 modifier state mask.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ModifierMask: u8 {
        const SHIFT = 0x01;
        const LOCK = 0x02;
        const CONTROL = 0x04;
        const MOD1 = 0x08;
        const MOD2 = 0x10;
        const MOD3 = 0x20;
        const MOD4 = 0x40;
        const MOD5 = 0x80;
    }
}

/// One symbol a keycode can produce, with the modifiers required to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeysymEntry {
    pub keysym: Keysym,
    pub modifiers: ModifierMask,
}

/// Resolved keycode plus the modifiers required to produce the symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub keycode: u8,
    pub modifiers: ModifierMask,
}

#[derive(Debug, Clone, Default)]
struct KeyMapping {
    entries: SmallVec<[KeysymEntry; 4]>,
}

/// Keyboard layout: per-keycode symbol tables as obtained from the windowing
/// environment's keymap.
///
/// Keymap acquisition (device specifier, component masks) is the caller's
/// concern; this type only consumes the resulting tables.
#[derive(Debug, Clone, Default)]
pub struct KeyboardMap {
    keys: Vec<KeyMapping>,
}

impl KeyboardMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `keycode` produces `keysym` when `modifiers` are held.
    pub fn add_entry(&mut self, keycode: u8, keysym: Keysym, modifiers: ModifierMask) {
        let idx = usize::from(keycode);
        if self.keys.len() <= idx {
            self.keys.resize_with(idx + 1, KeyMapping::default);
        }
        self.keys[idx].entries.push(KeysymEntry { keysym, modifiers });
    }

    /// Symbols produced by `keycode`.
    pub fn entries(&self, keycode: u8) -> &[KeysymEntry] {
        self.keys
            .get(usize::from(keycode))
            .map(|mapping| mapping.entries.as_slice())
            .unwrap_or_default()
    }

    /// Finds the keycode producing `keysym`.
    ///
    /// When several keycodes match, the candidate demanding the smallest
    /// modifier mask wins; among equals, the lowest keycode.
    pub fn resolve(&self, keysym: Keysym) -> Option<KeyPress> {
        let mut best: Option<KeyPress> = None;

        for (keycode, mapping) in self.keys.iter().enumerate() {
            for entry in &mapping.entries {
                if entry.keysym != keysym {
                    continue;
                }

                let candidate = KeyPress {
                    keycode: keycode as u8,
                    modifiers: entry.modifiers,
                };

                let better = match best {
                    None => true,
                    Some(best) => {
                        candidate.modifiers.bits() < best.modifiers.bits()
                            || (candidate.modifiers == best.modifiers && candidate.keycode < best.keycode)
                    }
                };

                if better {
                    best = Some(candidate);
                }
            }
        }

        best
    }
}
