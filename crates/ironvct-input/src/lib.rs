use thiserror::Error;

mod keymap;
mod scancode;

pub use crate::keymap::{KeyPress, KeyboardMap, KeysymEntry, ModifierMask};
pub use crate::scancode::{keycode_to_scancode, Scancode};

/// X11 keysym value.
pub type Keysym = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("no mapping for keysym {keysym:#06x} in the active layout")]
    NoMapping { keysym: Keysym },
}

/// Key stroke in the protocol's scancode space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub scancode: Scancode,
    /// Modifiers that must be held for the stroke to produce the requested symbol.
    pub modifiers: ModifierMask,
}

/// Translates a host keysym into a protocol scancode through the loaded
/// keyboard map.
///
/// Pure function: resolves the keysym to a keycode with its modifier
/// requirement, then maps the keycode into the scancode space. Fails with
/// `NoMapping` for any keysym outside the active layout rather than guessing.
pub fn translate_key(map: &KeyboardMap, keysym: Keysym) -> Result<KeyStroke, InputError> {
    let press = map.resolve(keysym).ok_or(InputError::NoMapping { keysym })?;

    let scancode = keycode_to_scancode(press.keycode).ok_or(InputError::NoMapping { keysym })?;

    Ok(KeyStroke {
        scancode,
        modifiers: press.modifiers,
    })
}
