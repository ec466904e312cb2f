//! Chord definitions and the per-device chord state machine.

use std::fmt;
use std::str::FromStr;

use super::keys::{key_code, modifier_codes};
use super::record::{InputRecord, KEY_PRESS, KEY_RELEASE};

/// A set of key codes that all count as the same modifier (e.g. left and
/// right ctrl).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierGroup {
    pub name: String,
    pub codes: Vec<u16>,
}

/// One non-modifier key of a chord, as written in the chord string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordKey {
    pub name: String,
    pub code: u16,
}

impl ChordKey {
    fn parse(name: &str) -> Result<Self, ChordParseError> {
        let code = key_code(name).ok_or_else(|| ChordParseError::UnknownKey(name.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            code,
        })
    }
}

/// The configured chord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chord {
    /// Every modifier group held, then a press of `key`.
    ModifierKey {
        modifiers: Vec<ModifierGroup>,
        key: ChordKey,
    },
    /// Two ordinary keys down together, in either order.
    TwoKey { first: ChordKey, second: ChordKey },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChordParseError {
    #[error("empty chord")]
    Empty,
    #[error("unknown key name: {0:?}")]
    UnknownKey(String),
    #[error("modifier {0:?} listed twice")]
    DuplicateModifier(String),
    #[error("trigger key {0:?} is itself a modifier")]
    TriggerIsModifier(String),
    #[error("a modifier chord needs exactly one non-modifier key, got {0}")]
    TriggerKeyCount(usize),
    #[error("a chord without modifiers needs exactly two distinct keys, got {0}")]
    KeyCount(usize),
}

impl Chord {
    /// Default chord: left and right arrow together.
    pub fn left_right() -> Self {
        Self::TwoKey {
            first: ChordKey {
                name: "left".to_string(),
                code: evdev::Key::KEY_LEFT.code(),
            },
            second: ChordKey {
                name: "right".to_string(),
                code: evdev::Key::KEY_RIGHT.code(),
            },
        }
    }

    #[cfg(test)]
    pub fn ctrl_alt_space() -> Self {
        "ctrl+alt+space".parse().unwrap()
    }
}

impl Default for Chord {
    fn default() -> Self {
        Self::left_right()
    }
}

/// Parse chord strings like `"ctrl+alt+space"` or `"left+right"`.
///
/// With at least one modifier the remaining token is the trigger key; with
/// no modifiers exactly two keys form a two-key chord. Names are
/// case-insensitive and kept lowercased for display.
impl FromStr for Chord {
    type Err = ChordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut modifiers: Vec<ModifierGroup> = Vec::new();
        let mut keys: Vec<ChordKey> = Vec::new();

        for token in s.split('+') {
            let token = token.trim().to_lowercase();
            if token.is_empty() {
                continue;
            }
            if let Some(codes) = modifier_codes(&token) {
                if modifiers.iter().any(|m| m.codes == codes) {
                    return Err(ChordParseError::DuplicateModifier(token));
                }
                modifiers.push(ModifierGroup { name: token, codes });
                continue;
            }
            let key = ChordKey::parse(&token)?;
            if !keys.iter().any(|k| k.code == key.code) {
                keys.push(key);
            }
        }

        if modifiers.is_empty() && keys.is_empty() {
            return Err(ChordParseError::Empty);
        }

        if modifiers.is_empty() {
            let count = keys.len();
            let mut keys = keys.into_iter();
            return match (keys.next(), keys.next(), count) {
                (Some(first), Some(second), 2) => Ok(Chord::TwoKey { first, second }),
                _ => Err(ChordParseError::KeyCount(count)),
            };
        }

        if keys.len() != 1 {
            return Err(ChordParseError::TriggerKeyCount(keys.len()));
        }
        let key = keys.remove(0);
        // A trigger that is also a modifier would fire on the modifier alone.
        if modifiers.iter().any(|m| m.codes.contains(&key.code)) {
            return Err(ChordParseError::TriggerIsModifier(key.name));
        }
        Ok(Chord::ModifierKey { modifiers, key })
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModifierKey { modifiers, key } => {
                for m in modifiers {
                    write!(f, "{}+", m.name)?;
                }
                f.write_str(&key.name)
            }
            Self::TwoKey { first, second } => write!(f, "{}+{}", first.name, second.name),
        }
    }
}

/// Per-device chord tracking. Never shared between devices.
#[derive(Debug)]
pub struct ChordState {
    chord: Chord,
    /// Down flag per code: the modifier codes (flattened, group order) for
    /// `ModifierKey`, or `[first, second]` for `TwoKey`.
    down: Vec<bool>,
}

impl ChordState {
    pub fn new(chord: Chord) -> Self {
        let slots = match &chord {
            Chord::ModifierKey { modifiers, .. } => modifiers.iter().map(|m| m.codes.len()).sum(),
            Chord::TwoKey { .. } => 2,
        };
        Self {
            chord,
            down: vec![false; slots],
        }
    }

    /// Feed one record. Returns `true` when this record completes the chord.
    ///
    /// Non-key records and autorepeat values are ignored.
    pub fn feed(&mut self, record: &InputRecord) -> bool {
        if !record.is_key() {
            return false;
        }
        let pressed = record.value == KEY_PRESS;
        let released = record.value == KEY_RELEASE;
        if !pressed && !released {
            return false;
        }

        match &self.chord {
            Chord::ModifierKey { modifiers, key } => {
                let mut slot = 0;
                for group in modifiers {
                    for &code in &group.codes {
                        if code == record.code {
                            self.down[slot] = pressed;
                        }
                        slot += 1;
                    }
                }

                if record.code == key.code && pressed {
                    return self.modifiers_held(modifiers);
                }
                false
            }
            Chord::TwoKey { first, second } => {
                if record.code == first.code {
                    self.down[0] = pressed;
                } else if record.code == second.code {
                    self.down[1] = pressed;
                } else {
                    return false;
                }

                if pressed && self.down[0] && self.down[1] {
                    // Both must be pressed afresh before the next fire.
                    self.down[0] = false;
                    self.down[1] = false;
                    return true;
                }
                false
            }
        }
    }

    fn modifiers_held(&self, modifiers: &[ModifierGroup]) -> bool {
        let mut slot = 0;
        modifiers.iter().all(|group| {
            let start = slot;
            slot += group.codes.len();
            self.down[start..slot].iter().any(|d| *d)
        })
    }
}
