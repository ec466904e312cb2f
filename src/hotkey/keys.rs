//! Key names used in chord strings, mapped to Linux key codes.

use evdev::Key;

/// Modifier names and the key codes (left, right) that count as that
/// modifier being held.
pub fn modifier_codes(name: &str) -> Option<Vec<u16>> {
    let codes = match name {
        "ctrl" | "control" => [Key::KEY_LEFTCTRL, Key::KEY_RIGHTCTRL],
        "alt" => [Key::KEY_LEFTALT, Key::KEY_RIGHTALT],
        "shift" => [Key::KEY_LEFTSHIFT, Key::KEY_RIGHTSHIFT],
        "super" | "meta" | "win" => [Key::KEY_LEFTMETA, Key::KEY_RIGHTMETA],
        _ => return None,
    };
    Some(codes.iter().map(|k| k.code()).collect())
}

/// Parse a non-modifier key name (case-insensitive) into its key code.
///
/// Accepts `kb:<code>` for raw codes not covered by the name table.
pub fn key_code(name: &str) -> Option<u16> {
    let lower = name.trim().to_lowercase();

    if let Some(raw) = lower.strip_prefix("kb:") {
        return raw.parse::<u16>().ok();
    }

    if lower.len() == 1 {
        let ch = lower.chars().next()?;
        if let Some(key) = letter_or_digit(ch) {
            return Some(key.code());
        }
    }

    let key = match lower.as_str() {
        "space" => Key::KEY_SPACE,
        "enter" | "return" => Key::KEY_ENTER,
        "tab" => Key::KEY_TAB,
        "escape" | "esc" => Key::KEY_ESC,
        "backspace" => Key::KEY_BACKSPACE,
        "delete" | "del" => Key::KEY_DELETE,
        "insert" | "ins" => Key::KEY_INSERT,
        "home" => Key::KEY_HOME,
        "end" => Key::KEY_END,
        "pageup" => Key::KEY_PAGEUP,
        "pagedown" => Key::KEY_PAGEDOWN,
        "up" | "arrowup" => Key::KEY_UP,
        "down" | "arrowdown" => Key::KEY_DOWN,
        "left" | "arrowleft" => Key::KEY_LEFT,
        "right" | "arrowright" => Key::KEY_RIGHT,
        "capslock" => Key::KEY_CAPSLOCK,
        "scrolllock" => Key::KEY_SCROLLLOCK,
        "pause" => Key::KEY_PAUSE,
        "sysrq" | "printscreen" | "print" => Key::KEY_SYSRQ,
        "f1" => Key::KEY_F1,
        "f2" => Key::KEY_F2,
        "f3" => Key::KEY_F3,
        "f4" => Key::KEY_F4,
        "f5" => Key::KEY_F5,
        "f6" => Key::KEY_F6,
        "f7" => Key::KEY_F7,
        "f8" => Key::KEY_F8,
        "f9" => Key::KEY_F9,
        "f10" => Key::KEY_F10,
        "f11" => Key::KEY_F11,
        "f12" => Key::KEY_F12,
        _ => return None,
    };
    Some(key.code())
}

fn letter_or_digit(ch: char) -> Option<Key> {
    let key = match ch {
        'a' => Key::KEY_A,
        'b' => Key::KEY_B,
        'c' => Key::KEY_C,
        'd' => Key::KEY_D,
        'e' => Key::KEY_E,
        'f' => Key::KEY_F,
        'g' => Key::KEY_G,
        'h' => Key::KEY_H,
        'i' => Key::KEY_I,
        'j' => Key::KEY_J,
        'k' => Key::KEY_K,
        'l' => Key::KEY_L,
        'm' => Key::KEY_M,
        'n' => Key::KEY_N,
        'o' => Key::KEY_O,
        'p' => Key::KEY_P,
        'q' => Key::KEY_Q,
        'r' => Key::KEY_R,
        's' => Key::KEY_S,
        't' => Key::KEY_T,
        'u' => Key::KEY_U,
        'v' => Key::KEY_V,
        'w' => Key::KEY_W,
        'x' => Key::KEY_X,
        'y' => Key::KEY_Y,
        'z' => Key::KEY_Z,
        '0' => Key::KEY_0,
        '1' => Key::KEY_1,
        '2' => Key::KEY_2,
        '3' => Key::KEY_3,
        '4' => Key::KEY_4,
        '5' => Key::KEY_5,
        '6' => Key::KEY_6,
        '7' => Key::KEY_7,
        '8' => Key::KEY_8,
        '9' => Key::KEY_9,
        _ => return None,
    };
    Some(key)
}
