//! Partial character to linux input keycode table (see virkeycode-linux(7)).
//!
//! Only unshifted keys are mapped. Letters map case-insensitively to the same
//! key, so typed text reaches the guest in the keyboard's default case.

/// Keycode for `c`, or `None` when the character has no unshifted key.
pub fn keycode_for(c: char) -> Option<u16> {
    let code = match c.to_ascii_uppercase() {
        '1' => 0x02,
        '2' => 0x03,
        '3' => 0x04,
        '4' => 0x05,
        '5' => 0x06,
        '6' => 0x07,
        '7' => 0x08,
        '8' => 0x09,
        '9' => 0x0A,
        '0' => 0x0B,
        '-' => 0x0C,
        '=' => 0x0D,
        '\t' => 0x0F,
        'Q' => 0x10,
        'W' => 0x11,
        'E' => 0x12,
        'R' => 0x13,
        'T' => 0x14,
        'Y' => 0x15,
        'U' => 0x16,
        'I' => 0x17,
        'O' => 0x18,
        'P' => 0x19,
        '[' => 0x1A,
        ']' => 0x1B,
        '\n' => 0x1C,
        'A' => 0x1E,
        'S' => 0x1F,
        'D' => 0x20,
        'F' => 0x21,
        'G' => 0x22,
        'H' => 0x23,
        'J' => 0x24,
        'K' => 0x25,
        'L' => 0x26,
        ';' => 0x27,
        '\'' => 0x28,
        '`' => 0x29,
        '\\' => 0x2B,
        'Z' => 0x2C,
        'X' => 0x2D,
        'C' => 0x2E,
        'V' => 0x2F,
        'B' => 0x30,
        'N' => 0x31,
        'M' => 0x32,
        ',' => 0x33,
        '.' => 0x34,
        '/' => 0x35,
        ' ' => 0x39,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_are_case_insensitive() {
        assert_eq!(keycode_for('a'), Some(0x1E));
        assert_eq!(keycode_for('A'), Some(0x1E));
        assert_eq!(keycode_for('m'), keycode_for('M'));
    }

    #[test]
    fn digits_enter_and_space() {
        assert_eq!(keycode_for('1'), Some(0x02));
        assert_eq!(keycode_for('0'), Some(0x0B));
        assert_eq!(keycode_for('\n'), Some(0x1C));
        assert_eq!(keycode_for(' '), Some(0x39));
    }

    #[test]
    fn unmapped_characters() {
        assert_eq!(keycode_for('!'), None);
        assert_eq!(keycode_for('é'), None);
        assert_eq!(keycode_for('\r'), None);
    }
}
