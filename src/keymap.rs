pub mod keymap {
    use minifb::Key;
    use pmos_core::keyboard::keyboard::{BREAK_BIT, KEY_BACKSPACE, KEY_ENTER, KEY_LSHIFT, KEY_RSHIFT};

    /// PC/XT set-1 make code for a host key. Keys the decoder has no use
    /// for map to `None`.
    pub fn make_code(key: Key) -> Option<u32> {
        let code = match key {
            Key::Escape => 0x01,
            Key::Key1 => 0x02,
            Key::Key2 => 0x03,
            Key::Key3 => 0x04,
            Key::Key4 => 0x05,
            Key::Key5 => 0x06,
            Key::Key6 => 0x07,
            Key::Key7 => 0x08,
            Key::Key8 => 0x09,
            Key::Key9 => 0x0a,
            Key::Key0 => 0x0b,
            Key::Minus => 0x0c,
            Key::Equal => 0x0d,
            Key::Backspace => KEY_BACKSPACE,
            Key::Tab => 0x0f,
            Key::Q => 0x10,
            Key::W => 0x11,
            Key::E => 0x12,
            Key::R => 0x13,
            Key::T => 0x14,
            Key::Y => 0x15,
            Key::U => 0x16,
            Key::I => 0x17,
            Key::O => 0x18,
            Key::P => 0x19,
            Key::LeftBracket => 0x1a,
            Key::RightBracket => 0x1b,
            Key::Enter => KEY_ENTER,
            Key::LeftCtrl => 0x1d,
            Key::A => 0x1e,
            Key::S => 0x1f,
            Key::D => 0x20,
            Key::F => 0x21,
            Key::G => 0x22,
            Key::H => 0x23,
            Key::J => 0x24,
            Key::K => 0x25,
            Key::L => 0x26,
            Key::Semicolon => 0x27,
            Key::Apostrophe => 0x28,
            Key::Backquote => 0x29,
            Key::LeftShift => KEY_LSHIFT,
            Key::Backslash => 0x2b,
            Key::Z => 0x2c,
            Key::X => 0x2d,
            Key::C => 0x2e,
            Key::V => 0x2f,
            Key::B => 0x30,
            Key::N => 0x31,
            Key::M => 0x32,
            Key::Comma => 0x33,
            Key::Period => 0x34,
            Key::Slash => 0x35,
            Key::RightShift => KEY_RSHIFT,
            Key::NumPadAsterisk => 0x37,
            Key::LeftAlt => 0x38,
            Key::Space => 0x39,
            _ => return None,
        };
        Some(code)
    }

    pub fn break_code(key: Key) -> Option<u32> {
        make_code(key).map(|code| code | BREAK_BIT)
    }
}
