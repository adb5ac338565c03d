pub mod keyboard {
    use std::collections::VecDeque;

    use crate::device::device::KeyboardDevice;

    pub const MAX_KEYBUFFER_SIZE: usize = 256;

    pub const KEY_BACKSPACE: u32 = 0x0e;
    pub const KEY_ENTER: u32 = 0x1c;
    pub const KEY_LSHIFT: u32 = 0x2a;
    pub const KEY_RSHIFT: u32 = 0x36;
    /// Codes at or above this are key releases.
    pub const BREAK_BIT: u32 = 0x80;

    /// Circular buffer of decoded characters between the keyboard handler
    /// and the read syscall. Empty iff head == tail, so one slot always
    /// stays unused.
    #[derive(Clone, Debug)]
    pub struct KeyBuffer {
        buf: Vec<u8>,
        head: usize,
        tail: usize,
    }

    impl KeyBuffer {
        pub fn new(size: usize) -> KeyBuffer {
            KeyBuffer {
                buf: vec![0; size.max(2)],
                head: 0,
                tail: 0,
            }
        }

        pub fn is_empty(&self) -> bool {
            self.head == self.tail
        }

        pub fn is_full(&self) -> bool {
            (self.tail + 1) % self.buf.len() == self.head
        }

        pub fn len(&self) -> usize {
            (self.tail + self.buf.len() - self.head) % self.buf.len()
        }

        pub fn capacity(&self) -> usize {
            self.buf.len() - 1
        }

        /// Append a character; refuses instead of overwriting unread input.
        pub fn push(&mut self, ch: u8) -> bool {
            if self.is_full() {
                return false;
            }
            self.buf[self.tail] = ch;
            self.tail = (self.tail + 1) % self.buf.len();
            true
        }

        pub fn pop(&mut self) -> Option<u8> {
            if self.is_empty() {
                return None;
            }
            let ch = self.buf[self.head];
            self.head = (self.head + 1) % self.buf.len();
            Some(ch)
        }

        /// Withdraw the newest unread character.
        pub fn pop_back(&mut self) -> Option<u8> {
            if self.is_empty() {
                return None;
            }
            self.tail = (self.tail + self.buf.len() - 1) % self.buf.len();
            Some(self.buf[self.tail])
        }

        pub fn contents(&self) -> Vec<u8> {
            let mut out = Vec::with_capacity(self.len());
            let mut idx = self.head;
            while idx != self.tail {
                out.push(self.buf[idx]);
                idx = (idx + 1) % self.buf.len();
            }
            out
        }
    }

    // set-1 make codes 0x00..=0x39
    const SET1_LOWER: &[u8] =
        b"\0\01234567890-=\0\0qwertyuiop[]\0\0asdfghjkl;'`\0\\zxcvbnm,./\0*\0 ";
    const SET1_UPPER: &[u8] =
        b"\0\0!@#$%^&*()_+\0\0QWERTYUIOP{}\0\0ASDFGHJKL:\"~\0|ZXCVBNM<>?\0*\0 ";

    /// Make code and shift requirement for an ASCII character, the inverse
    /// of [`ScancodeKeyboard::get_char`].
    pub fn scancode_for(ch: u8) -> Option<(u32, bool)> {
        match ch {
            b'\n' => return Some((KEY_ENTER, false)),
            0x08 => return Some((KEY_BACKSPACE, false)),
            0 => return None,
            _ => {}
        }
        if let Some(code) = SET1_LOWER.iter().position(|&c| c == ch) {
            return Some((code as u32, false));
        }
        SET1_UPPER
            .iter()
            .position(|&c| c == ch)
            .map(|code| (code as u32, true))
    }

    /// Headless PC/XT keyboard: a queue of raw scancodes plus shift state.
    #[derive(Clone, Debug, Default)]
    pub struct ScancodeKeyboard {
        pending: VecDeque<u32>,
        shift: bool,
    }

    impl ScancodeKeyboard {
        pub fn new() -> ScancodeKeyboard {
            ScancodeKeyboard::default()
        }

        pub fn push_scancode(&mut self, code: u32) {
            self.pending.push_back(code);
        }

        /// Queue the make (and shift) codes that type `text`. Returns how
        /// many keyboard interrupts the caller should raise.
        pub fn type_str(&mut self, text: &str) -> usize {
            let mut raised = 0;
            for ch in text.bytes() {
                let Some((code, shifted)) = scancode_for(ch) else {
                    continue;
                };
                if shifted {
                    self.pending.push_back(KEY_LSHIFT);
                    raised += 1;
                }
                self.pending.push_back(code);
                raised += 1;
                if shifted {
                    self.pending.push_back(KEY_LSHIFT | BREAK_BIT);
                    raised += 1;
                }
            }
            raised
        }

        pub fn pending(&self) -> usize {
            self.pending.len()
        }

        pub fn shift_held(&self) -> bool {
            self.shift
        }
    }

    impl KeyboardDevice for ScancodeKeyboard {
        fn get_key_code(&mut self) -> u32 {
            let Some(code) = self.pending.pop_front() else {
                return 0;
            };
            match code {
                KEY_LSHIFT | KEY_RSHIFT => self.shift = true,
                c if c == KEY_LSHIFT | BREAK_BIT || c == KEY_RSHIFT | BREAK_BIT => self.shift = false,
                _ => {}
            }
            code
        }

        fn get_char(&self, code: u32) -> u8 {
            let table = if self.shift { SET1_UPPER } else { SET1_LOWER };
            table.get(code as usize).copied().unwrap_or(0)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn ring_keeps_one_slot_free() {
            let mut buf = KeyBuffer::new(4);
            assert!(buf.push(b'a'));
            assert!(buf.push(b'b'));
            assert!(buf.push(b'c'));
            assert!(!buf.push(b'd'));
            assert_eq!(buf.len(), 3);
            assert_eq!(buf.pop(), Some(b'a'));
            assert!(buf.push(b'd'));
            assert_eq!(buf.contents(), b"bcd".to_vec());
        }

        #[test]
        fn pop_back_withdraws_newest() {
            let mut buf = KeyBuffer::new(8);
            buf.push(b'x');
            buf.push(b'y');
            assert_eq!(buf.pop_back(), Some(b'y'));
            assert_eq!(buf.pop(), Some(b'x'));
            assert_eq!(buf.pop_back(), None);
        }

        #[test]
        fn decoder_tables_line_up() {
            let kbd = ScancodeKeyboard::new();
            assert_eq!(kbd.get_char(0x02), b'1');
            assert_eq!(kbd.get_char(0x10), b'q');
            assert_eq!(kbd.get_char(0x1e), b'a');
            assert_eq!(kbd.get_char(0x2b), b'\\');
            assert_eq!(kbd.get_char(0x2c), b'z');
            assert_eq!(kbd.get_char(0x39), b' ');
            assert_eq!(kbd.get_char(KEY_ENTER), 0);
            assert_eq!(kbd.get_char(0x7f), 0);
        }

        #[test]
        fn shift_selects_upper_table() {
            let mut kbd = ScancodeKeyboard::new();
            assert_eq!(kbd.type_str("A!"), 6);
            assert_eq!(kbd.get_key_code(), KEY_LSHIFT);
            let code = kbd.get_key_code();
            assert_eq!(kbd.get_char(code), b'A');
            kbd.get_key_code();
            assert!(!kbd.shift_held());
            assert_eq!(kbd.get_char(code), b'a');
        }
    }
}
