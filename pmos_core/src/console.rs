pub mod console {
    use crate::device::device::Screen;

    pub const MAX_ROW: usize = 25;
    pub const MAX_COL: usize = 80;

    /// Light red on black, the attribute every cell is written with.
    pub const TEXT_ATTR: u8 = 0x0c;

    const fn cell(ch: u8) -> u16 {
        ((TEXT_ATTR as u16) << 8) | ch as u16
    }

    /// Cursor bookkeeping shared by the write syscall and keyboard echo.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Console {
        pub row: usize,
        pub col: usize,
        // keyboard echoes ending the current row, newest last
        echoed: usize,
    }

    impl Console {
        pub fn new() -> Console {
            Console::default()
        }

        /// Blank the whole screen and home the cursor.
        pub fn reset<S: Screen + ?Sized>(&mut self, screen: &mut S) {
            for row in 0..MAX_ROW {
                for col in 0..MAX_COL {
                    screen.put_char(row, col, b' ');
                }
            }
            *self = Console::new();
            self.sync_cursor(screen);
        }

        pub fn write_byte<S: Screen + ?Sized>(&mut self, screen: &mut S, ch: u8) {
            if ch == b'\n' {
                self.new_line(screen);
                return;
            }

            screen.put_char(self.row, self.col, ch);
            self.col += 1;
            if self.col == MAX_COL {
                self.new_line(screen);
            }
        }

        /// Program output. Whatever was echoed before it can no longer be
        /// erased by backspace.
        pub fn write_bytes<S: Screen + ?Sized>(&mut self, screen: &mut S, data: &[u8]) {
            self.echoed = 0;
            for &ch in data {
                self.write_byte(screen, ch);
            }
            self.sync_cursor(screen);
        }

        pub fn new_line<S: Screen + ?Sized>(&mut self, screen: &mut S) {
            self.echoed = 0;
            self.row += 1;
            self.col = 0;
            if self.row == MAX_ROW {
                self.row = MAX_ROW - 1;
                screen.scroll_screen();
            }
        }

        /// Erase the cell left of the cursor. Stops at column 0.
        pub fn backspace<S: Screen + ?Sized>(&mut self, screen: &mut S) -> bool {
            if self.col == 0 {
                return false;
            }
            self.col -= 1;
            screen.put_char(self.row, self.col, 0);
            true
        }

        /// Echo a typed character.
        pub fn echo_byte<S: Screen + ?Sized>(&mut self, screen: &mut S, ch: u8) {
            self.write_byte(screen, ch);
            if self.col != 0 {
                self.echoed += 1;
            }
        }

        /// Backspace limited to the echoed run on the current row.
        pub fn erase_echo<S: Screen + ?Sized>(&mut self, screen: &mut S) -> bool {
            if self.echoed == 0 || !self.backspace(screen) {
                return false;
            }
            self.echoed -= 1;
            true
        }

        pub fn echoed(&self) -> usize {
            self.echoed
        }

        pub fn sync_cursor<S: Screen + ?Sized>(&self, screen: &mut S) {
            screen.update_cursor(self.row, self.col);
        }
    }

    /// In-memory 80x25 VGA text buffer, one `attr << 8 | ch` cell per
    /// position.
    #[derive(Clone, Debug)]
    pub struct TextScreen {
        cells: Vec<u16>,
        cursor: (usize, usize),
    }

    impl Default for TextScreen {
        fn default() -> TextScreen {
            TextScreen::new()
        }
    }

    impl TextScreen {
        pub fn new() -> TextScreen {
            TextScreen {
                cells: vec![cell(b' '); MAX_ROW * MAX_COL],
                cursor: (0, 0),
            }
        }

        pub fn cells(&self) -> &[u16] {
            &self.cells
        }

        pub fn cell(&self, row: usize, col: usize) -> u16 {
            self.cells[row * MAX_COL + col]
        }

        pub fn char_at(&self, row: usize, col: usize) -> u8 {
            (self.cell(row, col) & 0xff) as u8
        }

        pub fn cursor(&self) -> (usize, usize) {
            self.cursor
        }

        /// Printable contents of one row with trailing blanks trimmed.
        pub fn row_text(&self, row: usize) -> String {
            let line: String = (0..MAX_COL)
                .map(|col| match self.char_at(row, col) {
                    0 => ' ',
                    ch => ch as char,
                })
                .collect();
            line.trim_end().to_string()
        }

        /// Every row, joined with newlines, trailing empty rows dropped.
        pub fn dump(&self) -> String {
            let mut rows: Vec<String> = (0..MAX_ROW).map(|row| self.row_text(row)).collect();
            while rows.last().is_some_and(|row| row.is_empty()) {
                rows.pop();
            }
            rows.join("\n")
        }

        pub fn clear(&mut self) {
            self.cells.fill(cell(b' '));
            self.cursor = (0, 0);
        }
    }

    impl Screen for TextScreen {
        fn put_char(&mut self, row: usize, col: usize, ch: u8) {
            if row < MAX_ROW && col < MAX_COL {
                self.cells[row * MAX_COL + col] = cell(ch);
            }
        }

        fn scroll_screen(&mut self) {
            self.cells.copy_within(MAX_COL.., 0);
            let last = (MAX_ROW - 1) * MAX_COL;
            self.cells[last..].fill(cell(b' '));
        }

        fn update_cursor(&mut self, row: usize, col: usize) {
            self.cursor = (row, col);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn newline_and_wrap() {
            let mut screen = TextScreen::new();
            let mut console = Console::new();
            console.write_bytes(&mut screen, b"hi\nthere");
            assert_eq!(screen.row_text(0), "hi");
            assert_eq!(screen.row_text(1), "there");
            assert_eq!(screen.cursor(), (1, 5));

            let long = vec![b'x'; MAX_COL + 3];
            console.write_bytes(&mut screen, &long);
            // 75 cells finish row 1, the remaining 8 start row 2.
            assert_eq!((console.row, console.col), (2, 8));
            assert_eq!(screen.cell(2, 0), 0x0c00 | b'x' as u16);
        }

        #[test]
        fn last_row_scrolls() {
            let mut screen = TextScreen::new();
            let mut console = Console::new();
            for line in 0..MAX_ROW {
                console.write_bytes(&mut screen, format!("line{line}\n").as_bytes());
            }
            assert_eq!(console.row, MAX_ROW - 1);
            assert_eq!(screen.row_text(0), "line1");
            assert_eq!(screen.row_text(MAX_ROW - 2), format!("line{}", MAX_ROW - 1));
            assert_eq!(screen.row_text(MAX_ROW - 1), "");
        }

        #[test]
        fn backspace_stops_at_column_zero() {
            let mut screen = TextScreen::new();
            let mut console = Console::new();
            console.write_bytes(&mut screen, b"ab");
            assert!(console.backspace(&mut screen));
            assert!(console.backspace(&mut screen));
            assert!(!console.backspace(&mut screen));
            assert_eq!(screen.row_text(0), "");
        }

        #[test]
        fn erase_echo_spares_program_output() {
            let mut screen = TextScreen::new();
            let mut console = Console::new();
            console.write_bytes(&mut screen, b"> ");
            console.echo_byte(&mut screen, b'a');
            console.echo_byte(&mut screen, b'b');
            assert_eq!(console.echoed(), 2);

            assert!(console.erase_echo(&mut screen));
            assert!(console.erase_echo(&mut screen));
            assert!(!console.erase_echo(&mut screen));
            assert_eq!(screen.row_text(0), ">");
            assert_eq!(console.col, 2);

            console.echo_byte(&mut screen, b'c');
            console.write_bytes(&mut screen, b"!");
            assert!(!console.erase_echo(&mut screen));
            assert_eq!(screen.row_text(0), "> c!");
        }

        #[test]
        fn echo_run_ends_at_row_change() {
            let mut screen = TextScreen::new();
            let mut console = Console::new();
            console.echo_byte(&mut screen, b'x');
            console.new_line(&mut screen);
            assert_eq!(console.echoed(), 0);

            for _ in 0..MAX_COL {
                console.echo_byte(&mut screen, b'y');
            }
            // the wrap moved the cursor to a fresh row
            assert_eq!((console.row, console.col), (2, 0));
            assert_eq!(console.echoed(), 0);
            assert!(!console.erase_echo(&mut screen));
        }
    }
}
