pub mod display {
    use std::env;
    use std::io::{Error, ErrorKind};

    use minifb::{KeyRepeat, Window, WindowOptions};
    use pmos_core::console::console::{MAX_COL, MAX_ROW, TextScreen};
    use pmos_core::device::device::Screen;

    use crate::font::font::{GLYPH_SIZE, lit};
    use crate::keymap::keymap::{break_code, make_code};

    pub const SCALE: usize = 2;
    pub const WIDTH: usize = MAX_COL * GLYPH_SIZE * SCALE;
    pub const HEIGHT: usize = MAX_ROW * GLYPH_SIZE * SCALE;

    // the 16 colour text-mode palette
    const PALETTE: [u32; 16] = [
        0x000000, 0x0000aa, 0x00aa00, 0x00aaaa, 0xaa0000, 0xaa00aa, 0xaa5500, 0xaaaaaa,
        0x555555, 0x5555ff, 0x55ff55, 0x55ffff, 0xff5555, 0xff55ff, 0xffff55, 0xffffff,
    ];

    /// `PMOS_HEADLESS` set to anything but "" or "0".
    pub fn headless_from_env() -> bool {
        env::var("PMOS_HEADLESS").is_ok_and(|value| !value.is_empty() && value != "0")
    }

    pub fn foreground(cell: u16) -> u32 {
        PALETTE[((cell >> 8) & 0x0f) as usize]
    }

    pub fn background(cell: u16) -> u32 {
        PALETTE[((cell >> 12) & 0x07) as usize]
    }

    /// The VGA text display: a cell buffer the console writes into, and,
    /// unless headless, a window that shows it rendered with an 8x8 font.
    pub struct VgaWindow {
        window: Option<Window>,
        text: TextScreen,
        buf: Vec<u32>,
        dirty: bool,
    }

    impl VgaWindow {
        pub fn new(headless: bool) -> Result<VgaWindow, Error> {
            if headless || headless_from_env() {
                return Ok(VgaWindow::headless());
            }

            let mut window = Window::new("pmos", WIDTH, HEIGHT, WindowOptions::default())
                .map_err(|err| Error::new(ErrorKind::Other, err.to_string()))?;
            window.set_target_fps(60);

            Ok(VgaWindow {
                window: Some(window),
                ..VgaWindow::headless()
            })
        }

        pub fn headless() -> VgaWindow {
            VgaWindow {
                window: None,
                text: TextScreen::new(),
                buf: vec![0; WIDTH * HEIGHT],
                dirty: true,
            }
        }

        pub fn is_headless(&self) -> bool {
            self.window.is_none()
        }

        /// A headless display never closes.
        pub fn is_open(&self) -> bool {
            self.window.as_ref().is_none_or(|window| window.is_open())
        }

        pub fn text(&self) -> &TextScreen {
            &self.text
        }

        pub fn buffer(&self) -> &[u32] {
            &self.buf
        }

        /// Redraw the pixel buffer from the cells, cursor underlined.
        pub fn render(&mut self) {
            let (cursor_row, cursor_col) = self.text.cursor();

            for row in 0..MAX_ROW {
                for col in 0..MAX_COL {
                    let cell = self.text.cell(row, col);
                    let ch = (cell & 0xff) as u8;
                    let (fg, bg) = (foreground(cell), background(cell));
                    let cursor = row == cursor_row && col == cursor_col;

                    for y in 0..GLYPH_SIZE {
                        for x in 0..GLYPH_SIZE {
                            let on = lit(ch, x, y) || (cursor && y == GLYPH_SIZE - 1);
                            self.fill(row * GLYPH_SIZE + y, col * GLYPH_SIZE + x, if on { fg } else { bg });
                        }
                    }
                }
            }
            self.dirty = false;
        }

        fn fill(&mut self, y: usize, x: usize, color: u32) {
            for dy in 0..SCALE {
                let line = (y * SCALE + dy) * WIDTH;
                let start = line + x * SCALE;
                self.buf[start..start + SCALE].fill(color);
            }
        }

        /// Push the frame to the window; headless it only re-renders.
        pub fn present(&mut self) -> Result<(), Error> {
            if self.dirty {
                self.render();
            }
            match self.window.as_mut() {
                Some(window) => window
                    .update_with_buffer(&self.buf, WIDTH, HEIGHT)
                    .map_err(|err| Error::new(ErrorKind::Other, err.to_string())),
                None => Ok(()),
            }
        }

        /// Scancodes for host keys pressed or released since the last poll:
        /// make codes first, then break codes.
        pub fn poll_scancodes(&mut self) -> Vec<u32> {
            let Some(window) = self.window.as_ref() else {
                return Vec::new();
            };

            let pressed = window.get_keys_pressed(KeyRepeat::Yes);
            let released = window.get_keys_released();
            pressed
                .into_iter()
                .filter_map(make_code)
                .chain(released.into_iter().filter_map(break_code))
                .collect()
        }
    }

    impl Screen for VgaWindow {
        fn put_char(&mut self, row: usize, col: usize, ch: u8) {
            self.text.put_char(row, col, ch);
            self.dirty = true;
        }

        fn scroll_screen(&mut self) {
            self.text.scroll_screen();
            self.dirty = true;
        }

        fn update_cursor(&mut self, row: usize, col: usize) {
            self.text.update_cursor(row, col);
            self.dirty = true;
        }
    }
}
