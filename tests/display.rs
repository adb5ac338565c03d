use std::sync::Once;

use pmos_core::asm::asm::assemble;
use pmos_core::console::console::{Console, TEXT_ATTR};
use pmos_core::device::device::Screen;
use pmos_core::kernel::kernel::{Kernel, KernelConfig};
use pmos_core::keyboard::keyboard::ScancodeKeyboard;
use pmos_core::machine::machine::Machine;
use pmos_runtime::display::display::{
    HEIGHT, SCALE, VgaWindow, WIDTH, background, foreground, headless_from_env,
};
use pmos_runtime::font::font::{GLYPH_SIZE, lit};

static INIT: Once = Once::new();

fn set_headless() {
    INIT.call_once(|| {
        // set_var is unsafe on this toolchain; nothing else in this binary reads the variable.
        unsafe {
            std::env::set_var("PMOS_HEADLESS", "1");
        }
    });
}

fn pixel(win: &VgaWindow, row: usize, col: usize, x: usize, y: usize) -> u32 {
    let py = (row * GLYPH_SIZE + y) * SCALE;
    let px = (col * GLYPH_SIZE + x) * SCALE;
    win.buffer()[py * WIDTH + px]
}

fn text_cell(ch: u8) -> u16 {
    ((TEXT_ATTR as u16) << 8) | ch as u16
}

#[test]
fn env_forces_headless() {
    set_headless();
    assert!(headless_from_env());
    let win = VgaWindow::new(false).unwrap();
    assert!(win.is_headless());
    assert!(win.is_open());
    assert_eq!(win.buffer().len(), WIDTH * HEIGHT);
}

#[test]
fn palette_split() {
    assert_eq!(foreground(text_cell(b'x')), 0xff5555);
    assert_eq!(background(text_cell(b'x')), 0x000000);
    assert_eq!(foreground(0x1f41), 0xffffff);
    assert_eq!(background(0x1f41), 0x0000aa);
    // blink bit is not a background colour
    assert_eq!(background(0x9f41), 0x0000aa);
}

#[test]
fn blank_screen_shows_only_the_cursor() {
    let mut win = VgaWindow::headless();
    win.render();

    let fg = foreground(text_cell(b' '));
    let bg = background(text_cell(b' '));
    for x in 0..GLYPH_SIZE {
        assert_eq!(pixel(&win, 0, 0, x, GLYPH_SIZE - 1), fg);
        assert_eq!(pixel(&win, 0, 0, x, 0), bg);
        assert_eq!(pixel(&win, 0, 1, x, GLYPH_SIZE - 1), bg);
    }
    let lit_pixels = win.buffer().iter().filter(|&&px| px == fg).count();
    assert_eq!(lit_pixels, GLYPH_SIZE * SCALE * SCALE);
}

#[test]
fn console_output_is_rendered_with_the_font() {
    let mut win = VgaWindow::headless();
    let mut console = Console::new();
    console.write_bytes(&mut win, b"A#");
    assert_eq!(win.text().row_text(0), "A#");
    assert_eq!(win.text().cursor(), (0, 2));

    win.present().unwrap();
    let fg = foreground(text_cell(b'A'));
    let bg = background(text_cell(b'A'));
    for (col, ch) in [(0, b'A'), (1, b'#')] {
        for y in 0..GLYPH_SIZE - 1 {
            for x in 0..GLYPH_SIZE {
                let expected = if lit(ch, x, y) { fg } else { bg };
                assert_eq!(pixel(&win, 0, col, x, y), expected, "{} at ({x}, {y})", ch as char);
            }
        }
    }
    // the cursor moved on to the third cell
    assert_eq!(pixel(&win, 0, 2, 3, GLYPH_SIZE - 1), fg);
}

#[test]
fn scaled_pixels_are_filled() {
    let mut win = VgaWindow::headless();
    win.put_char(3, 5, b'#');
    win.render();
    let base_y = 3 * GLYPH_SIZE * SCALE;
    let base_x = 5 * GLYPH_SIZE * SCALE;
    let (x, y) = (0..GLYPH_SIZE)
        .flat_map(|y| (0..GLYPH_SIZE).map(move |x| (x, y)))
        .find(|&(x, y)| lit(b'#', x, y))
        .unwrap();
    for dy in 0..SCALE {
        for dx in 0..SCALE {
            let idx = (base_y + y * SCALE + dy) * WIDTH + base_x + x * SCALE + dx;
            assert_eq!(win.buffer()[idx], foreground(text_cell(b'#')));
        }
    }
}

#[test]
fn headless_window_polls_no_keys() {
    let mut win = VgaWindow::headless();
    assert!(win.poll_scancodes().is_empty());
    assert!(win.present().is_ok());
}

#[test]
fn kernel_writes_through_the_window() {
    let program = "
        mov eax, 0
        mov ecx, 0
        mov edx, msg
        mov ebx, 3
        int 0x80
        mov eax, 5
        int 0x80
msg:    .ascii \"vga\"
";
    let config = KernelConfig {
        proc_mem_size: 0x1000,
        ..KernelConfig::default()
    };
    let mut kernel = Kernel::new(config, VgaWindow::headless(), ScancodeKeyboard::new()).unwrap();
    kernel.load_program(&assemble(program).unwrap()).unwrap();

    let mut machine = Machine::new(kernel, 50);
    machine.run(10_000).unwrap();
    assert!(machine.is_finished());
    assert_eq!(machine.kernel.screen().text().dump(), "vga");
    assert_eq!(machine.kernel.screen().text().cursor(), (0, 3));
}
