pub mod display;
pub mod font;
pub mod keymap;
pub mod serial;
