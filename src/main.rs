use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use getopts::{Matches, Options};
use log::{LevelFilter, error, info, warn};

use pmos_core::asm::asm::assemble;
use pmos_core::kernel::kernel::{Kernel, KernelConfig};
use pmos_core::keyboard::keyboard::ScancodeKeyboard;
use pmos_core::machine::machine::{DEFAULT_TIMER_INTERVAL, Machine};
use pmos_runtime::display::display::{VgaWindow, headless_from_env};
use pmos_runtime::serial::serial;

type Runtime = Machine<VgaWindow, ScancodeKeyboard>;

// machine cycles between two window refreshes
const FRAME_CYCLES: usize = 5_000;

fn main() {
    if let Err(err) = run() {
        eprintln!("pmos: {err}");
        std::process::exit(1);
    }
}

fn options() -> Options {
    let mut opts = Options::new();
    opts.optopt("q", "quantum", "timer ticks a process may hold the cpu", "TICKS");
    opts.optopt("n", "procs", "process table size, idle slot included", "N");
    opts.optopt("t", "timer", "instructions between timer interrupts", "N");
    opts.optopt("", "ticks", "stop after this many timer ticks", "N");
    opts.optopt("k", "keys", "text typed on the keyboard after boot", "TEXT");
    opts.optflag("", "headless", "run without a window, print the screen at the end");
    opts.optopt("", "log-level", "off, error, warn, info, debug or trace", "LEVEL");
    opts.optflag("h", "help", "print this help menu");
    opts
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let opts = options();
    let matches = opts.parse(&args).map_err(|err| err.to_string())?;

    if matches.opt_present("h") {
        print!("{}", opts.usage("Usage: pmos [options] PROGRAM..."));
        return Ok(());
    }

    let level = match matches.opt_str("log-level").or_else(|| env::var("PMOS_LOG").ok()) {
        Some(text) => serial::parse_level(&text)?,
        None => LevelFilter::Info,
    };
    serial::init(level).map_err(|err| err.to_string())?;

    if matches.free.is_empty() {
        return Err(format!("missing program\n{}", opts.usage("Usage: pmos [options] PROGRAM...")));
    }

    let config = kernel_config(&matches)?;
    let interval = parse_opt(&matches, "timer", DEFAULT_TIMER_INTERVAL)?;
    let max_ticks = matches
        .opt_str("ticks")
        .map(|text| parse_num::<u64>("ticks", &text))
        .transpose()?;
    let headless = matches.opt_present("headless") || headless_from_env();

    let screen = VgaWindow::new(headless).map_err(|err| format!("failed to open window: {err}"))?;
    let mut kernel = Kernel::new(config, screen, ScancodeKeyboard::new()).map_err(|err| err.to_string())?;

    for path in &matches.free {
        let image = load_image(Path::new(path))?;
        let pid = kernel
            .load_program(&image)
            .map_err(|err| format!("failed to load {path}: {err}"))?;
        info!("{path} is pid {pid}");
    }

    let mut machine: Runtime = Machine::new(kernel, interval);
    if let Some(text) = matches.opt_str("keys") {
        let count = machine.kernel.keyboard_mut().type_str(&text);
        machine.raise_keyboard(count);
    }

    let result = if machine.kernel.screen().is_headless() {
        let result = run_headless(&mut machine, max_ticks);
        println!("{}", machine.kernel.screen().text().dump());
        result
    } else {
        run_windowed(&mut machine, max_ticks)
    };

    info!(
        "stopped after {} ticks, {} instructions",
        machine.ticks(),
        machine.retired()
    );
    result
}

fn kernel_config(matches: &Matches) -> Result<KernelConfig, String> {
    let defaults = KernelConfig::default();
    let config = KernelConfig {
        max_pcb: parse_opt(matches, "procs", defaults.max_pcb)?,
        time_quantum: parse_opt(matches, "quantum", defaults.time_quantum)?,
        ..defaults
    };
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

fn parse_num<T: FromStr>(name: &str, text: &str) -> Result<T, String> {
    text.parse::<T>()
        .map_err(|_| format!("--{name} expects a number, got '{text}'"))
}

fn parse_opt<T: FromStr>(matches: &Matches, name: &str, default: T) -> Result<T, String> {
    match matches.opt_str(name) {
        Some(text) => parse_num(name, &text),
        None => Ok(default),
    }
}

/// `.s` sources are assembled, anything else is taken as a raw image.
fn load_image(path: &Path) -> Result<Vec<u8>, String> {
    if path.extension().is_some_and(|ext| ext == "s") {
        let source = fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        assemble(&source).map_err(|err| format!("{}: {err}", path.display()))
    } else {
        fs::read(path).map_err(|err| format!("failed to read {}: {err}", path.display()))
    }
}

fn tick_limit_reached(machine: &Runtime, max_ticks: Option<u64>) -> bool {
    max_ticks.is_some_and(|max| machine.ticks() >= max)
}

fn run_headless(machine: &mut Runtime, max_ticks: Option<u64>) -> Result<(), String> {
    loop {
        if machine.is_finished() {
            info!("no process left");
            return Ok(());
        }
        if machine.is_stalled() {
            warn!("every live process is blocked, stopping");
            return Ok(());
        }
        if tick_limit_reached(machine, max_ticks) {
            return Ok(());
        }
        if let Err(err) = machine.step() {
            error!("machine stopped: {err}");
            return Err(err.to_string());
        }
    }
}

fn run_windowed(machine: &mut Runtime, max_ticks: Option<u64>) -> Result<(), String> {
    while machine.kernel.screen().is_open() && !tick_limit_reached(machine, max_ticks) {
        let codes = machine.kernel.screen_mut().poll_scancodes();
        for code in codes {
            machine.kernel.keyboard_mut().push_scancode(code);
            machine.raise_keyboard(1);
        }

        for _ in 0..FRAME_CYCLES {
            if let Err(err) = machine.step() {
                error!("machine stopped: {err}");
                let _ = machine.kernel.screen_mut().present();
                return Err(err.to_string());
            }
        }

        machine
            .kernel
            .screen_mut()
            .present()
            .map_err(|err| err.to_string())?;
    }
    Ok(())
}
