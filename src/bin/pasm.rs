use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use pmos_core::asm::asm::Assembler;

fn main() {
    if let Err(err) = run() {
        eprintln!("pasm: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1);
    let mut input: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut symbols: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--out" => {
                let Some(path) = args.next() else {
                    return Err("-o/--out requires a path".into());
                };
                output = Some(PathBuf::from(path));
            }
            "-s" | "--symbol" => {
                let Some(name) = args.next() else {
                    return Err("-s/--symbol requires a name".into());
                };
                symbols.push(name);
            }
            _ if input.is_none() => input = Some(PathBuf::from(arg)),
            _ if output.is_none() => output = Some(PathBuf::from(arg)),
            _ => return Err(format!("unexpected argument '{arg}'")),
        }
    }

    let input = input.ok_or_else(|| "missing input file".to_string())?;
    let output = output.unwrap_or_else(|| default_output_path(&input));

    let source = fs::read_to_string(&input)
        .map_err(|err| format!("failed to read {}: {err}", input.display()))?;

    let mut assembler = Assembler::new();
    let image = assembler
        .assemble(&source)
        .map_err(|err| format!("{}: {err}", input.display()))?;

    // print requested symbol addresses, handy for poking at user memory
    for name in &symbols {
        let addr = assembler
            .symbol(name)
            .ok_or_else(|| format!("unknown symbol '{name}'"))?;
        println!("{name} = {addr:#010x}");
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|err| format!("failed to create {}: {err}", parent.display()))?;
        }
    }

    fs::write(&output, image)
        .map_err(|err| format!("failed to write {}: {err}", output.display()))?;

    Ok(())
}

fn default_output_path(input: &Path) -> PathBuf {
    let mut out = input.to_path_buf();
    out.set_extension("bin");
    out
}
