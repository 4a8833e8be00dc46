//! Packs raw segment files into an executable image.
//!
//! # Usage
//! ```text
//! mkexe --text <file> [OPTIONS] -o <image>
//! ```
//!
//! # Options
//! - `--text <file>`: machine code, loaded at address 0
//! - `--rodata <file>`: read-only data following the text
//! - `--data <file>`: writable initialised data following the rodata
//! - `--bss <bytes>`: zero-filled bytes following the data
//! - `-o, --output <file>`: image to write
//! - `--inspect <image>`: print the segment sizes of an existing image

use std::env;
use std::fs;
use std::process;
use vproc::virtual_machine::executable::Executable;
use vproc::{error, info};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let mut text: Option<String> = None;
    let mut rodata: Option<String> = None;
    let mut data: Option<String> = None;
    let mut bss = 0u64;
    let mut output: Option<String> = None;
    let mut inspect: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let Some(value) = args.get(i + 1).cloned() else {
            error!("{flag} requires an argument");
            process::exit(1);
        };
        match flag {
            "--text" => text = Some(value),
            "--rodata" => rodata = Some(value),
            "--data" => data = Some(value),
            "--bss" => {
                bss = value.parse().unwrap_or_else(|_| {
                    error!("Invalid bss size: '{}' is not a number", value);
                    process::exit(1);
                })
            }
            "--output" | "-o" => output = Some(value),
            "--inspect" => inspect = Some(value),
            other => {
                error!("Unexpected argument: {}", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
        i += 2;
    }

    if let Some(path) = inspect {
        let exe = Executable::load(&path).unwrap_or_else(|e| {
            error!("Failed to load {}: {}", path, e);
            process::exit(1);
        });
        println!("text   {}", exe.text_len());
        println!("rodata {}", exe.rodata_len());
        println!("data   {}", exe.data_len());
        println!("bss    {}", exe.bss_len());
        return;
    }

    let Some(text) = text else {
        error!("--text is required");
        process::exit(1);
    };
    let Some(output) = output else {
        error!("--output is required");
        process::exit(1);
    };

    let exe = Executable::from_segments(
        &read_segment(&text),
        &rodata.as_deref().map(read_segment).unwrap_or_default(),
        &data.as_deref().map(read_segment).unwrap_or_default(),
        bss,
    );
    if let Err(e) = exe.save(&output) {
        error!("Failed to write {}: {}", output, e);
        process::exit(1);
    }
    info!(
        "wrote {} (text {}, rodata {}, data {}, bss {})",
        output,
        exe.text_len(),
        exe.rodata_len(),
        exe.data_len(),
        exe.bss_len()
    );
}

fn read_segment(path: &str) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|e| {
        error!("Failed to read {}: {}", path, e);
        process::exit(1);
    })
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} --text <file> [OPTIONS] -o <image>");
    eprintln!("       {program} --inspect <image>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --text <file>        Machine code segment");
    eprintln!("  --rodata <file>      Read-only data segment");
    eprintln!("  --data <file>        Initialised data segment");
    eprintln!("  --bss <bytes>        Zero-filled segment size");
    eprintln!("  -o, --output <file>  Image to write");
}
