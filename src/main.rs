//! Runs an executable image inside the sandboxed virtual processor.
//!
//! # Usage
//! ```text
//! vproc <image> [OPTIONS] [-- ARGS...]
//! ```
//!
//! # Arguments
//! - `image`: executable image produced by `mkexe`
//! - `ARGS`: passed to the process after the image path, which is `argv[0]`
//!
//! # Options
//! - `--fs`: allow the process to open files and change the filesystem
//! - `--seed <n>`: seed for the uninitialised memory fill (or `VPROC_SEED`)
//! - `--stack <bytes>`: stack reserve (defaults to 2 MiB)
//! - `--max-memory <bytes>`: address-space limit (defaults to 4 GiB - 1)
//! - `--blocking-stdin`: read stdin directly instead of suspending on it
//! - `-v, --verbose`: enable debug logging
//!
//! The process exit code becomes ours. A process that faults exits with 1.

use std::env;
use std::io::{self, Read};
use std::process;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use vproc::utils::log::VERBOSE;
use vproc::virtual_machine::executable::Executable;
use vproc::virtual_machine::fd::{InputStream, OutputStream, Pipe};
use vproc::virtual_machine::processor::{Processor, ProcessorConfig};
use vproc::{debug, error, info};

const DEFAULT_STACK: u64 = 2 << 20;
const SEED_ENV: &str = "VPROC_SEED";

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let image_path = &args[1];
    let mut config = ProcessorConfig::default();
    let mut stack = DEFAULT_STACK;
    let mut blocking_stdin = false;
    let mut program_args: Vec<&str> = vec![image_path.as_str()];

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--fs" => config.fs_enabled = true,
            "--blocking-stdin" => blocking_stdin = true,
            "--verbose" | "-v" => VERBOSE.store(true, Ordering::Relaxed),
            k @ ("--seed" | "--stack" | "--max-memory") => {
                i += 1;
                let value = parse_number(k, args.get(i));
                match k {
                    "--seed" => config.seed = Some(value),
                    "--stack" => stack = value,
                    _ => config.max_memory = value,
                }
            }
            "--" => {
                program_args.extend(args[i + 1..].iter().map(String::as_str));
                break;
            }
            other => {
                error!("Unexpected argument: {}", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
        i += 1;
    }

    if config.seed.is_none()
        && let Ok(value) = env::var(SEED_ENV)
    {
        config.seed = Some(parse_number(SEED_ENV, Some(&value)));
    }

    let exe = Executable::load(image_path).unwrap_or_else(|e| {
        error!("Failed to load {}: {}", image_path, e);
        process::exit(1);
    });

    let mut cpu = Processor::new(config);
    if let Err(e) = cpu.initialize(&exe, &program_args, stack) {
        error!("Failed to start {}: {}", image_path, e);
        process::exit(1);
    }

    let stdin = Pipe::new();
    let installed = if blocking_stdin {
        cpu.fds_mut().install(0, InputStream(io::stdin()), false)
    } else {
        cpu.fds_mut().install(0, stdin.clone(), true)
    };
    let installed = installed
        .and_then(|_| cpu.fds_mut().install(1, OutputStream(io::stdout()), false))
        .and_then(|_| cpu.fds_mut().install(2, OutputStream(io::stderr()), false));
    if let Err(e) = installed {
        error!("Failed to set up standard streams: {}", e);
        process::exit(1);
    }

    info!(
        "running {} ({} bytes of text, {} arguments)",
        image_path,
        exe.text_len(),
        program_args.len()
    );

    let input = spawn_stdin_reader(blocking_stdin);
    let mut ticks = 0;
    loop {
        ticks += cpu.run();
        if !cpu.suspended_read() {
            break;
        }
        match input.recv() {
            Ok(chunk) => {
                stdin.push(&chunk);
                while let Ok(more) = input.try_recv() {
                    stdin.push(&more);
                }
            }
            Err(_) => {
                debug!("stdin closed; delivering end of input");
                if let Err(e) = cpu.fds_mut().set_interactive(0, false) {
                    debug!("stdin descriptor already closed: {}", e);
                }
            }
        }
        cpu.resume_suspended_read();
    }

    match cpu.error() {
        None => {
            info!("process exited with {} after {} instructions", cpu.return_value(), ticks);
            process::exit(cpu.return_value());
        }
        Some(code) => {
            error!("process faulted at rip {:#x}: {}", cpu.rip(), code);
            process::exit(1);
        }
    }
}

/// Forwards stdin in chunks. With `blocking` the process reads stdin itself,
/// so the channel is closed straight away.
fn spawn_stdin_reader(blocking: bool) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if blocking {
        return rx;
    }
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn parse_number(flag: &str, value: Option<&String>) -> u64 {
    let Some(value) = value else {
        error!("{flag} requires an argument");
        process::exit(1);
    };
    value.parse().unwrap_or_else(|_| {
        error!("Invalid value for {flag}: '{value}' is not a number");
        process::exit(1);
    })
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} <image> [OPTIONS] [-- ARGS...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --fs                  Allow filesystem syscalls");
    eprintln!("  --seed <n>            Seed for uninitialised memory (env {SEED_ENV})");
    eprintln!("  --stack <bytes>       Stack reserve [default: {DEFAULT_STACK}]");
    eprintln!("  --max-memory <bytes>  Address-space limit");
    eprintln!("  --blocking-stdin      Read stdin directly instead of suspending");
    eprintln!("  -v, --verbose         Enable debug logging");
}
