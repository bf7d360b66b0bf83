//! `molten run <file.bc> [guest args...]`

mod args;
mod error;

use args::{CliArgs, ExecutionMode};
use molten_core::EngineConfig;
use molten_vm::Engine;
use std::process::ExitCode;

fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match args::parse_args(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("molten: {err}");
            eprintln!("{}", args::help_text());
            return ExitCode::from(error::EXIT_USAGE_ERROR);
        }
    };

    init_tracing(parsed.verbose);

    match &parsed.mode {
        ExecutionMode::PrintVersion => {
            println!("{}", args::version_string());
            ExitCode::from(error::EXIT_SUCCESS)
        }
        ExecutionMode::PrintHelp => {
            println!("{}", args::help_text());
            ExitCode::from(error::EXIT_SUCCESS)
        }
        ExecutionMode::Run(path) => run(&parsed, path),
    }
}

fn run(parsed: &CliArgs, path: &std::path::Path) -> ExitCode {
    let display = path.display().to_string();
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("molten: cannot read {display}: {err}");
            return ExitCode::from(error::EXIT_LOAD_ERROR);
        }
    };

    let mut config = EngineConfig::default();
    if let Some(limit) = parsed.stack_limit {
        config.stack_limit = limit;
    }
    // CLI-provided directories take priority over the environment.
    let mut paths = parsed.library_paths.clone();
    paths.append(&mut config.library_paths);
    config.library_paths = paths;
    config.preload_libraries = parsed.preload.clone();

    let engine = match Engine::load(&bytes, config) {
        Ok(engine) => engine,
        Err(err) => return error::report_load_error(&err, &display),
    };

    // argv[0] is the program path, as a native loader would pass it.
    let mut guest_args = vec![display];
    guest_args.extend(parsed.guest_args.iter().cloned());

    match engine.run(&guest_args) {
        Ok(code) => error::guest_exit(code),
        Err(trap) => error::report_trap(&trap),
    }
}

fn init_tracing(verbose: u32) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
