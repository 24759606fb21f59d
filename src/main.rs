//! # perftop - Main Entry Point
//!
//! Parses the CLI, resolves the immutable run configuration, and hands off
//! to the control loop. Exit codes distinguish permission problems (77) and
//! configuration mistakes (2) from everything else (1) so wrapper scripts
//! can react sensibly.

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use perftop::cli::Args;
use perftop::config::TopConfig;
use perftop::domain::ProfilerError;
use perftop::top;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn run(args: &Args) -> Result<()> {
    let cfg = TopConfig::from_args(args)?;
    top::run(&cfg)
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ProfilerError>().map_or(EXIT_ERROR, ProfilerError::exit_code)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();
}
