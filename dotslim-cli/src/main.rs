#[cfg(not(unix))]
compile_error!("dotslim traces through Unix domain sockets and only builds on Unix");

mod app;
mod commands;
mod output;

use clap::Parser;

use crate::{
    app::{Cli, Command},
    commands::common::{Interrupt, Signal},
};

fn main() -> anyhow::Result<()> {
    // While tracing, Ctrl+C stops the child and lets the run unwind. While the deployment is
    // modified it only cancels the run. Otherwise it exits right away.
    let interrupt = Interrupt::default();
    let handler_interrupt = interrupt.clone();
    ctrlc::set_handler(move || match handler_interrupt.signal() {
        Signal::Stop(handle) => {
            eprintln!("\nStopping...");
            if let Err(error) = handle.stop() {
                eprintln!("failed to stop process: {error}");
            }
        }
        Signal::Cancel => eprintln!("\nFinishing the current step before stopping..."),
        Signal::Exit => {
            eprintln!("\nCancelled.");
            std::process::exit(130);
        }
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show dotslim info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("dotslim", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    let result = match &cli.command {
        Command::Trim {
            app_dir,
            dry_run,
            no_slim,
            keep_going,
            ignore_dir,
            nettrace,
            launch,
        } => commands::trim::run(
            &commands::trim::TrimArgs {
                app_dir: app_dir.as_deref(),
                dry_run: *dry_run,
                no_slim: *no_slim,
                keep_going: *keep_going,
                ignore_dirs: ignore_dir,
                nettrace: nettrace.as_deref(),
                launch,
            },
            &interrupt,
            &cli.global,
        ),
        Command::Trace {
            pid,
            nettrace,
            launch,
        } => commands::trace::run(*pid, nettrace.as_deref(), launch, &interrupt, &cli.global),
        Command::Inspect { path, used_types } => {
            commands::inspect::run(path, used_types.as_deref(), &cli.global)
        }
    };

    if let Err(error) = &result {
        if matches!(
            error.downcast_ref::<dotslim::Error>(),
            Some(dotslim::Error::Cancelled)
        ) {
            eprintln!("Cancelled.");
            std::process::exit(130);
        }
    }

    result
}
