use std::{ffi::OsString, path::PathBuf};

use clap::{Parser, Subcommand};

/// dotslim - trace a .NET application and trim its deployment to what it used
#[derive(Debug, Parser)]
#[command(name = "dotslim", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Options of the traced process launch.
#[derive(Debug, Parser)]
pub struct LaunchOptions {
    /// Working directory of the launched program.
    #[arg(long, value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Seconds to wait for the runtime to connect to the diagnostics port.
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub connect_timeout: u64,

    /// Seconds a stopped program gets to exit before it is killed.
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    pub grace_period: u64,

    /// Program to launch and its arguments, passed through unmodified.
    #[arg(last = true, value_name = "PROGRAM")]
    pub program: Vec<OsString>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch a program under a trace, then trim its deployment.
    Trim {
        /// Deployment directory. Defaults to the working directory.
        #[arg(long, value_name = "DIR")]
        app_dir: Option<PathBuf>,

        /// Report what would change without touching any file.
        #[arg(long)]
        dry_run: bool,

        /// Only delete unused modules; leave used modules untouched.
        #[arg(long)]
        no_slim: bool,

        /// Skip modules that fail to slim instead of aborting.
        #[arg(long)]
        keep_going: bool,

        /// Additional directory name whose subtrees are never scanned.
        #[arg(long, value_name = "NAME")]
        ignore_dir: Vec<String>,

        /// Replay a recorded trace instead of launching the program.
        #[arg(long, value_name = "FILE")]
        nettrace: Option<PathBuf>,

        #[command(flatten)]
        launch: LaunchOptions,
    },

    /// Collect and print the modules and types a program uses.
    Trace {
        /// Attach to a running process instead of launching one.
        #[arg(long, value_name = "PID")]
        pid: Option<u32>,

        /// Decode a recorded trace file.
        #[arg(long, value_name = "FILE", conflicts_with = "pid")]
        nettrace: Option<PathBuf>,

        #[command(flatten)]
        launch: LaunchOptions,
    },

    /// List the top-level types of a module and whether they would be slimmed.
    Inspect {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// File with one used type name per line.
        #[arg(long, value_name = "FILE")]
        used_types: Option<PathBuf>,
    },
}
