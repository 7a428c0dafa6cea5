use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{bail, Context};
use dotslim::{
    diagnostics::SessionConfig,
    prelude::{StopHandle, TargetProcess, TraceSummary, TrimListener},
    CancellationToken, Launcher, TraceCollector, Usage,
};
use log::info;

use crate::app::LaunchOptions;

/// What the Ctrl+C handler has to do.
pub enum Signal {
    /// Stop the traced child and let the run unwind
    Stop(StopHandle),
    /// The deployment is being modified; the run stops at its next checkpoint
    Cancel,
    /// Nothing to clean up, exit right away
    Exit,
}

enum Stage {
    Idle,
    Tracing(StopHandle),
    Cleanup,
}

/// Interrupt state shared with the Ctrl+C handler.
///
/// While a child is traced, the first interrupt takes its stop handle, so a second one
/// finds nothing to stop and exits. Once the deployment is being modified, interrupts only
/// cancel the run's token and never exit the process.
#[derive(Clone)]
pub struct Interrupt {
    stage: Arc<Mutex<Stage>>,
    cancel: CancellationToken,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self {
            stage: Arc::new(Mutex::new(Stage::Idle)),
            cancel: CancellationToken::new(),
        }
    }
}

impl Interrupt {
    /// Token the trimming run observes.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Store the handle of a freshly started child.
    pub fn arm(&self, handle: StopHandle) {
        *self.stage() = Stage::Tracing(handle);
    }

    /// Forget the child once its trace has drained.
    pub fn disarm(&self) {
        *self.stage() = Stage::Idle;
    }

    /// From now on interrupts cancel the token instead of exiting.
    pub fn begin_cleanup(&self) {
        *self.stage() = Stage::Cleanup;
    }

    /// Consume one interrupt.
    pub fn signal(&self) -> Signal {
        let mut stage = self.stage();
        match std::mem::replace(&mut *stage, Stage::Idle) {
            Stage::Tracing(handle) => Signal::Stop(handle),
            Stage::Cleanup => {
                *stage = Stage::Cleanup;
                self.cancel.cancel();
                Signal::Cancel
            }
            Stage::Idle => Signal::Exit,
        }
    }

    fn stage(&self) -> MutexGuard<'_, Stage> {
        self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Logs progress and arms the interrupt once the child is running.
pub struct CliListener {
    interrupt: Interrupt,
}

impl CliListener {
    pub fn new(interrupt: &Interrupt) -> Self {
        Self {
            interrupt: interrupt.clone(),
        }
    }
}

impl TrimListener for CliListener {
    fn on_file_removed(&self, path: &Path) {
        info!("Removed {}", path.display());
    }

    fn on_message(&self, message: &str) {
        info!("{message}");
    }

    fn on_process_started(&self, process: &TargetProcess) {
        self.interrupt.arm(process.stop_handle());
    }
}

/// Build the launcher for `PROGRAM [ARGS]...`.
pub fn launcher(launch: &LaunchOptions) -> anyhow::Result<Launcher> {
    let Some((program, args)) = launch.program.split_first() else {
        bail!("no program given; pass it and its arguments after `--`");
    };

    let mut launcher = Launcher::new(program)
        .args(args)
        .grace_period(Duration::from_secs(launch.grace_period));
    if let Some(dir) = &launch.working_dir {
        launcher = launcher.working_dir(dir);
    }

    Ok(launcher)
}

/// Session configuration for the launch options.
pub fn session_config(launch: &LaunchOptions) -> SessionConfig {
    SessionConfig::default().with_connect_timeout(Duration::from_secs(launch.connect_timeout))
}

/// Decode a recorded trace file into `usage`.
pub fn replay(path: &Path, usage: &mut Usage) -> anyhow::Result<TraceSummary> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open trace: {}", path.display()))?;

    TraceCollector::new(usage)
        .consume(file)
        .with_context(|| format!("failed to decode trace: {}", path.display()))
}

/// Read one type name per line, skipping blank lines.
pub fn read_used_types(path: &Path) -> anyhow::Result<HashSet<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read used types: {}", path.display()))?;

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Sorted display strings of a set of paths.
pub fn sorted_paths<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Vec<String> {
    let mut paths: Vec<String> = paths
        .into_iter()
        .map(|path| path.display().to_string())
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_stages() {
        let interrupt = Interrupt::default();
        assert!(matches!(interrupt.signal(), Signal::Exit));

        let child = Launcher::new("sleep").arg("5").spawn().unwrap();
        interrupt.arm(child.stop_handle());
        match interrupt.signal() {
            Signal::Stop(handle) => assert!(handle.stop().unwrap()),
            _ => panic!("expected the child's stop handle"),
        }
        assert!(matches!(interrupt.signal(), Signal::Exit));

        interrupt.arm(child.stop_handle());
        interrupt.disarm();
        assert!(matches!(interrupt.signal(), Signal::Exit));
    }

    #[test]
    fn interrupt_during_cleanup_only_cancels() {
        let interrupt = Interrupt::default();
        let token = interrupt.token();
        interrupt.begin_cleanup();

        assert!(matches!(interrupt.signal(), Signal::Cancel));
        assert!(token.is_cancelled());
        assert!(matches!(interrupt.signal(), Signal::Cancel));
    }
}
