//! Launching and stopping the traced application.
//!
//! [`Launcher`] describes the child process, [`TargetProcess`] owns the running child, and
//! [`StopHandle`] is the one way to interrupt it from elsewhere, typically a signal handler.
//! Stopping cancels the shared [`CancellationToken`], which the trimming pipeline checks
//! before any destructive step.

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{Error, Result};

#[cfg(unix)]
use crate::diagnostics::ReverseServer;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared cancellation flag.
///
/// Clones observe the same flag. Once cancelled it stays cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that is not cancelled
    #[must_use]
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Error::Cancelled)` once cancelled.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Description of the process to launch.
///
/// Program, arguments and working directory are passed through unmodified.
#[derive(Clone, Debug)]
pub struct Launcher {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    grace_period: Duration,
    cancel: CancellationToken,
}

impl Launcher {
    /// Launch `program`
    pub fn new<P: AsRef<Path>>(program: P) -> Launcher {
        Launcher {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            grace_period: Duration::from_secs(10),
            cancel: CancellationToken::new(),
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Launcher {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append arguments in order
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Launcher
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// Run the child in `dir`
    #[must_use]
    pub fn working_dir<P: AsRef<Path>>(mut self, dir: P) -> Launcher {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set an environment variable for the child
    #[must_use]
    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, key: K, value: V) -> Launcher {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// How long [`StopHandle::stop`] waits for a graceful exit before killing
    #[must_use]
    pub fn grace_period(mut self, grace: Duration) -> Launcher {
        self.grace_period = grace;
        self
    }

    /// Share `token` with the stop handles of launched processes
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Launcher {
        self.cancel = token;
        self
    }

    /// The program to launch
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Start the child.
    ///
    /// # Errors
    /// Returns an error if the process cannot be started.
    pub fn spawn(&self) -> Result<TargetProcess> {
        self.spawn_command(self.command())
    }

    /// Start the child suspended, connecting back to `server` before running managed code.
    ///
    /// # Errors
    /// Returns an error if the process cannot be started.
    #[cfg(unix)]
    pub fn spawn_suspended(&self, server: &ReverseServer) -> Result<TargetProcess> {
        let mut command = self.command();
        command.env(ReverseServer::ENV_NAME, server.env_value());
        self.spawn_command(command)
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_command(&self, mut command: Command) -> Result<TargetProcess> {
        let child = command.spawn().map_err(|error| {
            Error::Error(format!(
                "Failed to start {} - {}",
                self.program.display(),
                error
            ))
        })?;

        let pid = child.id();
        info!("Started {} (pid {})", self.program.display(), pid);

        Ok(TargetProcess {
            child: Arc::new(Mutex::new(child)),
            pid,
            stopped: Arc::new(AtomicBool::new(false)),
            grace_period: self.grace_period,
            cancel: self.cancel.clone(),
        })
    }
}

/// A running child process.
pub struct TargetProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
    stopped: Arc<AtomicBool>,
    grace_period: Duration,
    cancel: CancellationToken,
}

impl TargetProcess {
    /// Process id
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Token cancelled when the process is stopped through a [`StopHandle`]
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle that stops this process at most once
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            child: self.child.clone(),
            pid: self.pid,
            stopped: self.stopped.clone(),
            grace_period: self.grace_period,
            cancel: self.cancel.clone(),
        }
    }

    /// Whether the process is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(lock(&self.child).try_wait(), Ok(None))
    }

    /// Block until the process exits.
    ///
    /// # Errors
    /// Returns an error if the exit status cannot be queried.
    pub fn wait(&self) -> Result<ExitStatus> {
        loop {
            if let Some(status) = lock(&self.child).try_wait()? {
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Wait up to `timeout` for the process to exit.
    ///
    /// # Errors
    /// Returns an error if the exit status cannot be queried.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = lock(&self.child).try_wait()? {
                debug!("Process {} exited with {}", self.pid, status);
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Stops a [`TargetProcess`] from another thread.
///
/// Only the first call to [`StopHandle::stop`], across all clones, acts: it cancels the
/// token, asks the process to terminate, waits for the grace period and kills it if it is
/// still alive. It returns once the process has exited.
#[derive(Clone)]
pub struct StopHandle {
    child: Arc<Mutex<Child>>,
    pid: u32,
    stopped: Arc<AtomicBool>,
    grace_period: Duration,
    cancel: CancellationToken,
}

impl StopHandle {
    /// Stop the process. Returns `false` if it was already stopped through another call.
    ///
    /// # Errors
    /// Returns an error if the process cannot be killed or waited for.
    pub fn stop(&self) -> Result<bool> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        self.cancel.cancel();
        info!("Stopping process {}", self.pid);

        if lock(&self.child).try_wait()?.is_some() {
            return Ok(true);
        }

        self.terminate();

        let deadline = Instant::now() + self.grace_period;
        while Instant::now() < deadline {
            if lock(&self.child).try_wait()?.is_some() {
                return Ok(true);
            }
            thread::sleep(POLL_INTERVAL);
        }

        warn!(
            "Process {} did not exit within {:?}, killing it",
            self.pid, self.grace_period
        );
        let mut child = lock(&self.child);
        child.kill()?;
        child.wait()?;

        Ok(true)
    }

    /// Whether [`StopHandle::stop`] has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    #[cfg(unix)]
    fn terminate(&self) {
        match Command::new("kill")
            .arg("-TERM")
            .arg(self.pid.to_string())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => debug!("kill -TERM {} exited with {}", self.pid, status),
            Err(error) => debug!("kill -TERM {} failed - {}", self.pid, error),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) {}
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn runs_to_completion() {
        let target = Launcher::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let status = target.wait().unwrap();

        assert_eq!(status.code(), Some(3));
        assert!(!target.is_running());
    }

    #[test]
    fn passes_environment_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("here"), b"").unwrap();

        let status = Launcher::new("sh")
            .args(["-c", "test \"$MARKER\" = yes && test -f here"])
            .env("MARKER", "yes")
            .working_dir(dir.path())
            .spawn()
            .unwrap()
            .wait()
            .unwrap();

        assert!(status.success());
    }

    #[test]
    fn missing_program() {
        assert!(Launcher::new("/nonexistent/program").spawn().is_err());
    }

    #[test]
    fn stop_acts_once() {
        let token = CancellationToken::new();
        let target = Launcher::new("sleep")
            .arg("30")
            .grace_period(Duration::from_secs(5))
            .with_cancellation(token.clone())
            .spawn()
            .unwrap();

        let first = target.stop_handle();
        let second = first.clone();

        assert!(first.stop().unwrap());
        assert!(!second.stop().unwrap());
        assert!(second.is_stopped());
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
        assert!(!target.is_running());
    }

    #[test]
    fn stop_kills_after_grace() {
        let target = Launcher::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .grace_period(Duration::from_millis(200))
            .spawn()
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(target.stop_handle().stop().unwrap());
        assert!(target.wait_timeout(Duration::from_secs(1)).unwrap().is_some());
    }
}
