use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::{
    launcher::CancellationToken,
    trace::{TraceSummary, Usage},
    trim::{
        diff::{remove_unused, ModuleDiff},
        manifest::{tidy_manifests, ManifestOutcome},
        slim::{slim_modules, SlimReport},
        TrimOptions,
    },
    Result,
};

#[cfg(unix)]
use crate::{
    diagnostics::{ReverseServer, SessionConfig},
    launcher::{Launcher, TargetProcess},
    trace::TraceCollector,
    Error,
};

/// Receives progress while a deployment is trimmed.
///
/// Listeners only observe; they have no influence on what is trimmed.
pub trait TrimListener {
    /// A file was deleted
    fn on_file_removed(&self, path: &Path);

    /// Free-form progress message
    fn on_message(&self, message: &str);

    /// The traced process was started. This is the moment to keep a
    /// [`crate::launcher::StopHandle`] for interrupting the run.
    #[cfg(unix)]
    fn on_process_started(&self, _process: &TargetProcess) {}
}

/// Forwards progress to the `log` facade at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogListener;

impl TrimListener for LogListener {
    fn on_file_removed(&self, path: &Path) {
        info!("Removed {}", path.display());
    }

    fn on_message(&self, message: &str) {
        info!("{}", message);
    }
}

/// Discards all progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullListener;

impl TrimListener for NullListener {
    fn on_file_removed(&self, _path: &Path) {}

    fn on_message(&self, _message: &str) {}
}

/// Outcome of a trimming run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrimReport {
    /// Resolved deployment directory
    pub root: PathBuf,
    /// Trace counters, when the usage was collected by this run
    pub trace: Option<TraceSummary>,
    /// Number of observed modules
    pub used_modules: usize,
    /// Number of observed types
    pub used_types: usize,
    /// Managed modules found on disk
    pub modules_on_disk: usize,
    /// Deleted (or, in a dry run, deletable) modules
    pub removed_modules: Vec<PathBuf>,
    /// Deleted symbol files
    pub removed_symbols: Vec<PathBuf>,
    /// Bytes freed by the deletions
    pub freed_bytes: u64,
    /// Slimming outcome
    pub slim: SlimReport,
    /// Manifest outcomes
    pub manifests: Vec<ManifestOutcome>,
    /// Nothing was written
    pub dry_run: bool,
}

/// Sequences the trimming phases over one deployment.
///
/// Phases run strictly in order: trace (when launching), diff, deletion, slimming and
/// manifest tidy. The cancellation token is checked before every destructive phase, so an
/// interrupted run never starts deleting or rewriting.
///
/// # Examples
///
/// ```rust,no_run
/// use dotslim::{trace::Usage, TrimOptions, Trimmer};
///
/// let mut usage = Usage::default();
/// usage.add_module("/srv/app/App.dll");
/// usage.add_type("App.Program");
///
/// let report = Trimmer::new(TrimOptions::new("/srv/app").with_dry_run(true)).trim(&usage)?;
/// println!("{} modules could go", report.removed_modules.len());
/// # Ok::<(), dotslim::Error>(())
/// ```
pub struct Trimmer<'a> {
    options: TrimOptions,
    listener: &'a dyn TrimListener,
    cancel: CancellationToken,
}

impl Trimmer<'static> {
    /// Trimmer reporting through [`LogListener`]
    #[must_use]
    pub fn new(options: TrimOptions) -> Trimmer<'static> {
        Trimmer {
            options,
            listener: &LogListener,
            cancel: CancellationToken::new(),
        }
    }
}

impl<'a> Trimmer<'a> {
    /// Report progress to `listener` instead
    #[must_use]
    pub fn with_listener<'b>(self, listener: &'b dyn TrimListener) -> Trimmer<'b> {
        Trimmer {
            options: self.options,
            listener,
            cancel: self.cancel,
        }
    }

    /// Observe `token` for cancellation
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The cancellation token of this run
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The run configuration
    #[must_use]
    pub fn options(&self) -> &TrimOptions {
        &self.options
    }

    /// Launch the application suspended, trace it until it exits and return what it used.
    ///
    /// # Errors
    /// Returns an error if the process cannot be started, never connects, the trace fails
    /// to decode, or the run was cancelled.
    #[cfg(unix)]
    pub fn collect(
        &self,
        launcher: &Launcher,
        session: &SessionConfig,
    ) -> Result<(Usage, TraceSummary)> {
        self.cancel.check()?;

        let server = ReverseServer::bind()?;
        let launcher = launcher.clone().with_cancellation(self.cancel.clone());
        let target = launcher.spawn_suspended(&server)?;
        self.listener.on_process_started(&target);

        let mut usage = Usage::default();
        let summary = match TraceCollector::new(&mut usage).launched(&target, &server, session) {
            Ok(summary) => summary,
            Err(error) => {
                let cancelled = self.cancel.is_cancelled();
                if target.is_running() {
                    if let Err(stop_error) = target.stop_handle().stop() {
                        warn!("Failed to stop process {} - {}", target.pid(), stop_error);
                    }
                }
                return Err(if cancelled { Error::Cancelled } else { error });
            }
        };

        self.cancel.check()?;
        info!(
            "Trace complete: {} events, {} modules and {} types used",
            summary.events,
            usage.modules().len(),
            usage.types().len()
        );

        Ok((usage, summary))
    }

    /// Trim the deployment against `usage`.
    ///
    /// Unused modules are deleted and the manifests tidied in one step that cancellation
    /// does not interrupt. Slimming follows and stops at the next module once cancelled.
    ///
    /// # Errors
    /// Returns an error if the deployment cannot be resolved or scanned, a file cannot be
    /// deleted, a module fails to slim (unless keep-going is set), a manifest fails to
    /// tidy, or the run was cancelled.
    pub fn trim(&self, usage: &Usage) -> Result<TrimReport> {
        let root = self.options.resolve_root()?;
        self.cancel.check()?;

        let diff = ModuleDiff::compute(&root, &self.options, usage)?;
        self.listener.on_message(&format!(
            "{} of {} modules unused ({} bytes)",
            diff.unused.len(),
            diff.modules.len(),
            diff.unused_bytes
        ));

        // Last checkpoint before the deployment changes. Deletion and manifest tidy form one
        // step; a manifest must never list a module that is gone.
        self.cancel.check()?;
        let removal = remove_unused(&diff, &self.options, self.listener)?;
        let manifests = tidy_manifests(
            &root,
            &diff.unused_file_names(),
            &self.options,
            self.listener,
        )?;

        let slim = if self.options.slim {
            slim_modules(usage, &root, &self.options, self.listener, &self.cancel)?
        } else {
            SlimReport::default()
        };

        Ok(TrimReport {
            root,
            trace: None,
            used_modules: usage.modules().len(),
            used_types: usage.types().len(),
            modules_on_disk: diff.modules.len(),
            removed_modules: removal.modules,
            removed_symbols: removal.symbols,
            freed_bytes: removal.bytes,
            slim,
            manifests,
            dry_run: self.options.dry_run,
        })
    }

    /// Trace the application, then trim the deployment.
    ///
    /// The deployment directory is resolved before anything is launched.
    ///
    /// # Errors
    /// Any error of [`Trimmer::collect`] or [`Trimmer::trim`].
    #[cfg(unix)]
    pub fn run(&self, launcher: &Launcher, session: &SessionConfig) -> Result<TrimReport> {
        self.options.resolve_root()?;

        let (usage, summary) = self.collect(launcher, session)?;
        let mut report = self.trim(&usage)?;
        report.trace = Some(summary);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Mutex};

    use super::*;
    use crate::test::{TestImage, TestMethod, TestType};

    #[derive(Default)]
    struct Recorder {
        removed: Mutex<Vec<PathBuf>>,
    }

    impl TrimListener for Recorder {
        fn on_file_removed(&self, path: &Path) {
            self.removed.lock().unwrap().push(path.to_path_buf());
        }

        fn on_message(&self, _message: &str) {}
    }

    fn deployment() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let app = TestImage::new("A")
            .with_type(
                TestType::class("App", "T1")
                    .with_method(TestMethod::ctor())
                    .with_method(TestMethod::new("Run")),
            )
            .with_type(
                TestType::class("App", "T2")
                    .with_method(TestMethod::ctor())
                    .with_method(TestMethod::new("Run")),
            )
            .build();
        fs::write(root.join("A.dll"), app).unwrap();
        fs::write(root.join("B.dll"), TestImage::new("B").build()).unwrap();
        fs::write(root.join("B.pdb"), b"symbols").unwrap();

        (dir, root)
    }

    fn usage(root: &Path) -> Usage {
        let mut usage = Usage::default();
        usage.add_module(root.join("A.dll").to_str().unwrap());
        usage.add_type("App.T1");
        usage
    }

    #[test]
    fn trims_deployment() {
        let (_dir, root) = deployment();
        let recorder = Recorder::default();

        let report = Trimmer::new(TrimOptions::new(&root))
            .with_listener(&recorder)
            .trim(&usage(&root))
            .unwrap();

        assert_eq!(report.removed_modules, vec![root.join("B.dll")]);
        assert_eq!(report.removed_symbols, vec![root.join("B.pdb")]);
        assert_eq!(report.modules_on_disk, 2);
        assert_eq!(report.slim.methods_stubbed(), 1);
        assert!(report.freed_bytes > 0);
        assert_eq!(recorder.removed.lock().unwrap().len(), 2);
    }

    #[test]
    fn cancelled_run_touches_nothing() {
        let (_dir, root) = deployment();
        let before = fs::read(root.join("A.dll")).unwrap();

        let trimmer = Trimmer::new(TrimOptions::new(&root)).with_listener(&NullListener);
        trimmer.cancellation().cancel();

        assert!(matches!(
            trimmer.trim(&usage(&root)),
            Err(crate::Error::Cancelled)
        ));
        assert!(root.join("B.dll").exists());
        assert_eq!(fs::read(root.join("A.dll")).unwrap(), before);
    }

    struct CancelOnRemove(CancellationToken);

    impl TrimListener for CancelOnRemove {
        fn on_file_removed(&self, _path: &Path) {
            self.0.cancel();
        }

        fn on_message(&self, _message: &str) {}
    }

    #[test]
    fn cancel_during_deletion_still_tidies_manifest() {
        let (_dir, root) = deployment();
        let before = fs::read(root.join("A.dll")).unwrap();
        fs::write(
            root.join("A.deps.json"),
            r#"{
  "targets": {
    ".NETCoreApp,Version=v8.0": {
      "A/1.0.0": { "runtime": { "A.dll": {} } },
      "B/1.0.0": { "runtime": { "B.dll": {} } }
    }
  }
}
"#,
        )
        .unwrap();

        let token = CancellationToken::new();
        let listener = CancelOnRemove(token.clone());
        let result = Trimmer::new(TrimOptions::new(&root))
            .with_listener(&listener)
            .with_cancellation(token)
            .trim(&usage(&root));

        assert!(matches!(result, Err(crate::Error::Cancelled)));
        assert!(!root.join("B.dll").exists());
        assert!(!root.join("B.pdb").exists());
        let manifest = fs::read_to_string(root.join("A.deps.json")).unwrap();
        assert!(!manifest.contains("B.dll"));
        assert!(manifest.contains("A.dll"));
        assert_eq!(fs::read(root.join("A.dll")).unwrap(), before);
    }

    #[test]
    fn missing_deployment() {
        let trimmer = Trimmer::new(TrimOptions::new("/nonexistent/deployment"));
        assert!(trimmer.trim(&Usage::default()).is_err());
    }

    #[test]
    fn without_slimming() {
        let (_dir, root) = deployment();
        let before = fs::read(root.join("A.dll")).unwrap();

        let report = Trimmer::new(TrimOptions::new(&root).with_slim(false))
            .with_listener(&NullListener)
            .trim(&usage(&root))
            .unwrap();

        assert!(report.slim.slimmed.is_empty());
        assert_eq!(fs::read(root.join("A.dll")).unwrap(), before);
        assert!(!root.join("B.dll").exists());
    }

    #[cfg(unix)]
    #[test]
    fn missing_program_aborts_before_trimming() {
        let (_dir, root) = deployment();
        let trimmer = Trimmer::new(TrimOptions::new(&root)).with_listener(&NullListener);

        let result = trimmer.run(
            &Launcher::new("/nonexistent/program"),
            &SessionConfig::default(),
        );
        assert!(result.is_err());
        assert!(root.join("B.dll").exists());
    }
}
