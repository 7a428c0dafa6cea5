//! Module slimmer: stubs out unused types in every used module of the deployment.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use strum::Display;

use crate::{
    file::File,
    launcher::CancellationToken,
    metadata::module::{ManagedModule, SlimOutcome},
    trace::Usage,
    trim::{TrimListener, TrimOptions},
    Result,
};

/// Why a used module was not slimmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SkipReason {
    /// The file no longer exists
    Missing,
    /// The file is not a managed module
    NotManaged,
    /// The file name carries a core library marker
    CoreLibrary,
    /// The module lives outside the deployment directory
    OutsideDeployment,
    /// Loading or rewriting failed and the run was configured to keep going
    Failed,
}

/// A module that was slimmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlimmedModule {
    /// Module path
    pub path: PathBuf,
    /// What was changed
    pub outcome: SlimOutcome,
}

/// A used module that was left alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedModule {
    /// Module path
    pub path: PathBuf,
    /// Why it was skipped
    pub reason: SkipReason,
    /// Error text for [`SkipReason::Failed`]
    pub detail: Option<String>,
}

/// Outcome of the slimming pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlimReport {
    /// Modules that were loaded and processed, changed or not
    pub slimmed: Vec<SlimmedModule>,
    /// Modules that were skipped
    pub skipped: Vec<SkippedModule>,
}

impl SlimReport {
    /// Total number of methods that now carry a stub body
    #[must_use]
    pub fn methods_stubbed(&self) -> usize {
        self.slimmed
            .iter()
            .map(|module| module.outcome.methods_stubbed + module.outcome.methods_redirected)
            .sum()
    }
}

/// Slim every used module under `root`, in path order.
///
/// Modules that are missing, not managed, marked as core libraries or outside `root` are
/// skipped. A module that fails to load or rewrite aborts the pass unless
/// [`TrimOptions::keep_going`] is set. `cancel` is checked before each module.
///
/// # Errors
/// Returns [`crate::Error::Cancelled`] once cancelled, or the first module failure.
pub fn slim_modules(
    usage: &Usage,
    root: &Path,
    options: &TrimOptions,
    listener: &dyn TrimListener,
    cancel: &CancellationToken,
) -> Result<SlimReport> {
    let mut paths: Vec<&PathBuf> = usage.modules().iter().collect();
    paths.sort();

    let mut report = SlimReport::default();
    for path in paths {
        cancel.check()?;

        let reason = if !path.starts_with(root) {
            Some(SkipReason::OutsideDeployment)
        } else if !path.is_file() {
            Some(SkipReason::Missing)
        } else if options.is_core_library(path) {
            Some(SkipReason::CoreLibrary)
        } else if !File::is_managed(path) {
            Some(SkipReason::NotManaged)
        } else {
            None
        };

        if let Some(reason) = reason {
            debug!("Not slimming {} ({})", path.display(), reason);
            report.skipped.push(SkippedModule {
                path: path.clone(),
                reason,
                detail: None,
            });
            continue;
        }

        match slim_module(path, usage.types(), options) {
            Ok(outcome) => {
                if outcome.changed() {
                    listener.on_message(&format!(
                        "{} {}: {} methods in {} types",
                        if options.dry_run { "Would slim" } else { "Slimmed" },
                        path.display(),
                        outcome.methods_stubbed + outcome.methods_redirected,
                        outcome.types_pruned
                    ));
                }
                report.slimmed.push(SlimmedModule {
                    path: path.clone(),
                    outcome,
                });
            }
            Err(error) if options.keep_going => {
                warn!("Skipping {} - {}", path.display(), error);
                report.skipped.push(SkippedModule {
                    path: path.clone(),
                    reason: SkipReason::Failed,
                    detail: Some(error.to_string()),
                });
            }
            Err(error) => return Err(error),
        }
    }

    Ok(report)
}

/// Load, slim and, unless this is a dry run, rewrite one module.
///
/// # Errors
/// Returns an error if the module cannot be loaded, slimmed or written back.
pub fn slim_module(
    path: &Path,
    used_types: &HashSet<String>,
    options: &TrimOptions,
) -> Result<SlimOutcome> {
    let mut module = ManagedModule::from_file(path)?;
    let mut outcome = module.slim(used_types)?;

    if module.is_modified() && !options.dry_run {
        module.save()?;
        outcome.rewritten = true;
    }

    Ok(outcome)
}
