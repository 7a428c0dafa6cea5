//! Module diff: managed modules on disk minus the modules observed in the trace.

use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use rayon::prelude::*;
use walkdir::{DirEntry, WalkDir};

use crate::{
    file::File,
    trace::Usage,
    trim::{TrimListener, TrimOptions},
    Result,
};

/// Ignored directories are pruned with their whole subtree; the root itself is never pruned.
fn is_ignored_dir(entry: &DirEntry, options: &TrimOptions) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| options.is_ignored_dir(name))
}

/// Managed modules under `root`, sorted.
///
/// Files need the module extension and must pass the managed-module sniff; the sniff runs
/// in parallel.
///
/// # Errors
/// Returns an error if the directory tree cannot be walked.
pub fn scan_modules(root: &Path, options: &TrimOptions) -> Result<Vec<PathBuf>> {
    let mut modules = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry, options))
        .par_bridge()
        .filter_map(|entry| match entry {
            Ok(entry) => {
                let path = entry.path();
                if entry.file_type().is_file()
                    && options.is_module_name(path)
                    && File::is_managed(path)
                {
                    Some(Ok(path.to_path_buf()))
                } else {
                    None
                }
            }
            Err(error) => Some(Err(error.into())),
        })
        .collect::<Result<Vec<_>>>()?;

    modules.sort();
    Ok(modules)
}

/// Result of comparing the deployment against the observed usage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleDiff {
    /// Every managed module found on disk
    pub modules: Vec<PathBuf>,
    /// Modules on disk that were never observed
    pub unused: BTreeSet<PathBuf>,
    /// Summed size of the unused modules
    pub unused_bytes: u64,
}

impl ModuleDiff {
    /// Scan `root` and subtract the used modules.
    ///
    /// # Errors
    /// Returns an error if the directory tree cannot be walked.
    pub fn compute(root: &Path, options: &TrimOptions, usage: &Usage) -> Result<ModuleDiff> {
        let modules = scan_modules(root, options)?;
        Ok(ModuleDiff::from_modules(modules, usage))
    }

    /// Subtract the used modules from `modules`, by exact path equality.
    #[must_use]
    pub fn from_modules(modules: Vec<PathBuf>, usage: &Usage) -> ModuleDiff {
        let unused: BTreeSet<PathBuf> = modules
            .iter()
            .filter(|path| !usage.contains_module(path))
            .cloned()
            .collect();

        let unused_bytes = unused
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|metadata| metadata.len())
            .sum();

        debug!(
            "{} modules on disk, {} unused ({} bytes)",
            modules.len(),
            unused.len(),
            unused_bytes
        );

        ModuleDiff {
            modules,
            unused,
            unused_bytes,
        }
    }

    /// File names of the unused modules, the key manifests are matched by
    #[must_use]
    pub fn unused_file_names(&self) -> HashSet<String> {
        self.unused
            .iter()
            .filter_map(|path| path.file_name())
            .filter_map(|name| name.to_str())
            .map(str::to_string)
            .collect()
    }

    /// Whether `path` is an unused module
    #[must_use]
    pub fn is_unused(&self, path: &Path) -> bool {
        self.unused.contains(path)
    }
}

/// Files deleted for the unused modules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Removal {
    /// Deleted module files
    pub modules: Vec<PathBuf>,
    /// Deleted symbol files
    pub symbols: Vec<PathBuf>,
    /// Bytes freed
    pub bytes: u64,
}

/// Delete every unused module and its paired symbol file.
///
/// In a dry run nothing is deleted; the files that would be are reported as messages and
/// still listed in the returned [`Removal`].
///
/// # Errors
/// Returns an error if a file cannot be deleted.
pub fn remove_unused(
    diff: &ModuleDiff,
    options: &TrimOptions,
    listener: &dyn TrimListener,
) -> Result<Removal> {
    let mut removal = Removal::default();

    for module in &diff.unused {
        removal.bytes += remove_file(module, options, listener)?;
        removal.modules.push(module.clone());

        let symbols = module.with_extension(&options.symbol_extension);
        if symbols.is_file() {
            removal.bytes += remove_file(&symbols, options, listener)?;
            removal.symbols.push(symbols);
        }
    }

    Ok(removal)
}

fn remove_file(path: &Path, options: &TrimOptions, listener: &dyn TrimListener) -> Result<u64> {
    let size = fs::metadata(path).map(|metadata| metadata.len()).unwrap_or(0);

    if options.dry_run {
        listener.on_message(&format!("Would remove {}", path.display()));
    } else {
        fs::remove_file(path)?;
        listener.on_file_removed(path);
    }

    Ok(size)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::test::TestImage;

    #[derive(Default)]
    struct Recorder {
        removed: Mutex<Vec<PathBuf>>,
        messages: Mutex<Vec<String>>,
    }

    impl TrimListener for Recorder {
        fn on_file_removed(&self, path: &Path) {
            self.removed.lock().unwrap().push(path.to_path_buf());
        }

        fn on_message(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn deployment() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::write(root.join("A.dll"), TestImage::new("A").build()).unwrap();
        fs::write(root.join("B.dll"), TestImage::new("B").build()).unwrap();
        fs::write(root.join("B.pdb"), b"symbols").unwrap();
        fs::write(root.join("native.dll"), b"MZ not managed").unwrap();
        fs::write(root.join("notes.txt"), b"text").unwrap();

        fs::create_dir_all(root.join("runtimes/linux-x64/lib")).unwrap();
        fs::write(
            root.join("runtimes/linux-x64/lib/C.dll"),
            TestImage::new("C").build(),
        )
        .unwrap();

        fs::create_dir_all(root.join("plugins")).unwrap();
        fs::write(root.join("plugins/D.dll"), TestImage::new("D").build()).unwrap();

        dir
    }

    #[test]
    fn scan_sniffs_and_prunes() {
        let dir = deployment();
        let root = dir.path().canonicalize().unwrap();

        let modules = scan_modules(&root, &TrimOptions::default()).unwrap();
        assert_eq!(
            modules,
            vec![root.join("A.dll"), root.join("B.dll"), root.join("plugins/D.dll")]
        );
    }

    #[test]
    fn used_modules_are_never_unused() {
        let dir = deployment();
        let root = dir.path().canonicalize().unwrap();

        let mut usage = Usage::default();
        usage.add_module(root.join("A.dll").to_str().unwrap());
        usage.add_module(root.join("plugins/D.dll").to_str().unwrap());
        usage.add_module("/elsewhere/B.dll");

        let diff = ModuleDiff::compute(&root, &TrimOptions::default(), &usage).unwrap();
        assert_eq!(diff.unused.len(), 1);
        assert!(diff.is_unused(&root.join("B.dll")));
        for used in usage.modules() {
            assert!(!diff.is_unused(used));
        }
        assert_eq!(
            diff.unused_bytes,
            fs::metadata(root.join("B.dll")).unwrap().len()
        );
        assert_eq!(
            diff.unused_file_names(),
            ["B.dll".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn removes_module_and_symbols() {
        let dir = deployment();
        let root = dir.path().canonicalize().unwrap();
        let diff = ModuleDiff::compute(&root, &TrimOptions::default(), &Usage::default()).unwrap();

        let recorder = Recorder::default();
        let removal = remove_unused(&diff, &TrimOptions::default(), &recorder).unwrap();

        assert_eq!(removal.modules.len(), 3);
        assert_eq!(removal.symbols, vec![root.join("B.pdb")]);
        assert!(!root.join("B.dll").exists());
        assert!(!root.join("B.pdb").exists());
        assert!(root.join("native.dll").exists());
        assert!(root.join("runtimes/linux-x64/lib/C.dll").exists());
        assert_eq!(recorder.removed.lock().unwrap().len(), 4);
    }

    #[test]
    fn dry_run_keeps_files() {
        let dir = deployment();
        let root = dir.path().canonicalize().unwrap();
        let options = TrimOptions::default().with_dry_run(true);
        let diff = ModuleDiff::compute(&root, &options, &Usage::default()).unwrap();

        let recorder = Recorder::default();
        let removal = remove_unused(&diff, &options, &recorder).unwrap();

        assert_eq!(removal.modules.len(), 3);
        assert!(root.join("B.dll").exists());
        assert!(recorder.removed.lock().unwrap().is_empty());
        assert_eq!(recorder.messages.lock().unwrap().len(), 4);
    }
}
