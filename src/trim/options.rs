use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Configuration of a trimming run.
///
/// # Examples
///
/// ```rust
/// use dotslim::TrimOptions;
///
/// let options = TrimOptions::new("publish")
///     .with_ignore_dir("native")
///     .with_dry_run(true);
///
/// assert!(options.ignore_dirs.iter().any(|dir| dir == "runtimes"));
/// assert!(options.dry_run);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrimOptions {
    /// Deployment directory
    pub root: PathBuf,
    /// Extension of module files, without the dot
    pub module_extension: String,
    /// Extension of paired debug symbol files, without the dot
    pub symbol_extension: String,
    /// File name suffix of dependency manifests
    pub manifest_suffix: String,
    /// Directory names whose subtrees are never scanned
    pub ignore_dirs: Vec<String>,
    /// File name substrings that mark modules which are never slimmed
    pub core_markers: Vec<String>,
    /// Stub out unused types in used modules
    pub slim: bool,
    /// Report what would change without touching the disk
    pub dry_run: bool,
    /// Skip modules that fail to slim instead of aborting
    pub keep_going: bool,
}

impl Default for TrimOptions {
    fn default() -> Self {
        TrimOptions {
            root: PathBuf::from("."),
            module_extension: "dll".to_string(),
            symbol_extension: "pdb".to_string(),
            manifest_suffix: ".deps.json".to_string(),
            ignore_dirs: vec!["runtimes".to_string()],
            core_markers: vec!["System.Private.CoreLib".to_string()],
            slim: true,
            dry_run: false,
            keep_going: false,
        }
    }
}

impl TrimOptions {
    /// Default options for the deployment in `root`
    pub fn new<P: AsRef<Path>>(root: P) -> TrimOptions {
        TrimOptions {
            root: root.as_ref().to_path_buf(),
            ..TrimOptions::default()
        }
    }

    /// Set the module extension
    #[must_use]
    pub fn with_module_extension(mut self, extension: &str) -> Self {
        self.module_extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Set the symbol file extension
    #[must_use]
    pub fn with_symbol_extension(mut self, extension: &str) -> Self {
        self.symbol_extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Set the manifest suffix
    #[must_use]
    pub fn with_manifest_suffix(mut self, suffix: &str) -> Self {
        self.manifest_suffix = suffix.to_string();
        self
    }

    /// Add an ignored directory name
    #[must_use]
    pub fn with_ignore_dir(mut self, name: &str) -> Self {
        self.ignore_dirs.push(name.to_string());
        self
    }

    /// Add a core library marker
    #[must_use]
    pub fn with_core_marker(mut self, marker: &str) -> Self {
        self.core_markers.push(marker.to_string());
        self
    }

    /// Enable or disable slimming
    #[must_use]
    pub fn with_slim(mut self, slim: bool) -> Self {
        self.slim = slim;
        self
    }

    /// Enable or disable dry runs
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable or disable skipping modules that fail to slim
    #[must_use]
    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Absolute, symlink-free deployment root.
    ///
    /// # Errors
    /// Returns an error if the root does not exist or is not a directory.
    pub fn resolve_root(&self) -> Result<PathBuf> {
        let root = self.root.canonicalize().map_err(|error| {
            Error::Error(format!(
                "Cannot resolve deployment directory {} - {}",
                self.root.display(),
                error
            ))
        })?;

        if !root.is_dir() {
            return Err(Error::Error(format!(
                "Deployment path {} is not a directory",
                root.display()
            )));
        }

        Ok(root)
    }

    /// Whether `path` has the module extension, compared case-insensitively
    #[must_use]
    pub fn is_module_name(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case(&self.module_extension))
    }

    /// Whether the file name of `path` contains a core library marker
    #[must_use]
    pub fn is_core_library(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.core_markers.iter().any(|marker| name.contains(marker)))
    }

    /// Whether `name` is an ignored directory name
    #[must_use]
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignore_dirs.iter().any(|dir| dir == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = TrimOptions::default();

        assert_eq!(options.module_extension, "dll");
        assert_eq!(options.symbol_extension, "pdb");
        assert_eq!(options.manifest_suffix, ".deps.json");
        assert!(options.slim);
        assert!(!options.dry_run);
        assert!(!options.keep_going);
    }

    #[test]
    fn predicates() {
        let options = TrimOptions::default().with_module_extension(".dll");

        assert!(options.is_module_name(Path::new("/app/A.dll")));
        assert!(options.is_module_name(Path::new("/app/A.DLL")));
        assert!(!options.is_module_name(Path::new("/app/A.pdb")));
        assert!(!options.is_module_name(Path::new("/app/dll")));

        assert!(options.is_core_library(Path::new("/app/System.Private.CoreLib.dll")));
        assert!(!options.is_core_library(Path::new("/app/System.Runtime.dll")));

        assert!(options.is_ignored_dir("runtimes"));
        assert!(!options.is_ignored_dir("runtime"));
    }

    #[test]
    fn resolve_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"").unwrap();

        assert!(TrimOptions::new(dir.path()).resolve_root().is_ok());
        assert!(TrimOptions::new(&file).resolve_root().is_err());
        assert!(TrimOptions::new(dir.path().join("missing"))
            .resolve_root()
            .is_err());
    }
}
