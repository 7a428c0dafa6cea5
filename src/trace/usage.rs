use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use crate::trace::TraceRecord;

/// Modules and types observed during a traced run.
///
/// Both sets only grow. Recording the same record twice leaves them unchanged, and two
/// `Usage` values combine by set union through [`Usage::merge`].
///
/// # Examples
///
/// ```rust
/// use dotslim::trace::{TraceRecord, Usage};
///
/// let mut usage = Usage::default();
/// usage.record(&TraceRecord::ModuleLoad("/app/App.dll".into()));
/// usage.record(&TraceRecord::TypeLoad("App.Program".into()));
/// usage.record(&TraceRecord::TypeLoad("  ".into()));
///
/// assert!(usage.contains_module("/app/App.dll".as_ref()));
/// assert!(usage.contains_type("App.Program"));
/// assert_eq!(usage.types().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    modules: HashSet<PathBuf>,
    types: HashSet<String>,
}

impl Usage {
    /// Apply one record. Returns `false` if the record only carried blank values.
    pub fn record(&mut self, record: &TraceRecord) -> bool {
        match record {
            TraceRecord::ModuleProbe(path)
            | TraceRecord::ResolutionResult(path)
            | TraceRecord::ModuleLoad(path) => self.add_module(path),
            TraceRecord::TypeLoad(name) | TraceRecord::EntryPoint(name) => self.add_type(name),
            TraceRecord::BulkType(names) => names
                .iter()
                .fold(false, |recorded, name| self.add_type(name) || recorded),
        }
    }

    /// Add a module path; blank paths are ignored
    pub fn add_module(&mut self, path: &str) -> bool {
        if path.trim().is_empty() {
            return false;
        }
        self.modules.insert(PathBuf::from(path));
        true
    }

    /// Add a type name; blank names are ignored
    pub fn add_type(&mut self, name: &str) -> bool {
        if name.trim().is_empty() {
            return false;
        }
        self.types.insert(name.to_string());
        true
    }

    /// Union `other` into `self`
    pub fn merge(&mut self, other: Usage) {
        self.modules.extend(other.modules);
        self.types.extend(other.types);
    }

    /// Whether `path` was observed, by exact path equality
    #[must_use]
    pub fn contains_module(&self, path: &Path) -> bool {
        self.modules.contains(path)
    }

    /// Whether the type `name` was observed
    #[must_use]
    pub fn contains_type(&self, name: &str) -> bool {
        self.types.contains(name)
    }

    /// Observed module paths
    #[must_use]
    pub fn modules(&self) -> &HashSet<PathBuf> {
        &self.modules
    }

    /// Observed type names
    #[must_use]
    pub fn types(&self) -> &HashSet<String> {
        &self.types
    }

    /// Returns `true` if nothing was observed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_is_idempotent() {
        let records = [
            TraceRecord::ModuleProbe("/app/A.dll".into()),
            TraceRecord::TypeLoad("App.T1".into()),
            TraceRecord::BulkType(vec!["App.T1".into(), "App.T3".into()]),
        ];

        let mut once = Usage::default();
        for record in &records {
            once.record(record);
        }

        let mut twice = once.clone();
        for record in &records {
            twice.record(record);
        }

        assert_eq!(once, twice);
        assert_eq!(once.types().len(), 2);
    }

    #[test]
    fn blanks_are_ignored() {
        let mut usage = Usage::default();

        assert!(!usage.record(&TraceRecord::ResolutionResult(String::new())));
        assert!(!usage.record(&TraceRecord::ModuleLoad(" ".into())));
        assert!(!usage.record(&TraceRecord::BulkType(vec![String::new()])));
        assert!(usage.record(&TraceRecord::BulkType(vec![String::new(), "App.X".into()])));

        assert!(usage.modules().is_empty());
        assert_eq!(usage.types().len(), 1);
    }

    #[test]
    fn merge_is_union() {
        let mut left = Usage::default();
        left.add_module("/app/A.dll");
        left.add_type("App.T1");

        let mut right = Usage::default();
        right.add_module("/app/B.dll");
        right.add_type("App.T1");

        left.merge(right);
        assert_eq!(left.modules().len(), 2);
        assert_eq!(left.types().len(), 1);
        assert!(left.contains_module(Path::new("/app/B.dll")));
        assert!(!left.contains_module(Path::new("/app/b.dll")));
    }

    #[test]
    fn entry_point_names_type() {
        let mut usage = Usage::default();
        usage.record(&TraceRecord::EntryPoint("App.Program".into()));

        assert!(usage.contains_type("App.Program"));
        assert!(!usage.is_empty());
    }
}
