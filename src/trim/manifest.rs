//! Manifest tidy: drops unused modules from the `runtime` maps of `*.deps.json` files.
//!
//! The document is handled as a generic JSON tree with key order preserved. Every property
//! named `runtime`, at any depth, maps relative file names to asset descriptions; keys whose
//! file name belongs to an unused module are removed. Nothing else changes, and the
//! document is written back with its original indentation unit, line endings, byte order
//! mark and trailing newline.

use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use log::debug;
use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Serializer, Value};

use crate::{
    trim::{TrimListener, TrimOptions},
    Result,
};

const BOM: &str = "\u{feff}";

/// Result of tidying one manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestOutcome {
    /// Manifest path
    pub path: PathBuf,
    /// Removed `runtime` keys, in document order
    pub removed: Vec<String>,
    /// Whether the file was written back
    pub rewritten: bool,
}

/// Formatting properties of a JSON document that survive a rewrite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonStyle {
    /// Indentation unit, `None` for single-line documents
    pub indent: Option<String>,
    /// Lines end with `\r\n`
    pub crlf: bool,
    /// The document ends with a line break
    pub trailing_newline: bool,
    /// The document starts with a UTF-8 byte order mark
    pub bom: bool,
}

impl JsonStyle {
    /// Detect the style of `text`.
    ///
    /// The indentation unit is the leading whitespace of the first indented line, which
    /// sits at depth one in any pretty printed document.
    #[must_use]
    pub fn detect(text: &str) -> JsonStyle {
        let bom = text.starts_with(BOM);
        let body = text.strip_prefix(BOM).unwrap_or(text);

        let indent = if body.trim_end().contains('\n') {
            let unit = body
                .lines()
                .skip(1)
                .map(|line| &line[..line.len() - line.trim_start().len()])
                .find(|whitespace| !whitespace.is_empty())
                .unwrap_or("  ");
            Some(unit.to_string())
        } else {
            None
        };

        JsonStyle {
            indent,
            crlf: body.contains("\r\n"),
            trailing_newline: body.ends_with('\n'),
            bom,
        }
    }

    /// Serialize `value` in this style.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn render(&self, value: &Value) -> Result<String> {
        let mut text = match &self.indent {
            Some(indent) => {
                let mut buffer = Vec::new();
                let formatter = PrettyFormatter::with_indent(indent.as_bytes());
                let mut serializer = Serializer::with_formatter(&mut buffer, formatter);
                value.serialize(&mut serializer)?;
                String::from_utf8(buffer)
                    .map_err(|_| malformed_error!("Serialized manifest is not UTF-8"))?
            }
            None => serde_json::to_string(value)?,
        };

        if self.trailing_newline {
            text.push('\n');
        }
        if self.crlf {
            text = text.replace('\n', "\r\n");
        }
        if self.bom {
            text.insert_str(0, BOM);
        }

        Ok(text)
    }
}

/// Remove unused entries from the `runtime` maps of a manifest document.
///
/// Returns the rewritten text and the removed keys, or `None` when the document has no
/// top-level `targets` section or nothing matched.
///
/// # Errors
/// Returns an error if the document is not valid JSON.
pub fn tidy_document(
    text: &str,
    unused: &HashSet<String>,
) -> Result<Option<(String, Vec<String>)>> {
    let style = JsonStyle::detect(text);
    let mut document: Value = serde_json::from_str(text.strip_prefix(BOM).unwrap_or(text))?;

    if document.get("targets").is_none() {
        return Ok(None);
    }

    let mut removed = Vec::new();
    prune_runtime_maps(&mut document, unused, &mut removed);
    if removed.is_empty() {
        return Ok(None);
    }

    Ok(Some((style.render(&document)?, removed)))
}

fn prune_runtime_maps(value: &mut Value, unused: &HashSet<String>, removed: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "runtime" {
                    if let Value::Object(files) = child {
                        files.retain(|file, _| {
                            let name = file.rsplit(['/', '\\']).next().unwrap_or(file.as_str());
                            if unused.contains(name) {
                                removed.push(file.clone());
                                false
                            } else {
                                true
                            }
                        });
                    }
                }
                prune_runtime_maps(child, unused, removed);
            }
        }
        Value::Array(items) => {
            for item in items {
                prune_runtime_maps(item, unused, removed);
            }
        }
        _ => {}
    }
}

/// Manifests directly under `root`, sorted.
///
/// # Errors
/// Returns an error if `root` cannot be read.
pub fn find_manifests(root: &Path, options: &TrimOptions) -> Result<Vec<PathBuf>> {
    let mut manifests = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let is_manifest = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(&options.manifest_suffix));
        if is_manifest && entry.file_type()?.is_file() {
            manifests.push(entry.path());
        }
    }

    manifests.sort();
    Ok(manifests)
}

/// Tidy one manifest file, writing it back unless `dry_run` is set or nothing changed.
///
/// # Errors
/// Returns an error if the file cannot be read, parsed or written.
pub fn tidy_manifest(
    path: &Path,
    unused: &HashSet<String>,
    dry_run: bool,
) -> Result<ManifestOutcome> {
    let text = fs::read_to_string(path)?;

    let mut outcome = ManifestOutcome {
        path: path.to_path_buf(),
        ..ManifestOutcome::default()
    };

    let Some((tidied, removed)) = tidy_document(&text, unused)? else {
        debug!("{} unchanged", path.display());
        return Ok(outcome);
    };

    outcome.removed = removed;
    if !dry_run {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(tidied.as_bytes())?;
        temp.persist(path).map_err(|error| error.error)?;
        outcome.rewritten = true;
    }

    Ok(outcome)
}

/// Tidy every manifest under `root`.
///
/// # Errors
/// Returns the first manifest that fails to read, parse or write.
pub fn tidy_manifests(
    root: &Path,
    unused: &HashSet<String>,
    options: &TrimOptions,
    listener: &dyn TrimListener,
) -> Result<Vec<ManifestOutcome>> {
    let mut outcomes = Vec::new();
    for path in find_manifests(root, options)? {
        let outcome = tidy_manifest(&path, unused, options.dry_run)?;
        if !outcome.removed.is_empty() {
            listener.on_message(&format!(
                "{} {}: {} entries",
                if options.dry_run { "Would tidy" } else { "Tidied" },
                path.display(),
                outcome.removed.len()
            ));
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
    "runtimeTarget": {
        "name": ".NETCoreApp,Version=v8.0"
    },
    "targets": {
        ".NETCoreApp,Version=v8.0": {
            "App/1.0.0": {
                "dependencies": {
                    "B": "1.0.0"
                },
                "runtime": {
                    "App.dll": {}
                }
            },
            "B/1.0.0": {
                "runtime": {
                    "lib/net8.0/B.dll": {
                        "assemblyVersion": "1.0.0.0"
                    },
                    "lib/net8.0/B.Extra.dll": {}
                }
            }
        }
    },
    "libraries": {
        "B/1.0.0": {
            "type": "package",
            "path": "b/1.0.0"
        }
    }
}
"#;

    fn unused(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn removes_exactly_unused_entries() {
        let (text, removed) = tidy_document(MANIFEST, &unused(&["B.dll", "Other.dll"]))
            .unwrap()
            .unwrap();

        assert_eq!(removed, vec!["lib/net8.0/B.dll".to_string()]);
        let expected = MANIFEST.replace(
            r#"                    "lib/net8.0/B.dll": {
                        "assemblyVersion": "1.0.0.0"
                    },
"#,
            "",
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn untouched_without_matches_or_targets() {
        assert!(tidy_document(MANIFEST, &unused(&["Other.dll"]))
            .unwrap()
            .is_none());

        let no_targets = r#"{ "runtime": { "B.dll": {} } }"#;
        assert!(tidy_document(no_targets, &unused(&["B.dll"]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn preserves_style() {
        let source = format!(
            "{}{}",
            BOM,
            "{\r\n\t\"targets\": {\r\n\t\t\"runtime\": {\r\n\t\t\t\"A.dll\": {},\r\n\t\t\t\"B.dll\": {}\r\n\t\t}\r\n\t}\r\n}"
        );

        let (text, _) = tidy_document(&source, &unused(&["B.dll"])).unwrap().unwrap();
        assert_eq!(
            text,
            format!(
                "{}{}",
                BOM,
                "{\r\n\t\"targets\": {\r\n\t\t\"runtime\": {\r\n\t\t\t\"A.dll\": {}\r\n\t\t}\r\n\t}\r\n}"
            )
        );
    }

    #[test]
    fn detects_style() {
        let style = JsonStyle::detect(MANIFEST);
        assert_eq!(style.indent.as_deref(), Some("    "));
        assert!(style.trailing_newline);
        assert!(!style.crlf);
        assert!(!style.bom);

        let style = JsonStyle::detect(r#"{"targets":{}}"#);
        assert_eq!(style.indent, None);
        assert!(!style.trailing_newline);
    }

    #[test]
    fn invalid_json_fails() {
        assert!(tidy_document("{ \"targets\": ", &unused(&["B.dll"])).is_err());
    }

    #[test]
    fn rewrites_manifest_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("App.deps.json");
        fs::write(&path, MANIFEST).unwrap();
        fs::write(dir.path().join("App.runtimeconfig.json"), "{}").unwrap();

        let options = TrimOptions::new(dir.path());
        assert_eq!(find_manifests(dir.path(), &options).unwrap(), vec![path.clone()]);

        let dry = tidy_manifest(&path, &unused(&["B.dll"]), true).unwrap();
        assert_eq!(dry.removed.len(), 1);
        assert!(!dry.rewritten);
        assert_eq!(fs::read_to_string(&path).unwrap(), MANIFEST);

        let outcome = tidy_manifest(&path, &unused(&["B.dll"]), false).unwrap();
        assert!(outcome.rewritten);
        assert!(!fs::read_to_string(&path).unwrap().contains("lib/net8.0/B.dll"));
    }
}
