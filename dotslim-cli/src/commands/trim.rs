use std::path::{Path, PathBuf};

use anyhow::Context;
use dotslim::{trim::TrimReport, TrimOptions, Trimmer, Usage};
use serde::Serialize;

use crate::{
    app::{GlobalOptions, LaunchOptions},
    commands::common::{launcher, replay, session_config, CliListener, Interrupt},
    output::{format_bytes, print_output, Align, TabWriter},
};

/// Flags of the `trim` subcommand.
pub struct TrimArgs<'a> {
    pub app_dir: Option<&'a Path>,
    pub dry_run: bool,
    pub no_slim: bool,
    pub keep_going: bool,
    pub ignore_dirs: &'a [String],
    pub nettrace: Option<&'a Path>,
    pub launch: &'a LaunchOptions,
}

#[derive(Debug, Serialize)]
struct SlimEntry {
    path: String,
    types_pruned: usize,
    methods_stubbed: usize,
    native_code_dropped: bool,
    rewritten: bool,
}

#[derive(Debug, Serialize)]
struct SkipEntry {
    path: String,
    reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    path: String,
    removed: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TrimOutput {
    root: String,
    dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<u64>,
    used_modules: usize,
    used_types: usize,
    modules_on_disk: usize,
    removed_modules: Vec<String>,
    removed_symbols: Vec<String>,
    freed_bytes: u64,
    slimmed: Vec<SlimEntry>,
    skipped: Vec<SkipEntry>,
    manifests: Vec<ManifestEntry>,
}

impl From<&TrimReport> for TrimOutput {
    fn from(report: &TrimReport) -> Self {
        let display = |paths: &[PathBuf]| -> Vec<String> {
            paths.iter().map(|path| path.display().to_string()).collect()
        };

        Self {
            root: report.root.display().to_string(),
            dry_run: report.dry_run,
            events: report.trace.as_ref().map(|summary| summary.events),
            used_modules: report.used_modules,
            used_types: report.used_types,
            modules_on_disk: report.modules_on_disk,
            removed_modules: display(&report.removed_modules),
            removed_symbols: display(&report.removed_symbols),
            freed_bytes: report.freed_bytes,
            slimmed: report
                .slim
                .slimmed
                .iter()
                .filter(|module| module.outcome.changed())
                .map(|module| SlimEntry {
                    path: module.path.display().to_string(),
                    types_pruned: module.outcome.types_pruned,
                    methods_stubbed: module.outcome.methods_stubbed
                        + module.outcome.methods_redirected,
                    native_code_dropped: module.outcome.native_code_dropped,
                    rewritten: module.outcome.rewritten,
                })
                .collect(),
            skipped: report
                .slim
                .skipped
                .iter()
                .map(|skip| SkipEntry {
                    path: skip.path.display().to_string(),
                    reason: skip.reason.to_string(),
                    detail: skip.detail.clone(),
                })
                .collect(),
            manifests: report
                .manifests
                .iter()
                .filter(|outcome| !outcome.removed.is_empty())
                .map(|outcome| ManifestEntry {
                    path: outcome.path.display().to_string(),
                    removed: outcome.removed.clone(),
                })
                .collect(),
        }
    }
}

pub fn run(args: &TrimArgs<'_>, interrupt: &Interrupt, opts: &GlobalOptions) -> anyhow::Result<()> {
    let root = args
        .app_dir
        .or(args.launch.working_dir.as_deref())
        .unwrap_or(Path::new("."));

    let mut options = TrimOptions::new(root)
        .with_dry_run(args.dry_run)
        .with_slim(!args.no_slim)
        .with_keep_going(args.keep_going);
    for dir in args.ignore_dirs {
        options = options.with_ignore_dir(dir);
    }

    let listener = CliListener::new(interrupt);
    let trimmer = Trimmer::new(options)
        .with_listener(&listener)
        .with_cancellation(interrupt.token());
    trimmer
        .options()
        .resolve_root()
        .with_context(|| format!("failed to resolve deployment {}", root.display()))?;

    let (usage, summary) = if let Some(path) = args.nettrace {
        let mut usage = Usage::default();
        let summary = replay(path, &mut usage)?;
        (usage, summary)
    } else {
        let launcher = launcher(args.launch)?;
        let collected = trimmer
            .collect(&launcher, &session_config(args.launch))
            .with_context(|| format!("failed to trace {}", launcher.program().display()))?;
        interrupt.disarm();
        collected
    };

    interrupt.begin_cleanup();
    let mut report = trimmer
        .trim(&usage)
        .with_context(|| format!("failed to trim {}", root.display()))?;
    report.trace = Some(summary);

    print_output(&TrimOutput::from(&report), opts, |out| {
        let verb = if out.dry_run { "Would remove" } else { "Removed" };

        println!("Deployment: {}", out.root);
        if let Some(events) = out.events {
            println!("Events:     {events}");
        }
        println!(
            "Used:       {} modules, {} types",
            out.used_modules, out.used_types
        );
        println!(
            "{verb} {} of {} modules ({} symbol files, {})",
            out.removed_modules.len(),
            out.modules_on_disk,
            out.removed_symbols.len(),
            format_bytes(out.freed_bytes)
        );
        for module in &out.removed_modules {
            println!("  {module}");
        }

        if !out.slimmed.is_empty() {
            let mut tw = TabWriter::new(vec![
                ("Module", Align::Left),
                ("Types", Align::Right),
                ("Methods", Align::Right),
            ])
            .indent("  ");
            for entry in &out.slimmed {
                let path = if entry.native_code_dropped {
                    format!("{} (ReadyToRun code dropped)", entry.path)
                } else {
                    entry.path.clone()
                };
                tw.row(vec![
                    path,
                    entry.types_pruned.to_string(),
                    entry.methods_stubbed.to_string(),
                ]);
            }
            println!("\nSlimmed:");
            tw.print();
        }

        if !out.skipped.is_empty() {
            println!("\nNot slimmed:");
            for entry in &out.skipped {
                match &entry.detail {
                    Some(detail) => println!("  {} ({}: {})", entry.path, entry.reason, detail),
                    None => println!("  {} ({})", entry.path, entry.reason),
                }
            }
        }

        for manifest in &out.manifests {
            println!(
                "\n{}: {} runtime entries",
                manifest.path,
                manifest.removed.len()
            );
            for entry in &manifest.removed {
                println!("  - {entry}");
            }
        }
    })
}
