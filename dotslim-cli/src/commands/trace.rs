use std::{collections::BTreeMap, path::Path};

use anyhow::Context;
use dotslim::{TraceCollector, TrimOptions, Trimmer, Usage};
use serde::Serialize;

use crate::{
    app::{GlobalOptions, LaunchOptions},
    commands::common::{launcher, replay, session_config, sorted_paths, CliListener, Interrupt},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct TraceOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    process_id: Option<i32>,
    events: u64,
    records: BTreeMap<String, u64>,
    ignored: u64,
    modules: Vec<String>,
    types: Vec<String>,
}

pub fn run(
    pid: Option<u32>,
    nettrace: Option<&Path>,
    launch: &LaunchOptions,
    interrupt: &Interrupt,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let mut usage = Usage::default();

    let summary = if let Some(path) = nettrace {
        replay(path, &mut usage)?
    } else if let Some(pid) = pid {
        TraceCollector::new(&mut usage)
            .attach(pid, &session_config(launch))
            .with_context(|| format!("failed to trace process {pid}"))?
    } else {
        let launcher = launcher(launch)?;
        let listener = CliListener::new(interrupt);
        let (collected, summary) = Trimmer::new(TrimOptions::default())
            .with_listener(&listener)
            .with_cancellation(interrupt.token())
            .collect(&launcher, &session_config(launch))
            .with_context(|| format!("failed to trace {}", launcher.program().display()))?;
        interrupt.disarm();
        usage = collected;
        summary
    };

    let mut types: Vec<String> = usage.types().iter().cloned().collect();
    types.sort();

    let output = TraceOutput {
        process_id: summary.process_id,
        events: summary.events,
        records: summary
            .records
            .iter()
            .map(|(kind, count)| (kind.to_string(), *count))
            .collect(),
        ignored: summary.ignored,
        modules: sorted_paths(usage.modules()),
        types,
    };

    print_output(&output, opts, |out| {
        if let Some(pid) = out.process_id {
            println!("Process:  {pid}");
        }
        println!("Events:   {} ({} ignored)", out.events, out.ignored);

        let mut tw = TabWriter::new(vec![("Record", Align::Left), ("Count", Align::Right)])
            .indent("  ");
        for (kind, count) in &out.records {
            tw.row(vec![kind.clone(), count.to_string()]);
        }
        println!();
        tw.print();

        println!("\nModules ({}):", out.modules.len());
        for module in &out.modules {
            println!("  {module}");
        }
        println!("\nTypes ({}):", out.types.len());
        for ty in &out.types {
            println!("  {ty}");
        }
    })
}
