use std::{collections::HashSet, path::Path};

use anyhow::Context;
use dotslim::ManagedModule;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::read_used_types,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct TypeEntry {
    token: String,
    name: String,
    methods: usize,
    stubbable: usize,
    /// Why the type is kept, or `prunable`
    status: String,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    path: String,
    types: Vec<TypeEntry>,
    prunable: usize,
}

pub fn run(path: &Path, used_types: Option<&Path>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let module = ManagedModule::from_file(path)
        .with_context(|| format!("failed to load module: {}", path.display()))?;
    let used = match used_types {
        Some(file) => read_used_types(file)?,
        None => HashSet::new(),
    };

    let types: Vec<TypeEntry> = module
        .types()
        .iter()
        .map(|ty| TypeEntry {
            token: ty.token.to_string(),
            name: ty.full_name(),
            methods: ty.methods.len(),
            stubbable: ty.methods.iter().filter(|method| method.can_stub()).count(),
            status: ty
                .retention(&used)
                .map_or_else(|| "prunable".to_string(), |retention| retention.to_string()),
        })
        .collect();

    let output = InspectOutput {
        path: path.display().to_string(),
        prunable: module.prunable_types(&used).count(),
        types,
    };

    print_output(&output, opts, |out| {
        let mut tw = TabWriter::new(vec![
            ("Token", Align::Left),
            ("Status", Align::Left),
            ("Methods", Align::Right),
            ("Stubbable", Align::Right),
            ("Name", Align::Left),
        ]);
        for entry in &out.types {
            tw.row(vec![
                entry.token.clone(),
                entry.status.clone(),
                entry.methods.to_string(),
                entry.stubbable.to_string(),
                entry.name.clone(),
            ]);
        }
        tw.print();
        println!(
            "\n{} type(s) listed, {} prunable.",
            out.types.len(),
            out.prunable
        );
    })
}
