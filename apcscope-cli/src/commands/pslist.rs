use anyhow::Context;
use apcscope::{
    windows::{list_processes, list_threads, process_list_head},
    Diagnostic, DiagnosticCategory, Diagnostics,
};
use serde::Serialize;

use crate::{
    app::{GlobalOptions, ImageOptions},
    commands::common::{load_image, scan_config},
    output::{print_diagnostics, print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ProcessEntry {
    pid: u64,
    name: String,
    address: String,
    threads: Option<usize>,
}

pub fn run(image: &ImageOptions, opts: &GlobalOptions) -> anyhow::Result<()> {
    let loaded = load_image(image)?;
    let config = scan_config(image, &[])?;
    let ctx = loaded.ctx();
    let diagnostics = Diagnostics::new();

    let head = process_list_head(ctx, &config).context("failed to locate the process list")?;
    let processes = list_processes(ctx, head, None)
        .context("failed to walk the process list")?
        .with_max_entries(config.max_list_entries);

    let mut entries = Vec::new();
    for process in processes {
        let process = match process {
            Ok(process) => process,
            Err(error) => {
                diagnostics.push(Diagnostic::from_error(DiagnosticCategory::Process, &error));
                continue;
            }
        };

        let threads = match list_threads(ctx, &process) {
            Ok(threads) => Some(threads.with_max_entries(config.max_list_entries).count()),
            Err(error) => {
                log::debug!("Error walking threads of process {}: {}", process.pid, error);
                diagnostics.push(
                    Diagnostic::from_error(DiagnosticCategory::List, &error)
                        .with_pid(process.pid)
                        .with_address(process.address),
                );
                None
            }
        };

        entries.push(ProcessEntry {
            pid: process.pid,
            name: process.name,
            address: format!("{:#x}", process.address),
            threads,
        });
    }

    print_output(&entries, opts, |entries| {
        let mut tw = TabWriter::new(vec![
            ("PID", Align::Right),
            ("ImageFileName", Align::Left),
            ("Offset", Align::Left),
            ("Threads", Align::Right),
        ]);
        for entry in entries {
            tw.row(vec![
                entry.pid.to_string(),
                entry.name.clone(),
                entry.address.clone(),
                entry
                    .threads
                    .map_or_else(|| "-".to_string(), |count| count.to_string()),
            ]);
        }
        tw.print();
    })?;
    print_diagnostics(&diagnostics);

    Ok(())
}
