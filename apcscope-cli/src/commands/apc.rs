use anyhow::Context;
use apcscope::{ApcRecord, ApcScanner, Diagnostics, RecordEmitter, COLUMNS};

use crate::{
    app::{GlobalOptions, ImageOptions},
    commands::common::{load_image, scan_config},
    output::{print_diagnostics, print_output, Align, TabWriter},
};

pub fn run(image: &ImageOptions, pids: &[u64], opts: &GlobalOptions) -> anyhow::Result<()> {
    let loaded = load_image(image)?;
    let config = scan_config(image, pids)?;
    let diagnostics = Diagnostics::new();

    let records: Vec<ApcRecord> = ApcScanner::new(loaded.ctx(), &config, &diagnostics)
        .context("failed to walk the process list")?
        .collect();

    print_output(&records, opts, |records| {
        let mut emitter = RecordEmitter::new(Vec::new());
        for record in records {
            emitter.emit(record);
        }

        let mut tw = TabWriter::new(
            COLUMNS
                .iter()
                .map(|&column| (<&str>::from(column), Align::from(column)))
                .collect(),
        );
        for row in emitter.into_inner() {
            tw.row(row.cells.iter().map(ToString::to_string).collect());
        }
        tw.print();
    })?;
    print_diagnostics(&diagnostics);

    Ok(())
}
