//! Printing, exporting and recovering the captured history.
use anyhow::Result;
use colored::{ColoredString, Colorize};
use logtap::export::{format_line, write_export};
use logtap::{ConsoleCore, CoreConfig, LogEntry, LogFilter, Severity};
use std::path::Path;

/// Opens the persisted history of a previous run without modifying it.
///
/// This is the "second window": it reads what another core persisted, prints
/// it through the filter and optionally exports it.
pub fn run(config: CoreConfig, filter: &LogFilter, export: Option<&Path>) -> Result<()> {
    println!("Opening persisted history");

    let core = ConsoleCore::new(config)?;
    let entries = core.recover()?;
    if entries.is_empty() {
        println!("No persisted history found.");
        return Ok(());
    }

    print_history(&entries, filter);
    if let Some(path) = export {
        export_history(path, &entries)?;
    }
    Ok(())
}

/// Prints the entries that pass `filter`, one colored line each.
pub fn print_history<'a, I>(entries: I, filter: &LogFilter)
where
    I: IntoIterator<Item = &'a LogEntry>,
{
    let entries: Vec<&LogEntry> = entries.into_iter().collect();
    let shown = filter.apply(entries.iter().copied());
    for entry in &shown {
        println!("{}", colorize(entry.severity, format_line(entry)));
    }
    println!();
    println!("{} of {} entries shown", shown.len(), entries.len());
}

pub fn export_history<'a, I>(path: &Path, entries: I) -> Result<()>
where
    I: IntoIterator<Item = &'a LogEntry>,
{
    let written = write_export(path, entries)?;
    println!("Exported {} entries to {}", written, path.display());
    Ok(())
}

fn colorize(severity: Severity, line: String) -> ColoredString {
    match severity {
        Severity::Error => line.red(),
        Severity::Warn => line.yellow(),
        Severity::Info => line.normal(),
        Severity::Debug => line.cyan(),
        Severity::Trace => line.dimmed(),
    }
}
