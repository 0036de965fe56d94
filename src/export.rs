//! Human-readable export of the history and the viewer-side filter.
use crate::entry::{LogEntry, Severity};
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Formats one entry as `[HH:MM:SS.mmm] [LEVEL] message aux...` in local time.
pub fn format_line(entry: &LogEntry) -> String {
    let time = entry
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S%.3f");
    let mut line = format!("[{}] [{}] {}", time, entry.severity.label(), entry.message);
    for aux in &entry.auxiliary {
        line.push(' ');
        line.push_str(&aux.render());
    }
    // One entry per line, whatever the message contains.
    line.replace(['\r', '\n'], " ")
}

/// Formats every entry with `format_line`, keeping order.
pub fn export_lines<'a, I>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a LogEntry>,
{
    entries.into_iter().map(format_line).collect()
}

/// Writes the export to `path`, one line per entry. Returns the number of lines.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_export<'a, I>(path: impl AsRef<Path>, entries: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a LogEntry>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for line in export_lines(entries) {
        writeln!(writer, "{}", line)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Viewer filter: a minimum severity plus an optional text term.
///
/// A term starting with `-` excludes entries containing the rest of it;
/// any other term keeps only entries containing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub min_severity: Option<Severity>,
    pub text: Option<String>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only entries at `severity` or above.
    pub fn at_least(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Sets the text term. An empty term clears it.
    pub fn matching(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.text = if text.is_empty() { None } else { Some(text) };
        self
    }

    /// Whether `entry` passes both the severity floor and the text term.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(min) = self.min_severity {
            if entry.severity.rank() < min.rank() {
                return false;
            }
        }
        match self.text.as_deref() {
            Some(term) if term.starts_with('-') => !contains(entry, &term[1..]),
            Some(term) => contains(entry, term),
            None => true,
        }
    }

    pub fn apply<'a, I>(&self, entries: I) -> Vec<&'a LogEntry>
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        entries.into_iter().filter(|entry| self.matches(entry)).collect()
    }
}

fn contains(entry: &LogEntry, term: &str) -> bool {
    if term.is_empty() {
        return true;
    }
    entry.message.contains(term) || entry.auxiliary.iter().any(|aux| aux.render().contains(term))
}
