use crate::error::Result;
use crate::log::{LogSource, TraceLog};
use std::io::{BufWriter, Write};

pub fn run(source: &LogSource, limit: Option<usize>) -> Result<()> {
    let log = TraceLog::open(source)?;
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    writeln!(out, "{:>10}  {:>10}  {:>12}  {:>14}", "SUBJECT", "TIMESTAMP", "RMS", "COST")?;

    let mut records = log.records();
    let mut shown = 0usize;
    for event in records.by_ref().take(limit.unwrap_or(usize::MAX)) {
        writeln!(
            out,
            "{:>10}  {:>10}  {:>12}  {:>14}",
            event.subject_id, event.timestamp, event.rms, event.cost
        )?;
        shown += 1;
    }
    out.flush()?;

    if limit.is_some_and(|n| shown == n) {
        eprintln!("Showing first {shown} records");
    } else if records.saw_terminator() {
        eprintln!("{shown} records, terminated");
    } else {
        eprintln!("{shown} records, no terminator");
    }

    Ok(())
}
