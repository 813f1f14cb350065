use crate::aggregate::{aggregate_log, output};
use crate::error::Result;
use crate::log::{LogSource, TraceLog};
use crate::storage::Storage;
use std::path::Path;

pub fn run(source: &LogSource, out_dir: &Path, db: Option<&Path>) -> Result<()> {
    let log = TraceLog::open(source)?;
    let aggregate = aggregate_log(&log);

    std::fs::create_dir_all(out_dir)?;
    let (graph_path, cost_path) = output::write_tables(&aggregate.graph, &aggregate.costs, out_dir)?;

    if let Some(db) = db {
        let mut storage = Storage::create(db)?;
        storage.write_aggregate(source, &aggregate)?;
        eprintln!("Exported: {}", db.display());
    }

    let stats = &aggregate.stats;
    if stats.truncated_bytes > 0 {
        eprintln!(
            "Warning: ignored {} trailing bytes (partial record)",
            stats.truncated_bytes
        );
    }
    eprintln!(
        "Read {} records: {} callers, {} edges, {} cost entries",
        stats.records,
        aggregate.graph.caller_count(),
        aggregate.graph.edge_count(),
        aggregate.costs.len()
    );
    eprintln!("Wrote {} and {}", graph_path.display(), cost_path.display());

    Ok(())
}
