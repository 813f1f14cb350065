//! Text tables written by `rmsprof aggregate`.
//!
//! ```text
//! callgraph.log      cost_table.log
//! 1:2,3              1,7,23
//! 2:3                2,3,15
//! ```

use super::{CallGraph, CostTable};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CALLGRAPH_FILE: &str = "callgraph.log";
pub const COST_TABLE_FILE: &str = "cost_table.log";

/// One `caller:callee,callee` line per caller.
pub fn write_callgraph<W: Write>(graph: &CallGraph, mut out: W) -> io::Result<()> {
    for (caller, callees) in graph.iter() {
        write!(out, "{caller}:")?;
        for (i, callee) in callees.iter().enumerate() {
            if i > 0 {
                out.write_all(b",")?;
            }
            write!(out, "{callee}")?;
        }
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// One `subject,rms,cost` line per table entry.
pub fn write_cost_table<W: Write>(table: &CostTable, mut out: W) -> io::Result<()> {
    for (subject, rms, cost) in table.iter() {
        writeln!(out, "{subject},{rms},{cost}")?;
    }
    Ok(())
}

/// Write both tables into `dir`, returning the paths written.
pub fn write_tables(
    graph: &CallGraph,
    table: &CostTable,
    dir: &Path,
) -> io::Result<(PathBuf, PathBuf)> {
    let graph_path = dir.join(CALLGRAPH_FILE);
    let mut out = BufWriter::new(File::create(&graph_path)?);
    write_callgraph(graph, &mut out)?;
    out.flush()?;

    let cost_path = dir.join(COST_TABLE_FILE);
    let mut out = BufWriter::new(File::create(&cost_path)?);
    write_cost_table(table, &mut out)?;
    out.flush()?;

    Ok((graph_path, cost_path))
}
