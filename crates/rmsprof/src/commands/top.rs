use crate::aggregate::aggregate_log;
use crate::error::{Error, Result};
use crate::log::{LogSource, TraceLog};
use crate::rank::{RankEntry, rank};
use std::collections::HashMap;
use std::path::Path;

pub fn run(
    source: &LogSource,
    limit: usize,
    json: bool,
    csv: bool,
    names: Option<&Path>,
) -> Result<()> {
    let names = match names {
        Some(path) => load_names(path)?,
        None => HashMap::new(),
    };

    let log = TraceLog::open(source)?;
    let aggregate = aggregate_log(&log);
    let ranked = rank(&aggregate.costs, &aggregate.graph);
    let entries = &ranked[..ranked.len().min(limit)];

    if entries.is_empty() {
        eprintln!("No records in {source}");
        return Ok(());
    }

    if json {
        print_json(source, aggregate.stats.records, entries, &names);
    } else if csv {
        print_csv(entries, &names);
    } else {
        print_table(source, aggregate.stats.records, entries, &names);
    }

    Ok(())
}

/// Read `id,name` lines. Blank lines and `#` comments are skipped.
pub fn load_names(path: &Path) -> Result<HashMap<u32, String>> {
    let text = std::fs::read_to_string(path)?;
    parse_names(&text).map_err(|line| Error::MalformedNames {
        path: path.display().to_string(),
        line,
    })
}

fn parse_names(text: &str) -> std::result::Result<HashMap<u32, String>, usize> {
    let mut names = HashMap::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (id, name) = line.split_once(',').ok_or(i + 1)?;
        let id: u32 = id.trim().parse().map_err(|_| i + 1)?;
        names.insert(id, name.trim().to_string());
    }
    Ok(names)
}

fn label(id: u32, names: &HashMap<u32, String>) -> String {
    names.get(&id).cloned().unwrap_or_else(|| format!("#{id}"))
}

fn print_table(
    source: &LogSource,
    records: u64,
    entries: &[RankEntry],
    names: &HashMap<u32, String>,
) {
    println!("# {source}");
    println!("# Records: {}", format_count(records));
    println!();

    println!(
        "{:>4}  {:>14}  {:>12}  {:>6}  SUBJECT",
        "RANK", "WORST COST", "AT RMS", "SIZES"
    );
    println!("{}", "-".repeat(60));

    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:>4}  {:>14}  {:>12}  {:>6}  {}",
            i + 1,
            format_count(entry.worst_cost),
            entry.worst_rms,
            entry.footprints,
            label(entry.subject_id, names)
        );
    }
}

fn print_json(
    source: &LogSource,
    records: u64,
    entries: &[RankEntry],
    names: &HashMap<u32, String>,
) {
    println!("{{");
    println!("  \"log\": \"{}\",", escape(&source.to_string()));
    println!("  \"records\": {},", records);
    println!("  \"entries\": [");

    for (i, entry) in entries.iter().enumerate() {
        let comma = if i < entries.len() - 1 { "," } else { "" };
        let name = match names.get(&entry.subject_id) {
            Some(name) => format!("\"{}\"", escape(name)),
            None => "null".to_string(),
        };
        println!(
            "    {{ \"subject_id\": {}, \"name\": {}, \"worst_cost\": {}, \"worst_rms\": {}, \"footprints\": {} }}{}",
            entry.subject_id, name, entry.worst_cost, entry.worst_rms, entry.footprints, comma
        );
    }

    println!("  ]");
    println!("}}");
}

fn print_csv(entries: &[RankEntry], names: &HashMap<u32, String>) {
    println!("rank,subject_id,name,worst_cost,worst_rms,footprints");
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{},{},\"{}\",{},{},{}",
            i + 1,
            entry.subject_id,
            names
                .get(&entry.subject_id)
                .map(|n| n.replace('"', "\"\""))
                .unwrap_or_default(),
            entry.worst_cost,
            entry.worst_rms,
            entry.footprints
        );
    }
}

/// Escape `s` for use inside a JSON string literal.
fn escape(s: &str) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Format a number with commas for readability
fn format_count(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
