//! End-to-end tests of the rmsprof binary.

use predicates::prelude::*;
use rmsprof_trace::{Backing, Recorder, TraceChannel, TraceConfig, TraceEvent};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn write_log(dir: &Path, events: &[TraceEvent]) -> PathBuf {
    let path = dir.join("run.trace");
    let bytes: Vec<u8> = events.iter().flat_map(|e| e.to_bytes()).collect();
    fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn test_terminator_only_log_gives_empty_tables() {
    let dir = TempDir::new().unwrap();
    let log = write_log(dir.path(), &[TraceEvent::terminator()]);
    let out = dir.path().join("out");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmsprof");
    cmd.arg("aggregate").arg(&log).arg("--out-dir").arg(&out);
    cmd.assert().success();

    assert_eq!(fs::read_to_string(out.join("callgraph.log")).unwrap(), "");
    assert_eq!(fs::read_to_string(out.join("cost_table.log")).unwrap(), "");
}

#[test]
fn test_missing_log_fails() {
    let dir = TempDir::new().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmsprof");
    cmd.arg("aggregate")
        .arg(dir.path().join("absent.trace"))
        .arg("--out-dir")
        .arg(dir.path());
    cmd.assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Trace log not found"));

    assert!(!dir.path().join("callgraph.log").exists());
}

#[test]
fn test_aggregate_writes_sorted_tables() {
    let dir = TempDir::new().unwrap();
    let log = write_log(
        dir.path(),
        &[
            TraceEvent::new(3, 3, 1, 5),
            TraceEvent::new(2, 2, 3, 15),
            TraceEvent::new(3, 4, 1, 9),
            TraceEvent::new(1, 1, 7, 23),
            TraceEvent::terminator(),
        ],
    );

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmsprof");
    cmd.arg("aggregate").arg(&log).arg("-o").arg(dir.path());
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Read 4 records"));

    assert_eq!(
        fs::read_to_string(dir.path().join("callgraph.log")).unwrap(),
        "1:2,3\n2:3\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("cost_table.log")).unwrap(),
        "1,7,23\n2,3,15\n3,1,9\n"
    );
}

#[test]
fn test_recorded_run_round_trip() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("recorded.trace");
    let config = TraceConfig::default()
        .with_backing(Backing::File(log.clone()))
        .with_capacity(1 << 20);

    {
        let channel = Arc::new(TraceChannel::open(&config).unwrap());
        let mut rec = Recorder::new(Arc::clone(&channel), 3);
        rec.enter(1);
        rec.enter(2);
        rec.memory_access(0x1000, 64);
        rec.exit(2, 10).unwrap();
        rec.exit(1, 1).unwrap();
        channel.finalize().unwrap();
    }

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmsprof");
    cmd.arg("aggregate").arg(&log).arg("-o").arg(dir.path());
    cmd.assert().success();

    assert_eq!(
        fs::read_to_string(dir.path().join("callgraph.log")).unwrap(),
        "1:2\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("cost_table.log")).unwrap(),
        "1,8,11\n2,8,10\n"
    );
}

#[test]
fn test_top_ranks_callees_first() {
    let dir = TempDir::new().unwrap();
    let log = write_log(
        dir.path(),
        &[
            TraceEvent::new(2, 2, 10, 80),
            TraceEvent::new(1, 1, 20, 100),
            TraceEvent::terminator(),
        ],
    );
    let names = dir.path().join("names.csv");
    fs::write(&names, "1,main\n2,sort\n").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmsprof");
    cmd.arg("top").arg(&log).arg("--csv").arg("--names").arg(&names);
    cmd.assert().success().stdout(predicate::str::contains(
        "rank,subject_id,name,worst_cost,worst_rms,footprints\n\
         1,2,\"sort\",80,10,1\n\
         2,1,\"main\",100,20,1\n",
    ));
}

#[test]
fn test_dump_prints_records() {
    let dir = TempDir::new().unwrap();
    let log = write_log(
        dir.path(),
        &[
            TraceEvent::new(42, 7, 3, 99),
            TraceEvent::new(43, 8, 4, 100),
            TraceEvent::terminator(),
        ],
    );

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmsprof");
    cmd.arg("dump").arg(&log).arg("--limit").arg("1");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("42").and(predicate::str::contains("99")))
        .stdout(predicate::str::contains("43").not());
}

#[test]
fn test_export_and_query() {
    let dir = TempDir::new().unwrap();
    let log = write_log(
        dir.path(),
        &[
            TraceEvent::new(5, 1, 10, 100),
            TraceEvent::new(5, 2, 10, 250),
            TraceEvent::terminator(),
        ],
    );
    let db = dir.path().join("profile.db");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmsprof");
    cmd.arg("aggregate")
        .arg(&log)
        .arg("-o")
        .arg(dir.path())
        .arg("--db")
        .arg(&db);
    cmd.assert().success();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmsprof");
    cmd.arg("query")
        .arg(&db)
        .arg("SELECT subject_id, rms, cost FROM costs");
    cmd.assert()
        .success()
        .stdout("subject_id\trms\tcost\n5\t10\t250\n");
}

#[test]
fn test_invalid_arguments_exit_code() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmsprof");
    cmd.arg("top").arg("-n").arg("0");
    cmd.assert().failure().code(2);
}
