use super::schema::{self, SCHEMA_VERSION};
use crate::aggregate::Aggregate;
use crate::error::Result;
use crate::log::LogSource;
use rusqlite::Connection;
use std::path::Path;

/// SQLite export of an aggregation pass
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Create a new database file, replacing any tables already in it
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;

        schema::create_tables(&conn)?;
        schema::set_meta(&conn, "version", &SCHEMA_VERSION.to_string())?;
        schema::set_meta(&conn, "created_at", &chrono::Utc::now().to_rfc3339())?;

        Ok(Storage { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Write the call graph, cost table and pass statistics in one transaction
    pub fn write_aggregate(&mut self, source: &LogSource, aggregate: &Aggregate) -> Result<()> {
        let tx = self.conn.transaction()?;

        {
            let mut insert_edge =
                tx.prepare_cached("INSERT OR IGNORE INTO call_edges (caller, callee) VALUES (?, ?)")?;
            for (caller, callees) in aggregate.graph.iter() {
                for &callee in callees {
                    insert_edge.execute([caller, callee])?;
                }
            }

            let mut insert_cost = tx.prepare_cached(
                "INSERT OR REPLACE INTO costs (subject_id, rms, cost) VALUES (?, ?, ?)",
            )?;
            for (subject, rms, cost) in aggregate.costs.iter() {
                // SQLite integers are signed; saturate rather than wrap
                let cost = i64::try_from(cost).unwrap_or(i64::MAX);
                insert_cost.execute(rusqlite::params![subject, rms, cost])?;
            }
        }

        let stats = &aggregate.stats;
        schema::set_meta(&tx, "log", &source.to_string())?;
        schema::set_meta(&tx, "records", &stats.records.to_string())?;
        schema::set_meta(&tx, "terminated", &stats.terminated.to_string())?;
        schema::set_meta(&tx, "truncated_bytes", &stats.truncated_bytes.to_string())?;

        tx.commit()?;

        tracing::debug!(
            edges = aggregate.graph.edge_count(),
            costs = aggregate.costs.len(),
            "exported aggregate"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmsprof_trace::TraceEvent;
    use std::path::PathBuf;

    fn sample() -> Aggregate {
        let mut aggregator = crate::aggregate::Aggregator::new();
        aggregator.feed(TraceEvent::new(3, 2, 1, 5));
        aggregator.feed(TraceEvent::new(2, 1, 4, 9));
        aggregator.feed(TraceEvent::new(3, 3, 1, 8));
        aggregator.finish()
    }

    #[test]
    fn test_export_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("profile.db");
        let mut storage = Storage::create(&db).unwrap();
        storage
            .write_aggregate(&LogSource::File(PathBuf::from("run.trace")), &sample())
            .unwrap();

        let conn = storage.connection();
        let edges: i64 = conn
            .query_row("SELECT COUNT(*) FROM call_edges", [], |row| row.get(0))
            .unwrap();
        assert_eq!(edges, 1);

        let cost: i64 = conn
            .query_row(
                "SELECT cost FROM costs WHERE subject_id = 3 AND rms = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(cost, 8);

        assert_eq!(
            schema::get_meta(conn, "log").unwrap().as_deref(),
            Some("run.trace")
        );
        assert_eq!(
            schema::get_meta(conn, "records").unwrap().as_deref(),
            Some("3")
        );
        assert!(schema::get_meta(conn, "created_at").unwrap().is_some());
        assert_eq!(schema::get_meta(conn, "missing").unwrap(), None);
    }

    #[test]
    fn test_create_replaces_previous_export() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("profile.db");
        let source = LogSource::File(PathBuf::from("run.trace"));
        Storage::create(&db)
            .unwrap()
            .write_aggregate(&source, &sample())
            .unwrap();

        let mut storage = Storage::create(&db).unwrap();
        storage
            .write_aggregate(&source, &Aggregate::default())
            .unwrap();
        let rows: i64 = storage
            .connection()
            .query_row("SELECT COUNT(*) FROM costs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }
}
