//! SQLite export of aggregation results, for ad-hoc queries with
//! `rmsprof query`.

pub mod schema;
mod writer;

pub use writer::Storage;
