pub mod aggregate;
pub mod dump;
pub mod query;
pub mod top;
