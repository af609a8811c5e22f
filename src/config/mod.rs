//! Manifest schema and persisted configuration

pub mod schema;
pub mod store;
