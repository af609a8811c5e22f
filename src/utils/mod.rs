//! Path and process helpers

pub mod paths;
pub mod system;
