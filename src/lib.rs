//! UVM - UTM VM Manager Library
//!
//! Provisions UTM virtual machines from a template gallery, drives their
//! lifecycle through the scripting bridge, and reaches into running guests
//! through `utmctl`.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod gallery;
pub mod guest;
pub mod logging;
pub mod migrate;
pub mod network;
pub mod utils;
pub mod vm;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use cli::commands::Cli;
pub use error::UvmError;
pub use gallery::Gallery;
pub use utils::paths::PathsConfig;
pub use vm::creator::{CreateParams, ProvisionFailure, VmCreator};
pub use vm::manager::VmManager;

/// Library result type
pub type Result<T> = std::result::Result<T, UvmError>;
