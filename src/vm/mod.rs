//! VM model, provisioning and lifecycle

pub mod bundle;
pub mod creator;
pub mod instance;
pub mod manager;
pub mod media;
