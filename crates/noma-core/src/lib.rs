//! Core types and utilities for the noma screening classifier.
//!
//! This crate holds what every other crate in the workspace agrees on: the
//! error type, the run configuration, the class catalog and its persisted
//! mapping, metric records, seeding, backend aliases and the atomic
//! file/package helpers used for every artifact.

pub mod backend;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod package;
pub mod persist;
pub mod seed;
pub mod types;

pub use backend::*;
pub use catalog::{ClassCatalog, CLASS_MAP_FILE};
pub use cli::*;
pub use config::TrainingConfiguration;
pub use error::{Error, Result};
pub use metrics::*;
pub use package::{read_package, write_package, PackageKind};
pub use persist::{atomic_write, atomic_write_json};
pub use seed::{ReproducibilityController, RngStream};
pub use types::*;

/// Re-export commonly used types
pub mod prelude {
    pub use burn::prelude::*;
    pub use crate::catalog::ClassCatalog;
    pub use crate::config::TrainingConfiguration;
    pub use crate::error::{Error, Result};
    pub use crate::metrics::*;
    pub use crate::seed::{ReproducibilityController, RngStream};
    pub use crate::types::*;
}
