#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Emergency dispatch and green corridor coordination.
//!
//! An incident flows through four steps: the grid resolves its cell,
//! density alerting updates that cell's counters, the allocator reserves
//! the nearest capable unit and routes it, and the route becomes the new
//! green corridor. [`service::DispatchService`] wires these together with
//! the incident and unit lifecycle around them.

pub mod allocator;
pub mod capability;
pub mod config;
pub mod service;
pub mod simulation;

use civic_dispatch_alerting::AlertingError;
use civic_dispatch_grid::GridError;
use civic_dispatch_routing::RoutingError;
use civic_dispatch_store::StoreError;

pub use allocator::{Allocator, Assignment, DispatchOutcome};
pub use capability::CapabilityMap;
pub use config::{ConfigError, DispatchConfig};
pub use service::DispatchService;

/// Errors that can occur during dispatch operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Persistence failed; the operation was aborted.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A coordinate or cell id was rejected by the grid.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// Density alerting failed.
    #[error(transparent)]
    Alerting(#[from] AlertingError),

    /// The routing client could not be built.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request itself is not acceptable.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with it.
        message: String,
    },
}
