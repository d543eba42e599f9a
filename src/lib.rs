// src/lib.rs
//
// =============================================================================
// HMM-MD-CORE: LIBRARY ROOT
// =============================================================================
//
// This file declares the module tree and exports public types.

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod io;
pub mod partition;
pub mod spline;
pub mod tensor;

pub use aggregate::Aggregator;
pub use catalog::{ReplicaCatalog, ReplicaData};
pub use config::StmdConfig;
pub use dispatch::{DispatchPlan, JobDescriptor, PendingUpdate};
pub use error::CatalogError;
pub use partition::{BatchCommunicator, BatchPlan};
pub use spline::Strain6D;
