//! Core data models for fieldvault
//!
//! This module contains the data structures that represent the key and job
//! domain: key versions, rotation plans, and migration jobs.

pub mod ids;
pub mod key_version;
pub mod migration;
pub mod rotation;

pub use ids::{JobId, PlanId};
pub use key_version::{KeyStatus, KeyVersion};
pub use migration::{MigrationJob, MigrationStatus};
pub use rotation::{RotationPlan, RotationStatus};
