//! Configuration module for fieldvault
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - Deployment settings persistence
//! - Master key source configuration

pub mod paths;
pub mod settings;

pub use paths::VaultPaths;
pub use settings::{MasterKeySettings, MasterKeySource, MonitoringSettings, Settings};
