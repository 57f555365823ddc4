//! CLI command handlers
//!
//! This module contains the implementation of CLI commands, bridging the
//! clap argument parsing with the engine: jobs, key ring, health, and
//! compliance exports.

pub mod context;
pub mod health;
pub mod init;
pub mod keys;
pub mod migrate;
pub mod report;
pub mod rotate;

pub use context::{CryptoContext, OpsContext};
pub use health::handle_health_command;
pub use init::handle_init_command;
pub use keys::{handle_keys_command, KeysCommands};
pub use migrate::{handle_migrate_command, MigrateCommands};
pub use report::{handle_report_command, ReportCommands};
pub use rotate::{handle_rotate_command, RotateCommands};
