use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fieldvault::cli::{
    handle_health_command, handle_init_command, handle_keys_command, handle_migrate_command,
    handle_report_command, handle_rotate_command, KeysCommands, MigrateCommands, OpsContext,
    ReportCommands, RotateCommands,
};
use fieldvault::config::{Settings, VaultPaths};

#[derive(Parser)]
#[command(
    name = "fieldvault",
    version,
    about = "Transparent field-level encryption for relational records",
    long_about = "fieldvault encrypts declared-sensitive columns at rest with \
                  AES-256-GCM under versioned keys, while keeping reads and \
                  writes transparent to the application. It ships the operator \
                  tooling around that core: key rotation, plaintext migration, \
                  audit logging, and compliance health checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up paths, settings, the database, and key version v1
    Init {
        /// Derive the master key from a passphrase instead of an environment variable
        #[arg(long)]
        passphrase: bool,
    },

    /// Plaintext migration jobs
    #[command(subcommand)]
    Migrate(MigrateCommands),

    /// Key rotation plans
    #[command(subcommand)]
    Rotate(RotateCommands),

    /// Key ring inspection
    #[command(subcommand)]
    Keys(KeysCommands),

    /// Compliance health report
    Health {
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
        /// Keep polling at a fixed interval
        #[arg(long)]
        watch: bool,
        /// Seconds between polls in watch mode
        #[arg(long, default_value = "60")]
        interval: u64,
    },

    /// Compliance report exports
    #[command(subcommand)]
    Report(ReportCommands),

    /// Show current configuration and paths
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { passphrase }) => {
            handle_init_command(passphrase)?;
        }
        Some(Commands::Migrate(cmd)) => {
            let ctx = OpsContext::load()?.unlock()?;
            handle_migrate_command(&ctx, cmd)?;
        }
        Some(Commands::Rotate(cmd)) => {
            let ctx = OpsContext::load()?.unlock()?;
            handle_rotate_command(&ctx, cmd)?;
        }
        Some(Commands::Keys(cmd)) => {
            let ctx = OpsContext::load()?.unlock()?;
            handle_keys_command(&ctx, cmd)?;
        }
        Some(Commands::Health {
            json,
            watch,
            interval,
        }) => {
            let ctx = OpsContext::load()?.unlock()?;
            handle_health_command(&ctx, json, watch, interval)?;
        }
        Some(Commands::Report(cmd)) => {
            let ctx = OpsContext::load()?;
            handle_report_command(&ctx, cmd)?;
        }
        Some(Commands::Config) => {
            let paths = VaultPaths::new()?;
            let settings = Settings::load_or_create(&paths)?;

            println!("fieldvault configuration");
            println!("========================");
            println!("Base directory: {}", paths.base_dir().display());
            println!("Database:       {}", paths.database_file().display());
            println!("Field map:      {}", paths.fields_file().display());
            println!("Audit log:      {}", settings.audit_log_path(&paths).display());
            println!();
            println!("Settings:");
            println!("  Master key source:  {:?}", settings.master_key.source);
            println!("  Rotation interval:  {} days", settings.rotation_interval_days);
            println!("  Batch size:         {}", settings.batch_size);
            println!("  Monitoring window:  {} hours", settings.monitoring.lookback_hours);
            println!("  Setup completed:    {}", settings.setup_completed);
        }
        None => {
            println!("fieldvault - field-level encryption for relational records");
            println!();
            println!("Run 'fieldvault --help' for usage information.");
            println!("Run 'fieldvault init' to set up a new deployment.");
        }
    }

    Ok(())
}
