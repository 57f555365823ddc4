//! First-run setup
//!
//! Bootstraps everything a fresh deployment needs: the config and data
//! directories, settings with the chosen master key source, the SQLite
//! schema, key version v1, and a field map template for the operator to
//! fill in.

use std::sync::Arc;

use crate::config::{MasterKeySource, Settings, VaultPaths};
use crate::crypto::keys::{KdfParams, MasterKey};
use crate::crypto::SecureString;
use crate::error::{VaultError, VaultResult};
use crate::fields::FieldRegistry;
use crate::keystore::KeyStore;
use crate::storage::Store;

use super::context::read_passphrase;

/// Handle `fieldvault init`
pub fn handle_init_command(passphrase: bool) -> VaultResult<()> {
    let paths = VaultPaths::new()?;
    if paths.is_initialized() {
        return Err(VaultError::Config(format!(
            "fieldvault is already initialized at {}; remove config.json to start over",
            paths.base_dir().display()
        )));
    }

    println!("Initialize fieldvault");
    println!("=====================");
    println!();

    paths.ensure_directories()?;
    let mut settings = Settings::default();

    let master = if passphrase {
        println!("The master key will be derived from a passphrase with Argon2id.");
        println!("You will need to enter it for every command that touches ciphertext.");
        println!();
        println!("IMPORTANT: If you forget your passphrase, your data cannot be recovered!");
        println!();

        let entered = prompt_new_passphrase()?;
        let params = KdfParams::new();

        println!("Deriving master key...");
        let master = MasterKey::from_passphrase(entered.as_str(), &params)?;

        settings.master_key.source = MasterKeySource::Passphrase;
        settings.master_key.kdf_params = Some(params);
        master
    } else {
        println!(
            "Reading the master key from the {} environment variable.",
            settings.master_key.env_var
        );
        settings.master_key.load_key(None).map_err(|e| {
            VaultError::MasterKey(format!(
                "{}; export a 32-byte key (hex or base64), e.g. `openssl rand -hex 32`",
                e
            ))
        })?
    };

    // Stored verifier catches a wrong key at startup instead of as a tag
    // failure deep inside some later decrypt
    settings.master_key.verifier = Some(master.new_verifier()?);

    let store = Arc::new(Store::open(&paths.database_file())?);
    KeyStore::bootstrap(&store, master)?;
    println!("Created key version v1 (active).");

    let fields_file = paths.fields_file();
    if fields_file.exists() {
        println!("Keeping existing field map at {}.", fields_file.display());
    } else {
        FieldRegistry::write_template(&fields_file)?;
        println!("Wrote a field map template to {}.", fields_file.display());
    }

    settings.setup_completed = true;
    settings.save(&paths)?;

    println!();
    println!("Initialization complete!");
    println!();
    println!("Database:  {}", paths.database_file().display());
    println!("Field map: {}", fields_file.display());
    println!("Audit log: {}", settings.audit_log_path(&paths).display());
    println!();
    println!("Next steps:");
    println!("  1. Declare your sensitive columns in the field map.");
    println!("  2. Run 'fieldvault migrate plan <table>' for tables with existing data.");
    println!("  3. Run 'fieldvault health' to confirm coverage.");

    Ok(())
}

/// Prompt for a new passphrase with confirmation
fn prompt_new_passphrase() -> VaultResult<SecureString> {
    loop {
        let first = read_passphrase("Enter new passphrase: ")?;

        if first.len() < 8 {
            println!("Passphrase must be at least 8 characters. Please try again.");
            continue;
        }

        let second = read_passphrase("Confirm passphrase: ")?;

        if first.as_str() != second.as_str() {
            println!("Passphrases do not match. Please try again.");
            continue;
        }

        return Ok(first);
    }
}
