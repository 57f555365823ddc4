//! Shared command context
//!
//! Commands build up in two layers. `OpsContext::load` opens everything
//! that needs no key material: paths, settings, the database, the field
//! registry, and the audit log. `unlock` then loads the master key from
//! its configured source (prompting for a passphrase when that is the
//! source) and opens the key ring on top.

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::config::{MasterKeySource, Settings, VaultPaths};
use crate::crypto::SecureString;
use crate::error::{VaultError, VaultResult};
use crate::fields::FieldRegistry;
use crate::keystore::KeyStore;
use crate::migration::Migrator;
use crate::monitor::MonitoringService;
use crate::rotation::RotationCoordinator;
use crate::storage::Store;

/// Everything a command can touch without the master key
pub struct OpsContext {
    pub paths: VaultPaths,
    pub settings: Settings,
    pub store: Arc<Store>,
    pub registry: Arc<FieldRegistry>,
    pub audit: Arc<AuditLog>,
}

impl OpsContext {
    pub fn load() -> VaultResult<Self> {
        let paths = VaultPaths::new()?;
        if !paths.is_initialized() {
            return Err(VaultError::Config(
                "fieldvault is not initialized; run `fieldvault init` first".to_string(),
            ));
        }

        let settings = Settings::load_or_create(&paths)?;
        let fields_file = paths.fields_file();
        if !fields_file.exists() {
            return Err(VaultError::Config(format!(
                "no field map at {}; run `fieldvault init` to create a template",
                fields_file.display()
            )));
        }

        let store = Arc::new(Store::open(&paths.database_file())?);
        let registry = Arc::new(FieldRegistry::load(&fields_file)?);
        let audit = Arc::new(AuditLog::open(settings.audit_log_path(&paths))?);

        Ok(Self {
            paths,
            settings,
            store,
            registry,
            audit,
        })
    }

    /// Load the master key and open the key ring
    pub fn unlock(self) -> VaultResult<CryptoContext> {
        let passphrase = match self.settings.master_key.source {
            MasterKeySource::Passphrase => Some(read_passphrase("Master passphrase: ")?),
            MasterKeySource::Env => None,
        };
        let master = self.settings.master_key.load_key(passphrase.as_ref())?;
        let keystore = Arc::new(KeyStore::open(&self.store, master)?);
        Ok(CryptoContext {
            ops: self,
            keystore,
        })
    }
}

/// An `OpsContext` with the key ring unlocked
pub struct CryptoContext {
    pub ops: OpsContext,
    pub keystore: Arc<KeyStore>,
}

impl CryptoContext {
    pub fn rotation(&self) -> RotationCoordinator {
        RotationCoordinator::new(
            Arc::clone(&self.ops.store),
            Arc::clone(&self.keystore),
            Arc::clone(&self.ops.registry),
            Arc::clone(&self.ops.audit),
            self.ops.settings.batch_size,
        )
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(
            Arc::clone(&self.ops.store),
            Arc::clone(&self.keystore),
            Arc::clone(&self.ops.registry),
            Arc::clone(&self.ops.audit),
        )
    }

    pub fn monitor(&self) -> MonitoringService {
        MonitoringService::new(
            Arc::clone(&self.ops.store),
            Arc::clone(&self.keystore),
            Arc::clone(&self.ops.registry),
            Arc::clone(&self.ops.audit),
            &self.ops.settings,
        )
    }
}

/// Prompt on the controlling terminal without echoing
pub fn read_passphrase(prompt: &str) -> VaultResult<SecureString> {
    let entered = rpassword::prompt_password(prompt)?;
    Ok(SecureString::new(entered))
}
