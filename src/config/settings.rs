//! Settings for fieldvault
//!
//! Manages the deployment configuration: where the master key comes from,
//! the rotation interval compliance expects, batch sizes for background
//! jobs, and monitoring thresholds.

use serde::{Deserialize, Serialize};

use super::paths::VaultPaths;
use crate::crypto::keys::{KdfParams, MasterKey};
use crate::crypto::SecureString;
use crate::error::{VaultError, VaultResult};

/// Where the master key material comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MasterKeySource {
    /// Read from an environment variable (hex or base64)
    #[default]
    Env,
    /// Derived from an operator passphrase with Argon2id
    Passphrase,
}

/// Master key configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MasterKeySettings {
    /// Where the key material comes from
    #[serde(default)]
    pub source: MasterKeySource,

    /// Environment variable holding the key when source is `env`
    #[serde(default = "default_env_var")]
    pub env_var: String,

    /// Key derivation parameters when source is `passphrase`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_params: Option<KdfParams>,

    /// Verifier token checked at startup to catch a wrong key early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
}

impl MasterKeySettings {
    /// Load the master key from the configured source
    ///
    /// For the passphrase source the caller supplies the passphrase (the
    /// CLI prompts for it); this keeps prompting out of the library path.
    /// When a verifier token is stored the loaded key is checked against it.
    pub fn load_key(&self, passphrase: Option<&SecureString>) -> VaultResult<MasterKey> {
        let key = match self.source {
            MasterKeySource::Env => {
                let encoded = std::env::var(&self.env_var).map_err(|_| {
                    VaultError::MasterKey(format!(
                        "environment variable {} is not set",
                        self.env_var
                    ))
                })?;
                MasterKey::from_encoded(&encoded)?
            }
            MasterKeySource::Passphrase => {
                let params = self.kdf_params.as_ref().ok_or_else(|| {
                    VaultError::Config(
                        "passphrase source configured without kdf_params; run init again".into(),
                    )
                })?;
                let passphrase = passphrase.ok_or_else(|| {
                    VaultError::MasterKey("a passphrase is required".to_string())
                })?;
                MasterKey::from_passphrase(passphrase.as_str(), params)?
            }
        };

        if let Some(verifier) = &self.verifier {
            key.check_verifier(verifier)?;
        }
        Ok(key)
    }
}

/// Monitoring thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    /// Gates the watch loop; one-shot health checks always run
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How far back health reports look at the audit log, in hours
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,

    /// Decrypt failure rate above which an alert is raised (0.0 to 1.0)
    #[serde(default = "default_decrypt_failure_threshold")]
    pub decrypt_failure_threshold: f64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_hours: default_lookback_hours(),
            decrypt_failure_threshold: default_decrypt_failure_threshold(),
        }
    }
}

/// Settings for fieldvault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Master key configuration
    #[serde(default)]
    pub master_key: MasterKeySettings,

    /// How often compliance policy expects keys to rotate, in days
    #[serde(default = "default_rotation_interval_days")]
    pub rotation_interval_days: u32,

    /// Default batch size for rotation and migration jobs
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Monitoring thresholds
    #[serde(default)]
    pub monitoring: MonitoringSettings,

    /// Audit log location when the default under the data dir will not do
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<std::path::PathBuf>,

    /// Actor recorded in audit entries for interactive CLI use
    #[serde(default = "default_actor")]
    pub actor: String,

    /// Whether initial setup has been completed
    #[serde(default)]
    pub setup_completed: bool,
}

fn default_schema_version() -> u32 {
    1
}

fn default_env_var() -> String {
    "FIELDVAULT_MASTER_KEY".to_string()
}

fn default_rotation_interval_days() -> u32 {
    90
}

fn default_batch_size() -> usize {
    500
}

fn default_true() -> bool {
    true
}

fn default_lookback_hours() -> u32 {
    24
}

fn default_decrypt_failure_threshold() -> f64 {
    0.01
}

fn default_actor() -> String {
    "fieldvault-cli".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            master_key: MasterKeySettings {
                source: MasterKeySource::Env,
                env_var: default_env_var(),
                kdf_params: None,
                verifier: None,
            },
            rotation_interval_days: default_rotation_interval_days(),
            batch_size: default_batch_size(),
            monitoring: MonitoringSettings::default(),
            audit_log: None,
            actor: default_actor(),
            setup_completed: false,
        }
    }
}

impl Settings {
    /// Audit log path, honoring the settings override
    pub fn audit_log_path(&self, paths: &VaultPaths) -> std::path::PathBuf {
        self.audit_log.clone().unwrap_or_else(|| paths.audit_log())
    }

    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &VaultPaths) -> Result<Self, VaultError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path)
                .map_err(|e| VaultError::Io(format!("Failed to read settings file: {}", e)))?;

            let settings: Settings = serde_json::from_str(&contents)
                .map_err(|e| VaultError::Config(format!("Failed to parse settings file: {}", e)))?;

            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &VaultPaths) -> Result<(), VaultError> {
        // Ensure the config directory exists
        paths.ensure_directories()?;

        let settings_path = paths.settings_file();
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| VaultError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(&settings_path, contents)
            .map_err(|e| VaultError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }
}
