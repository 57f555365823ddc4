//! Versioned key ring
//!
//! The key store holds every readable data key unwrapped in memory: the
//! single active (write) version plus any retiring versions still
//! referenced by stored envelopes. The ring mirrors the `fv_key_versions`
//! table; rotation commits its database transaction first and then applies
//! the same change to the ring, so a crash can never leave the database
//! behind the memory state.
//!
//! Reads take a shared lock and clone an `Arc` to the key, so an in-flight
//! decrypt keeps its key alive even if the version is retired mid-call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::crypto::keys::{DataKey, MasterKey};
use crate::error::{VaultError, VaultResult};
use crate::models::{KeyStatus, KeyVersion};
use crate::storage::{keys as key_rows, Store};

/// A freshly generated key version, wrapped but not yet persisted
///
/// Produced by [`KeyStore::prepare_next_version`]; the rotation coordinator
/// persists `meta` inside its transaction and then hands the whole value
/// back to [`KeyStore::adopt_version`].
pub struct PreparedVersion {
    /// Metadata row, status `active`, carrying the wrapped key blob
    pub meta: KeyVersion,
    key: DataKey,
}

impl PreparedVersion {
    /// Version number this key will take
    pub fn version(&self) -> u32 {
        self.meta.version
    }
}

#[derive(Debug)]
struct KeyRing {
    active: u32,
    /// Unwrapped keys for readable (active + retiring) versions
    keys: HashMap<u32, Arc<DataKey>>,
    /// Metadata for every version, including retired ones
    versions: BTreeMap<u32, KeyVersion>,
}

/// In-memory view of the key hierarchy
#[derive(Debug)]
pub struct KeyStore {
    master: MasterKey,
    ring: RwLock<KeyRing>,
}

impl KeyStore {
    /// Create the first key version and open the store
    ///
    /// Fails if any version already exists; `open` is the path for an
    /// initialized vault.
    pub fn bootstrap(store: &Store, master: MasterKey) -> VaultResult<Self> {
        store.with_conn(|conn| {
            if key_rows::max_version(conn)? != 0 {
                return Err(VaultError::Config(
                    "key store already initialized".to_string(),
                ));
            }
            let data_key = DataKey::generate();
            let wrapped = master.wrap_key(&data_key, 1)?;
            key_rows::insert_key_version(conn, &KeyVersion::new_active(1, wrapped))?;
            Ok(())
        })?;
        Self::open(store, master)
    }

    /// Load every version and unwrap the readable ones
    pub fn open(store: &Store, master: MasterKey) -> VaultResult<Self> {
        let rows = store.with_conn(|conn| key_rows::load_key_versions(conn))?;
        if rows.is_empty() {
            return Err(VaultError::Config(
                "key store is empty; run `fieldvault init` first".to_string(),
            ));
        }

        let mut active = None;
        let mut keys = HashMap::new();
        let mut versions = BTreeMap::new();

        for kv in rows {
            if kv.status == KeyStatus::Active {
                if active.replace(kv.version).is_some() {
                    return Err(VaultError::Storage(
                        "key ring corrupt: multiple active versions".to_string(),
                    ));
                }
            }
            if kv.is_readable() {
                let key = master.unwrap_key(&kv.wrapped_key, kv.version)?;
                keys.insert(kv.version, Arc::new(key));
            }
            versions.insert(kv.version, kv);
        }

        let active = active.ok_or_else(|| {
            VaultError::Storage("key ring corrupt: no active version".to_string())
        })?;

        Ok(Self {
            master,
            ring: RwLock::new(KeyRing {
                active,
                keys,
                versions,
            }),
        })
    }

    /// Version currently used for writes
    pub fn active_version(&self) -> u32 {
        self.ring.read().active
    }

    /// The write key and its version
    pub fn current_write_key(&self) -> VaultResult<(u32, Arc<DataKey>)> {
        let ring = self.ring.read();
        let key = ring.keys.get(&ring.active).cloned().ok_or_else(|| {
            VaultError::Storage("key ring corrupt: active key missing".to_string())
        })?;
        Ok((ring.active, key))
    }

    /// Key for a specific version, if it is still readable
    ///
    /// Retired and never-seen versions are indistinguishable to callers:
    /// both are unknown for decryption purposes.
    pub fn key_for(&self, version: u32) -> VaultResult<Arc<DataKey>> {
        self.ring
            .read()
            .keys
            .get(&version)
            .cloned()
            .ok_or(VaultError::UnknownKeyVersion(version))
    }

    /// Metadata for every version, oldest first
    pub fn versions(&self) -> Vec<KeyVersion> {
        self.ring.read().versions.values().cloned().collect()
    }

    /// Metadata for one version
    pub fn version(&self, version: u32) -> Option<KeyVersion> {
        self.ring.read().versions.get(&version).cloned()
    }

    /// Generate and wrap the next key version without persisting it
    pub fn prepare_next_version(&self) -> VaultResult<PreparedVersion> {
        let next = {
            let ring = self.ring.read();
            ring.versions
                .keys()
                .next_back()
                .copied()
                .unwrap_or(0)
                .checked_add(1)
                .ok_or_else(|| VaultError::Storage("key version space exhausted".to_string()))?
        };
        let key = DataKey::generate();
        let wrapped = self.master.wrap_key(&key, next)?;
        Ok(PreparedVersion {
            meta: KeyVersion::new_active(next, wrapped),
            key,
        })
    }

    /// Swap the ring to a new active version
    ///
    /// `retiring` is the old active version's row as the caller just
    /// persisted it. The swap is a single write-lock section: after it,
    /// writers pick up the new version while readers still resolve the
    /// old one.
    pub fn adopt_version(&self, prepared: PreparedVersion, retiring: KeyVersion) -> VaultResult<()> {
        let mut ring = self.ring.write();
        if prepared.meta.version <= ring.active {
            return Err(VaultError::Storage(format!(
                "cannot adopt v{}: ring already at v{}",
                prepared.meta.version, ring.active
            )));
        }
        ring.active = prepared.meta.version;
        ring.keys
            .insert(prepared.meta.version, Arc::new(prepared.key));
        ring.versions.insert(retiring.version, retiring);
        ring.versions.insert(prepared.meta.version, prepared.meta);
        Ok(())
    }

    /// Drop a retired version's key material from the ring
    ///
    /// `retired` is the version's row as the caller just persisted it.
    /// Decrypts that already cloned the key finish unaffected; new lookups
    /// fail with `UnknownKeyVersion`.
    pub fn apply_retired(&self, retired: KeyVersion) {
        let mut ring = self.ring.write();
        ring.keys.remove(&retired.version);
        ring.versions.insert(retired.version, retired);
    }

    /// Undo an adoption: restore the old active version and drop the new one
    ///
    /// Used when a rotation is aborted before any re-encryption committed.
    /// `restored` is the old version's row, back in the `active` state, as
    /// the caller just persisted it; `removed` is the version whose row the
    /// caller just deleted.
    pub fn apply_reverted(&self, restored: KeyVersion, removed: u32) {
        let mut ring = self.ring.write();
        ring.active = restored.version;
        ring.keys.remove(&removed);
        ring.versions.remove(&removed);
        ring.versions.insert(restored.version, restored);
    }
}
