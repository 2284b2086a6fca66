//! Encrypted vault for sensitive personal data.
//!
//! Task records carry only vault record ids; the plaintext (fiscal numbers,
//! health data, identity documents) lives here, encrypted at rest with
//! authenticated encryption and released only to the owning identity. Vault
//! failures are never translated into task state; they propagate to the
//! caller that initiated the vault operation.

pub mod crypto;

use crate::vault::crypto::{KeyRing, MASTER_KEY_LEN, NONCE_LEN};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Vault operation failures. Messages never carry plaintext.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    /// Requester does not own the record. Raised before any decryption
    /// attempt.
    #[error("access denied")]
    AccessDenied,

    /// Authentication-tag mismatch: tampered ciphertext or wrong key. A
    /// data-integrity failure, not a retriable condition.
    #[error("encryption integrity failure")]
    Encryption,

    #[error("record not found")]
    RecordNotFound,

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("backing store failure: {0}")]
    Storage(String),

    #[error("payload serialization failed")]
    Serialization,
}

/// Sensitivity tier. The tier selects the key chain a record is encrypted
/// under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Public,
    Internal,
    Confidential,
    Secret,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tier = match self {
            Classification::Public => "public",
            Classification::Internal => "internal",
            Classification::Confidential => "confidential",
            Classification::Secret => "secret",
        };
        f.write_str(tier)
    }
}

/// Vault record identifier, "VLT-" followed by 32 hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
        Self(format!("VLT-{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encrypted record as persisted in the backing store. Owned exclusively by
/// the vault; nothing outside this module reads the ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub id: RecordId,
    pub owner_id: String,
    pub classification: Classification,
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub key_version: u32,
    pub created_at: DateTime<Utc>,
}

/// Entry of an owner data export.
#[derive(Debug, Clone, Serialize)]
pub struct OwnerExportEntry {
    pub record_id: RecordId,
    pub classification: Classification,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Opaque blob storage for vault records, keyed by record id. Writes are
/// atomic: a record is either fully stored or absent.
#[async_trait]
pub trait VaultStore: Send + Sync {
    async fn put(&self, record: VaultRecord) -> Result<(), VaultError>;

    async fn get(&self, id: &RecordId) -> Result<Option<VaultRecord>, VaultError>;

    /// Returns whether a record was deleted.
    async fn delete(&self, id: &RecordId) -> Result<bool, VaultError>;

    async fn ids_for_owner(&self, owner_id: &str) -> Result<Vec<RecordId>, VaultError>;
}

#[async_trait]
impl<T: VaultStore + ?Sized> VaultStore for std::sync::Arc<T> {
    async fn put(&self, record: VaultRecord) -> Result<(), VaultError> {
        (**self).put(record).await
    }

    async fn get(&self, id: &RecordId) -> Result<Option<VaultRecord>, VaultError> {
        (**self).get(id).await
    }

    async fn delete(&self, id: &RecordId) -> Result<bool, VaultError> {
        (**self).delete(id).await
    }

    async fn ids_for_owner(&self, owner_id: &str) -> Result<Vec<RecordId>, VaultError> {
        (**self).ids_for_owner(owner_id).await
    }
}

/// Encrypt-and-store service for sensitive payloads.
pub struct DataVault<S: VaultStore> {
    keys: KeyRing,
    store: S,
}

impl<S: VaultStore> DataVault<S> {
    pub fn new(master_key: [u8; MASTER_KEY_LEN], store: S) -> Self {
        Self {
            keys: KeyRing::new(master_key),
            store,
        }
    }

    /// Encrypt a payload under the active key of the requested tier and
    /// persist it. The owner id is bound into the authentication tag, so a
    /// record cannot be replayed under another identity.
    pub async fn store(
        &self,
        owner_id: &str,
        payload: &serde_json::Value,
        classification: Classification,
    ) -> Result<RecordId, VaultError> {
        let plaintext = serde_json::to_vec(payload).map_err(|_| VaultError::Serialization)?;

        let (cipher, key_version) = self.keys.active_cipher_for(classification)?;
        let nonce = crypto::generate_nonce();
        let ciphertext = crypto::encrypt(&cipher, &nonce, &plaintext, owner_id.as_bytes())?;

        let record = VaultRecord {
            id: RecordId::generate(),
            owner_id: owner_id.to_string(),
            classification,
            ciphertext,
            nonce,
            key_version,
            created_at: Utc::now(),
        };
        let record_id = record.id.clone();

        self.store.put(record).await?;

        info!(
            record_id = %record_id,
            classification = %classification,
            key_version,
            "vault record stored"
        );
        Ok(record_id)
    }

    /// Decrypt a record for its owner. The ownership check runs before any
    /// key derivation or decryption; records written before a key rotation
    /// decrypt with their stored version.
    pub async fn retrieve(
        &self,
        record_id: &RecordId,
        requester_id: &str,
    ) -> Result<serde_json::Value, VaultError> {
        let record = self
            .store
            .get(record_id)
            .await?
            .ok_or(VaultError::RecordNotFound)?;

        if record.owner_id != requester_id {
            warn!(record_id = %record_id, "vault access denied");
            return Err(VaultError::AccessDenied);
        }

        let cipher = self.keys.cipher_for(record.classification, record.key_version)?;
        let plaintext = crypto::decrypt(
            &cipher,
            &record.nonce,
            &record.ciphertext,
            record.owner_id.as_bytes(),
        )?;

        serde_json::from_slice(&plaintext).map_err(|_| VaultError::Serialization)
    }

    /// Introduce a new key version for future writes. Existing records are
    /// untouched and re-encrypted lazily by an out-of-band maintenance pass.
    pub fn rotate_keys(&self) -> u32 {
        let version = self.keys.rotate();
        info!(key_version = version, "vault keys rotated");
        version
    }

    /// Permanently delete a record after an ownership check (erasure
    /// requests).
    pub async fn erase(&self, record_id: &RecordId, requester_id: &str) -> Result<(), VaultError> {
        let record = self
            .store
            .get(record_id)
            .await?
            .ok_or(VaultError::RecordNotFound)?;

        if record.owner_id != requester_id {
            warn!(record_id = %record_id, "vault erase denied");
            return Err(VaultError::AccessDenied);
        }

        if !self.store.delete(record_id).await? {
            return Err(VaultError::RecordNotFound);
        }

        info!(record_id = %record_id, "vault record erased");
        Ok(())
    }

    /// Decrypt every record owned by `owner_id` for a data-portability
    /// export.
    pub async fn export_owner_data(
        &self,
        owner_id: &str,
    ) -> Result<Vec<OwnerExportEntry>, VaultError> {
        let ids = self.store.ids_for_owner(owner_id).await?;
        let mut entries = Vec::with_capacity(ids.len());

        for id in ids {
            let record = self
                .store
                .get(&id)
                .await?
                .ok_or(VaultError::RecordNotFound)?;
            let payload = self.retrieve(&id, owner_id).await?;
            entries.push(OwnerExportEntry {
                record_id: id,
                classification: record.classification,
                created_at: record.created_at,
                payload,
            });
        }

        Ok(entries)
    }
}
