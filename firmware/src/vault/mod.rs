//! Ordered, capacity-bounded store of encrypted credentials.
//!
//! Memory is the source of truth. Every mutation is followed by a save; a failed save is logged
//! and reported on the status channel while the in-memory state stays authoritative.
use alloc::string::String;
use alloc::vec::Vec;

use embedded_storage_async::nor_flash::NorFlash;
use serde::{Deserialize, Serialize};
use shared::protocol::{LABEL_LEN, PASSWORD_LEN, TransportScope, UserEntry};

use crate::crypto::{CredentialCipher, CryptoError, Plaintext, SealedPassword};
use crate::status::{self, StatusEvent};
use crate::storage::VaultStorage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub label: String,
    pub password: SealedPassword,
    pub usage_count: u32,
    pub fingerprint_id: Option<u8>,
    pub auto_bind: bool,
    pub requires_os_unlock: bool,
    pub transport_scope: TransportScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultError {
    Capacity { limit: usize },
    OutOfRange { index: usize, count: usize },
    InvalidLabel { len: usize },
    PasswordTooLong { len: usize },
    Crypto(CryptoError),
}

impl From<CryptoError> for VaultError {
    fn from(error: CryptoError) -> Self {
        VaultError::Crypto(error)
    }
}

impl core::fmt::Display for VaultError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VaultError::Capacity { .. } => write!(f, "Vault full"),
            VaultError::OutOfRange { index, count } => {
                write!(f, "Index {index} out of range ({count} users)")
            }
            VaultError::InvalidLabel { len } => {
                write!(f, "Label of {len} bytes exceeds {LABEL_LEN}")
            }
            VaultError::PasswordTooLong { len } => {
                write!(f, "Password of {len} bytes exceeds {PASSWORD_LEN}")
            }
            VaultError::Crypto(err) => write!(f, "Crypto error: {err}"),
        }
    }
}

impl core::error::Error for VaultError {}

pub struct CredentialVault<C, F> {
    records: Vec<CredentialRecord>,
    capacity: usize,
    cipher: C,
    storage: VaultStorage<F>,
}

impl<C, F> CredentialVault<C, F>
where
    C: CredentialCipher,
    F: NorFlash,
{
    /// Empty vault; call [`load`](Self::load) to restore persisted records.
    pub fn new(cipher: C, storage: VaultStorage<F>, capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            cipher,
            storage,
        }
    }

    pub async fn open(cipher: C, storage: VaultStorage<F>, capacity: usize) -> Self {
        let mut vault = Self::new(cipher, storage, capacity);
        vault.load().await;
        vault
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn records(&self) -> &[CredentialRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&CredentialRecord> {
        self.records.get(index)
    }

    pub fn into_storage(self) -> VaultStorage<F> {
        self.storage
    }

    /// Restore records from flash. Any failure leaves the vault empty.
    pub async fn load(&mut self) -> bool {
        match self.storage.load(self.capacity).await {
            Ok(records) => {
                log::info!("vault restored with {} users", records.len());
                self.records = records;
                true
            }
            Err(err) => {
                log::error!("vault load failed, starting empty: {err:?}");
                self.records.clear();
                false
            }
        }
    }

    pub async fn save(&mut self) -> bool {
        match self.storage.save(&self.records).await {
            Ok(()) => true,
            Err(err) => {
                log::error!("vault save failed: {err:?}");
                status::publish(StatusEvent::SaveFailed);
                false
            }
        }
    }

    pub async fn add(&mut self, entry: &UserEntry) -> Result<usize, VaultError> {
        if self.records.len() >= self.capacity {
            return Err(VaultError::Capacity {
                limit: self.capacity,
            });
        }
        let record = self.seal_record(entry, 0)?;
        self.records.push(record);
        self.save().await;
        Ok(self.records.len() - 1)
    }

    /// Replace every field but the usage count.
    pub async fn edit(&mut self, index: usize, entry: &UserEntry) -> Result<(), VaultError> {
        let usage_count = self.check_index(index)?.usage_count;
        let record = self.seal_record(entry, usage_count)?;
        self.records[index] = record;
        self.save().await;
        Ok(())
    }

    pub async fn remove(&mut self, index: usize) -> Result<(), VaultError> {
        self.check_index(index)?;
        self.records.remove(index);
        if self.save().await {
            match self.storage.load(self.capacity).await {
                Ok(records) => self.records = records,
                Err(err) => log::warn!("vault reload after remove failed: {err:?}"),
            }
        }
        Ok(())
    }

    pub fn get_plaintext(&self, index: usize) -> Result<Plaintext, VaultError> {
        let record = self.check_index(index)?;
        Ok(self.cipher.open(&record.password)?)
    }

    /// Decrypted wire view of a record, as pushed to the companion.
    pub fn entry(&self, index: usize) -> Result<UserEntry, VaultError> {
        let record = self.check_index(index)?;
        Ok(UserEntry {
            label: record.label.clone(),
            password: self.cipher.open(&record.password)?,
            requires_os_unlock: record.requires_os_unlock,
            auto_bind: record.auto_bind,
            fingerprint_id: record.fingerprint_id,
            transport_scope: record.transport_scope,
        })
    }

    /// Count one use, re-rank and persist. Returns the record's new position.
    pub async fn increment_usage(&mut self, index: usize) -> Result<usize, VaultError> {
        let record = self.check_index_mut(index)?;
        record.usage_count = record.usage_count.saturating_add(1);
        let new_index = self.rank(Some(index)).unwrap_or(index);
        self.save().await;
        Ok(new_index)
    }

    /// Order by descending usage; equal counts keep their relative order.
    pub fn resort(&mut self) {
        self.rank(None);
    }

    pub async fn clear_all(&mut self) {
        self.records.clear();
        if let Err(err) = self.storage.clear().await {
            log::error!("vault erase failed: {err:?}");
            status::publish(StatusEvent::SaveFailed);
        }
    }

    /// First magic-finger record bound to `slot`.
    pub fn find_auto_bound(&self, slot: u8) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.auto_bind && record.fingerprint_id == Some(slot))
    }

    fn rank(&mut self, tracked: Option<usize>) -> Option<usize> {
        let mut indexed: Vec<(usize, CredentialRecord)> =
            self.records.drain(..).enumerate().collect();
        indexed.sort_by(|(_, a), (_, b)| b.usage_count.cmp(&a.usage_count));
        let position = tracked.and_then(|original| {
            indexed
                .iter()
                .position(|(previous, _)| *previous == original)
        });
        self.records = indexed.into_iter().map(|(_, record)| record).collect();
        position
    }

    fn seal_record(
        &self,
        entry: &UserEntry,
        usage_count: u32,
    ) -> Result<CredentialRecord, VaultError> {
        if entry.label.len() > LABEL_LEN {
            return Err(VaultError::InvalidLabel {
                len: entry.label.len(),
            });
        }
        if entry.password.len() > PASSWORD_LEN {
            return Err(VaultError::PasswordTooLong {
                len: entry.password.len(),
            });
        }

        Ok(CredentialRecord {
            label: entry.label.clone(),
            password: self.cipher.seal(&entry.password)?,
            usage_count,
            fingerprint_id: entry.fingerprint_id,
            auto_bind: entry.auto_bind,
            requires_os_unlock: entry.requires_os_unlock,
            transport_scope: entry.transport_scope,
        })
    }

    fn check_index(&self, index: usize) -> Result<&CredentialRecord, VaultError> {
        let count = self.records.len();
        self.records
            .get(index)
            .ok_or(VaultError::OutOfRange { index, count })
    }

    fn check_index_mut(&mut self, index: usize) -> Result<&mut CredentialRecord, VaultError> {
        let count = self.records.len();
        self.records
            .get_mut(index)
            .ok_or(VaultError::OutOfRange { index, count })
    }
}

#[cfg(test)]
mod vault_tests;
