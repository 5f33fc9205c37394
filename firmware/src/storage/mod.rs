//! Flash persistence for the credential vault.
use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

#[cfg(target_arch = "xtensa")]
use embedded_storage::nor_flash::NorFlash as BlockingNorFlash;
use embedded_storage_async::nor_flash::NorFlash;
#[cfg(target_arch = "xtensa")]
use embedded_storage_async::nor_flash::ReadNorFlash;
use postcard::{from_bytes as postcard_from_bytes, to_allocvec as postcard_to_allocvec};
use sequential_storage::Error as FlashStorageError;
use sequential_storage::{cache::NoCache, map};
use zeroize::Zeroizing;

use crate::vault::CredentialRecord;

pub const STORAGE_KEY_RECORDS: u8 = 0x01;
pub const STORAGE_KEY_COUNT: u8 = 0x02;

/// Scratch buffer for one map item; sized for a full vault of maximum-length records.
pub const STORAGE_DATA_BUFFER_CAPACITY: usize = 2048;

#[derive(Debug)]
pub enum StorageError<E> {
    Flash(FlashStorageError<E>),
    Decode(String),
    CountMismatch { stored: u32, decoded: usize },
    Capacity { count: usize, limit: usize },
}

impl<E> From<FlashStorageError<E>> for StorageError<E> {
    fn from(error: FlashStorageError<E>) -> Self {
        StorageError::Flash(error)
    }
}

impl<E> core::fmt::Display for StorageError<E>
where
    FlashStorageError<E>: core::fmt::Display,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StorageError::Flash(err) => write!(f, "flash error: {err}"),
            StorageError::Decode(err) => write!(f, "decode error: {err}"),
            StorageError::CountMismatch { stored, decoded } => write!(
                f,
                "stored count {stored} does not match {decoded} decoded records"
            ),
            StorageError::Capacity { count, limit } => {
                write!(f, "{count} stored records exceed capacity {limit}")
            }
        }
    }
}

impl<E> core::error::Error for StorageError<E>
where
    FlashStorageError<E>: core::fmt::Debug + core::fmt::Display,
    E: core::fmt::Debug,
{
}

/// Record array and count stored as two items of a sequential-storage map.
pub struct VaultStorage<F> {
    flash: F,
    range: Range<u32>,
}

impl<F: NorFlash> VaultStorage<F> {
    pub fn new(flash: F, range: Range<u32>) -> Self {
        Self { flash, range }
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Read the persisted records, rejecting blobs that disagree with the stored count.
    pub async fn load(
        &mut self,
        capacity: usize,
    ) -> Result<Vec<CredentialRecord>, StorageError<F::Error>> {
        let mut cache = NoCache::new();
        let mut scratch = Zeroizing::new(vec![0u8; STORAGE_DATA_BUFFER_CAPACITY]);

        let count = map::fetch_item::<u8, u32, _>(
            &mut self.flash,
            self.range.clone(),
            &mut cache,
            scratch.as_mut_slice(),
            &STORAGE_KEY_COUNT,
        )
        .await?;

        let blob = map::fetch_item::<u8, Vec<u8>, _>(
            &mut self.flash,
            self.range.clone(),
            &mut cache,
            scratch.as_mut_slice(),
            &STORAGE_KEY_RECORDS,
        )
        .await?
        .map(Zeroizing::new);

        let records: Vec<CredentialRecord> = match &blob {
            Some(bytes) => postcard_from_bytes(bytes)
                .map_err(|err| StorageError::Decode(format!("failed to decode records: {err}")))?,
            None => Vec::new(),
        };

        let stored = count.unwrap_or(0);
        if stored as usize != records.len() {
            return Err(StorageError::CountMismatch {
                stored,
                decoded: records.len(),
            });
        }
        if records.len() > capacity {
            return Err(StorageError::Capacity {
                count: records.len(),
                limit: capacity,
            });
        }

        Ok(records)
    }

    /// Persist the records followed by their count.
    pub async fn save(&mut self, records: &[CredentialRecord]) -> Result<(), StorageError<F::Error>> {
        let mut cache = NoCache::new();
        let mut scratch = Zeroizing::new(vec![0u8; STORAGE_DATA_BUFFER_CAPACITY]);
        let encoded = Zeroizing::new(
            postcard_to_allocvec(records)
                .map_err(|err| StorageError::Decode(format!("failed to encode records: {err}")))?,
        );

        map::store_item(
            &mut self.flash,
            self.range.clone(),
            &mut cache,
            scratch.as_mut_slice(),
            &STORAGE_KEY_RECORDS,
            &*encoded,
        )
        .await?;

        map::store_item(
            &mut self.flash,
            self.range.clone(),
            &mut cache,
            scratch.as_mut_slice(),
            &STORAGE_KEY_COUNT,
            &(records.len() as u32),
        )
        .await?;

        Ok(())
    }

    /// Erase every stored item.
    pub async fn clear(&mut self) -> Result<(), StorageError<F::Error>> {
        sequential_storage::erase_all(&mut self.flash, self.range.clone()).await?;
        Ok(())
    }
}

/// Flash adapter over the ESP32-S3 SPI flash, locating the vault partition at boot.
#[cfg(target_arch = "xtensa")]
pub struct BootFlash<'d> {
    storage: embassy_embedded_hal::adapter::BlockingAsync<esp_storage::FlashStorage<'d>>,
}

#[cfg(target_arch = "xtensa")]
impl<'d> BootFlash<'d> {
    pub fn new(storage: esp_storage::FlashStorage<'d>) -> Self {
        Self {
            storage: embassy_embedded_hal::adapter::BlockingAsync::new(storage),
        }
    }

    pub fn flash_capacity(&self) -> usize {
        ReadNorFlash::capacity(&self.storage)
    }

    /// Scan the partition table for the vault data partition.
    pub async fn vault_range(&mut self) -> Option<Range<u32>> {
        use core::str;

        const PARTITION_MAGIC: u16 = 0x50AA;
        const PARTITION_TABLE_OFFSET: u32 = 0x8000;
        const PARTITION_TABLE_SIZE: usize = 0x1000;
        const PARTITION_ENTRY_SIZE: usize = 32;
        const DATA_PARTITION_TYPE: u8 = 0x01;
        const NVS_SUBTYPE: u8 = 0x02;
        const VAULT_LABELS: [&str; 3] = ["userdb", "fingerpass", "vault"];

        let mut table = Zeroizing::new([0u8; PARTITION_TABLE_SIZE]);
        if ReadNorFlash::read(&mut self.storage, PARTITION_TABLE_OFFSET, table.as_mut_slice())
            .await
            .is_err()
        {
            return None;
        }

        let mut fallback: Option<Range<u32>> = None;
        for entry in table.chunks_exact(PARTITION_ENTRY_SIZE) {
            let magic = u16::from_le_bytes([entry[0], entry[1]]);
            if magic == 0xFFFF {
                break;
            }
            if magic != PARTITION_MAGIC || entry[2] != DATA_PARTITION_TYPE {
                continue;
            }

            let offset = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
            let size = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
            let Some(end) = offset.checked_add(size).filter(|_| size > 0) else {
                continue;
            };

            let label_bytes = &entry[12..28];
            let label_end = label_bytes
                .iter()
                .position(|&byte| byte == 0)
                .unwrap_or(label_bytes.len());
            let Ok(label) = str::from_utf8(&label_bytes[..label_end]) else {
                continue;
            };

            if VAULT_LABELS
                .iter()
                .any(|expected| label.eq_ignore_ascii_case(expected))
            {
                return Some(offset..end);
            }
            if entry[3] == NVS_SUBTYPE && fallback.is_none() {
                fallback = Some(offset..end);
            }
        }

        fallback
    }
}

#[cfg(target_arch = "xtensa")]
impl<'d> embedded_storage_async::nor_flash::ErrorType for BootFlash<'d> {
    type Error = esp_storage::FlashStorageError;
}

#[cfg(target_arch = "xtensa")]
impl<'d> ReadNorFlash for BootFlash<'d> {
    const READ_SIZE: usize = esp_storage::FlashStorage::READ_SIZE as usize;

    fn capacity(&self) -> usize {
        self.flash_capacity()
    }

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.storage.read(offset, bytes).await
    }
}

#[cfg(target_arch = "xtensa")]
impl<'d> NorFlash for BootFlash<'d> {
    const WRITE_SIZE: usize = <esp_storage::FlashStorage as BlockingNorFlash>::WRITE_SIZE as usize;
    const ERASE_SIZE: usize = <esp_storage::FlashStorage as BlockingNorFlash>::ERASE_SIZE as usize;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.storage.erase(from, to).await
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.storage.write(offset, bytes).await
    }
}

#[cfg(test)]
mod storage_tests;
