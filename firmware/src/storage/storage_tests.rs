use super::*;
use crate::crypto::CredentialCipher;
use crate::test_helpers::{Flash, fresh_flash, test_cipher, test_storage};
use futures::executor::block_on;
use shared::protocol::TransportScope;

fn record(label: &str, usage_count: u32) -> CredentialRecord {
    CredentialRecord {
        label: label.into(),
        password: test_cipher().seal(label.as_bytes()).unwrap(),
        usage_count,
        fingerprint_id: None,
        auto_bind: false,
        requires_os_unlock: false,
        transport_scope: TransportScope::Either,
    }
}

fn store_raw<V>(flash: &mut Flash, key: u8, value: &V)
where
    V: for<'a> sequential_storage::map::Value<'a>,
{
    let mut buffer = vec![0u8; STORAGE_DATA_BUFFER_CAPACITY];
    block_on(map::store_item(
        flash,
        Flash::FULL_FLASH_RANGE,
        &mut NoCache::new(),
        buffer.as_mut_slice(),
        &key,
        value,
    ))
    .unwrap();
}

#[test]
fn blank_flash_loads_empty() {
    let mut storage = test_storage(fresh_flash());
    assert!(block_on(storage.load(10)).unwrap().is_empty());
}

#[test]
fn saved_records_load_in_order() {
    let mut storage = test_storage(fresh_flash());
    let records = vec![record("a", 3), record("b", 1)];
    block_on(storage.save(&records)).unwrap();
    assert_eq!(block_on(storage.load(10)).unwrap(), records);
}

#[test]
fn count_mismatch_is_rejected() {
    let mut storage = test_storage(fresh_flash());
    block_on(storage.save(&[record("a", 0), record("b", 0)])).unwrap();

    let mut flash = storage.into_inner();
    store_raw(&mut flash, STORAGE_KEY_COUNT, &5u32);

    let mut storage = test_storage(flash);
    assert!(matches!(
        block_on(storage.load(10)),
        Err(StorageError::CountMismatch {
            stored: 5,
            decoded: 2
        })
    ));
}

#[test]
fn records_above_capacity_are_rejected() {
    let mut storage = test_storage(fresh_flash());
    block_on(storage.save(&[record("a", 0), record("b", 0), record("c", 0)])).unwrap();
    assert!(matches!(
        block_on(storage.load(2)),
        Err(StorageError::Capacity { count: 3, limit: 2 })
    ));
}

#[test]
fn corrupt_blob_is_a_decode_error() {
    let mut flash = fresh_flash();
    store_raw(&mut flash, STORAGE_KEY_RECORDS, &vec![0xFFu8, 0xFF, 0xFF]);
    store_raw(&mut flash, STORAGE_KEY_COUNT, &1u32);

    let mut storage = test_storage(flash);
    assert!(matches!(
        block_on(storage.load(10)),
        Err(StorageError::Decode(_))
    ));
}

#[test]
fn clear_erases_both_items() {
    let mut storage = test_storage(fresh_flash());
    block_on(storage.save(&[record("a", 0)])).unwrap();
    block_on(storage.clear()).unwrap();
    assert!(block_on(storage.load(10)).unwrap().is_empty());
}

#[test]
fn failed_load_leaves_vault_empty() {
    let mut flash = fresh_flash();
    store_raw(&mut flash, STORAGE_KEY_RECORDS, &vec![0x01u8]);

    let vault = block_on(crate::vault::CredentialVault::open(
        test_cipher(),
        test_storage(flash),
        10,
    ));
    assert!(vault.is_empty());
}
