use super::*;
use crate::status;
use crate::test_helpers::{empty_vault, entry, reopen, serial, test_cipher, vault_with};
use futures::executor::block_on;
use sequential_storage::mock_flash::{MockFlashBase, WriteCountCheck};

fn labels(vault: &crate::test_helpers::TestVault) -> Vec<&str> {
    vault
        .records()
        .iter()
        .map(|record| record.label.as_str())
        .collect()
}

#[test]
fn add_appends_until_capacity() {
    let mut vault = empty_vault(2);
    assert_eq!(block_on(vault.add(&entry("a", b"1"))), Ok(0));
    assert_eq!(block_on(vault.add(&entry("b", b"2"))), Ok(1));
    assert_eq!(
        block_on(vault.add(&entry("c", b"3"))),
        Err(VaultError::Capacity { limit: 2 })
    );
    assert_eq!(vault.len(), 2);
}

#[test]
fn oversized_fields_are_rejected() {
    let mut vault = empty_vault(4);
    let long_label = "x".repeat(LABEL_LEN + 1);
    assert_eq!(
        block_on(vault.add(&entry(&long_label, b"pw"))),
        Err(VaultError::InvalidLabel { len: LABEL_LEN + 1 })
    );
    assert_eq!(
        block_on(vault.add(&entry("ok", &[b'p'; PASSWORD_LEN + 1]))),
        Err(VaultError::PasswordTooLong {
            len: PASSWORD_LEN + 1
        })
    );
    assert!(vault.is_empty());
}

#[test]
fn passwords_are_stored_encrypted() {
    let vault = vault_with(&["mail"]);
    let record = vault.get(0).unwrap();
    assert_ne!(record.password.cipher(), b"mail");
    assert_eq!(vault.get_plaintext(0).unwrap().as_slice(), b"mail");
}

#[test]
fn edit_preserves_usage_count() {
    let mut vault = vault_with(&["bank"]);
    block_on(vault.increment_usage(0)).unwrap();
    block_on(vault.increment_usage(0)).unwrap();

    let mut updated = entry("bank-2", b"new-secret");
    updated.requires_os_unlock = true;
    block_on(vault.edit(0, &updated)).unwrap();

    let record = vault.get(0).unwrap();
    assert_eq!(record.label, "bank-2");
    assert_eq!(record.usage_count, 2);
    assert!(record.requires_os_unlock);
    assert_eq!(vault.get_plaintext(0).unwrap().as_slice(), b"new-secret");
}

#[test]
fn edit_and_remove_check_bounds() {
    let mut vault = vault_with(&["only"]);
    assert_eq!(
        block_on(vault.edit(3, &entry("x", b"y"))),
        Err(VaultError::OutOfRange { index: 3, count: 1 })
    );
    assert_eq!(
        block_on(vault.remove(1)),
        Err(VaultError::OutOfRange { index: 1, count: 1 })
    );
    assert_eq!(
        vault.get_plaintext(1),
        Err(VaultError::OutOfRange { index: 1, count: 1 })
    );
}

#[test]
fn remove_compacts_and_persists() {
    let mut vault = vault_with(&["a", "b", "c"]);
    block_on(vault.remove(1)).unwrap();
    assert_eq!(labels(&vault), ["a", "c"]);

    let vault = reopen(vault);
    assert_eq!(labels(&vault), ["a", "c"]);
    assert_eq!(vault.get_plaintext(1).unwrap().as_slice(), b"c");
}

#[test]
fn increment_usage_reranks_and_reports_new_position() {
    let mut vault = vault_with(&["a", "b", "c"]);
    assert_eq!(block_on(vault.increment_usage(2)), Ok(0));
    assert_eq!(labels(&vault), ["c", "a", "b"]);

    assert_eq!(block_on(vault.increment_usage(2)), Ok(1));
    assert_eq!(labels(&vault), ["c", "b", "a"]);
}

#[test]
fn resort_is_stable_for_equal_counts() {
    let mut vault = vault_with(&["a", "b", "c", "d"]);
    block_on(vault.increment_usage(1)).unwrap();
    block_on(vault.increment_usage(3)).unwrap();
    assert_eq!(labels(&vault), ["b", "d", "a", "c"]);

    vault.resort();
    assert_eq!(labels(&vault), ["b", "d", "a", "c"]);
    let counts: Vec<u32> = vault.records().iter().map(|r| r.usage_count).collect();
    assert_eq!(counts, [1, 1, 0, 0]);
}

#[test]
fn usage_count_saturates() {
    let mut vault = vault_with(&["a"]);
    vault.records[0].usage_count = u32::MAX;
    block_on(vault.increment_usage(0)).unwrap();
    assert_eq!(vault.get(0).unwrap().usage_count, u32::MAX);
}

#[test]
fn records_survive_reload() {
    let mut vault = vault_with(&["mail", "bank"]);
    let mut bound = entry("laptop", b"pw{TAB}");
    bound.auto_bind = true;
    bound.fingerprint_id = Some(4);
    block_on(vault.add(&bound)).unwrap();
    block_on(vault.increment_usage(2)).unwrap();

    let before = vault.records().to_vec();
    let vault = reopen(vault);
    assert_eq!(vault.records(), before.as_slice());
    assert_eq!(vault.find_auto_bound(4), Some(0));
}

#[test]
fn clear_all_empties_flash() {
    let mut vault = vault_with(&["a", "b"]);
    block_on(vault.clear_all());
    assert!(vault.is_empty());
    assert!(reopen(vault).is_empty());
}

#[test]
fn find_auto_bound_requires_magic_flag() {
    let mut vault = empty_vault(4);
    let mut plain = entry("plain", b"1");
    plain.fingerprint_id = Some(2);
    let mut magic = entry("magic", b"2");
    magic.fingerprint_id = Some(2);
    magic.auto_bind = true;
    block_on(vault.add(&plain)).unwrap();
    block_on(vault.add(&magic)).unwrap();

    assert_eq!(vault.find_auto_bound(2), Some(1));
    assert_eq!(vault.find_auto_bound(3), None);
}

#[test]
fn entry_round_trips_wire_fields() {
    let mut vault = empty_vault(4);
    let mut original = entry("router", b"admin\x81pw");
    original.transport_scope = TransportScope::UsbOnly;
    original.fingerprint_id = Some(9);
    block_on(vault.add(&original)).unwrap();
    assert_eq!(vault.entry(0).unwrap(), original);
}

#[test]
fn failed_save_keeps_memory_authoritative() {
    // Two 256-byte pages: the record array outgrows a page after a few full-size users.
    type TinyFlash = MockFlashBase<2, 4, 64>;
    let _guard = serial();
    status::clear();
    let storage = VaultStorage::new(
        TinyFlash::new(WriteCountCheck::Twice, None, false),
        TinyFlash::FULL_FLASH_RANGE,
    );
    let mut vault = block_on(CredentialVault::open(test_cipher(), storage, 8));

    for label in ["a", "b", "c", "d"] {
        let label = label.repeat(LABEL_LEN);
        block_on(vault.add(&entry(&label, &[b'p'; PASSWORD_LEN]))).unwrap();
    }

    assert_eq!(vault.len(), 4);
    assert_eq!(vault.entry(3).unwrap().password.as_slice(), &[b'p'; PASSWORD_LEN]);
    assert!(status::drain().contains(&StatusEvent::SaveFailed));
}
