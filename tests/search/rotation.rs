use less_pii::{KeyLabel, PiiError, RecordStore};

use crate::{key_manager, name_column};

// ============================================================================
// Encryption key rotation
// ============================================================================

#[test]
fn values_stay_readable_after_rotation_without_reencryption() {
    let keys = key_manager();
    let col = name_column(keys.clone());
    col.write("r1", "Jean Dupont").unwrap();

    assert_eq!(keys.rotate(KeyLabel::Encryption).unwrap(), 1);
    assert_eq!(col.read("r1").unwrap().as_deref(), Some("Jean Dupont"));

    col.write("r2", "Marie Curie").unwrap();
    let stored = col.store().get("r2", "name").unwrap().unwrap();
    assert_eq!(stored.key_version(), 1);
}

#[test]
fn reencrypt_then_retire_old_version() {
    let keys = key_manager();
    let col = name_column(keys.clone());
    col.write("r1", "Jean Dupont").unwrap();
    col.write("r2", "Marie Curie").unwrap();
    keys.rotate(KeyLabel::Encryption).unwrap();

    let report = col.reencrypt().unwrap();
    assert_eq!(report.updated, 2);
    assert!(report.is_complete());

    // second run has nothing to do
    let again = col.reencrypt().unwrap();
    assert_eq!(again.updated, 0);
    assert_eq!(again.skipped, 2);

    keys.retire_versions_below(KeyLabel::Encryption, 1).unwrap();
    assert_eq!(col.read("r1").unwrap().as_deref(), Some("Jean Dupont"));
    assert_eq!(col.read("r2").unwrap().as_deref(), Some("Marie Curie"));
}

#[test]
fn retiring_too_early_makes_values_unavailable() {
    let keys = key_manager();
    let col = name_column(keys.clone());
    col.write("r1", "Jean Dupont").unwrap();
    keys.rotate(KeyLabel::Encryption).unwrap();
    keys.retire_versions_below(KeyLabel::Encryption, 1).unwrap();

    assert_eq!(
        col.read("r1").unwrap_err(),
        PiiError::KeyUnavailable {
            label: KeyLabel::Encryption,
            version: 0
        }
    );
    // search reports it rather than failing
    let found = col.find_partial("dupont").unwrap();
    assert!(found.matches.is_empty());
    assert_eq!(found.unavailable, ["r1"]);
}

// ============================================================================
// Index key rotation
// ============================================================================

#[test]
fn index_rotation_keeps_search_working_through_rebuild() {
    let keys = key_manager();
    let col = name_column(keys.clone());
    col.write("r1", "Jean Dupont").unwrap();
    col.write("r2", "Jeanne Martin").unwrap();

    keys.rotate(KeyLabel::Index).unwrap();
    col.write("r3", "Jean-Paul Sartre").unwrap();

    // mixed versions in the store
    assert_eq!(col.store().index_versions("name").unwrap(), [0, 1]);
    assert_eq!(
        col.find_partial("jean").unwrap().record_ids(),
        ["r1", "r2", "r3"]
    );
    assert_eq!(col.find_exact("JEAN DUPONT").unwrap().record_ids(), ["r1"]);

    let report = col.rebuild_indexes().unwrap();
    assert_eq!(report.updated, 2);
    assert_eq!(report.skipped, 1);

    assert_eq!(col.store().index_versions("name").unwrap(), [1]);
    keys.retire_versions_below(KeyLabel::Index, 1).unwrap();
    assert_eq!(
        col.find_partial("jean").unwrap().record_ids(),
        ["r1", "r2", "r3"]
    );
    assert_eq!(col.find_exact("jean dupont").unwrap().record_ids(), ["r1"]);
}

#[test]
fn rebuild_does_not_touch_ciphertext() {
    let keys = key_manager();
    let col = name_column(keys.clone());
    col.write("r1", "Jean Dupont").unwrap();
    let before = col.store().get("r1", "name").unwrap().unwrap();

    keys.rotate(KeyLabel::Index).unwrap();
    col.rebuild_indexes().unwrap();

    let after = col.store().get("r1", "name").unwrap().unwrap();
    assert_eq!(after.envelope, before.envelope);
    assert_eq!(after.index_version(), Some(1));
}

#[test]
fn rebuild_reports_failures_for_retry() {
    let keys = key_manager();
    let col = name_column(keys.clone());
    col.write("good", "Jean Dupont").unwrap();
    col.write("bad", "Marie Curie").unwrap();

    let mut stored = col.store().get("bad", "name").unwrap().unwrap();
    stored.envelope.nonce[0] ^= 1;
    col.store().put("bad", "name", &stored).unwrap();

    keys.rotate(KeyLabel::Index).unwrap();
    let report = col.rebuild_indexes().unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed_ids(), ["bad"]);
    assert_eq!(report.failed[0].error, PiiError::Authentication);

    // repair, then retry only what failed
    col.write("bad", "Marie Curie").unwrap();
    let retry = col.rebuild_indexes_for(&report.failed_ids());
    assert!(retry.is_complete());
    assert_eq!(retry.skipped, 1); // fresh write is already current
}
