use less_pii::{PiiError, RecordStore, SearchCapability};

use crate::{key_manager, name_column, phone_column};

// ============================================================================
// Phone number, end to end
// ============================================================================

#[test]
fn substring_query_finds_record() {
    let col = phone_column(key_manager());
    col.write("alice", "+33612345678").expect("write");

    let found = col.find_partial("612345").expect("search");
    assert_eq!(found.record_ids(), ["alice"]);
    assert_eq!(found.matches[0].plaintext, "+33612345678");
}

#[test]
fn absent_substring_finds_nothing() {
    let col = phone_column(key_manager());
    col.write("alice", "+33612345678").expect("write");

    let found = col.find_partial("999999").expect("search");
    assert!(found.is_empty());
    assert!(found.unavailable.is_empty());
}

#[test]
fn corrupted_ciphertext_is_still_a_candidate_but_never_a_match() {
    let col = phone_column(key_manager());
    col.write("alice", "+33612345678").expect("write");

    let mut stored = col
        .store()
        .get("alice", "phone")
        .expect("get")
        .expect("present");
    stored.envelope.ciphertext[0] ^= 0x01;
    col.store().put("alice", "phone", &stored).expect("put");

    assert_eq!(
        col.read("alice").expect_err("tampered value must not decrypt"),
        PiiError::Authentication
    );

    // phase 1 is independent of decryption
    assert_eq!(col.partial_candidates("612345").expect("candidates"), ["alice"]);

    // phase 2 refuses it
    let found = col.find_partial("612345").expect("search");
    assert!(found.matches.is_empty());
    assert_eq!(found.unavailable, ["alice"]);
}

#[test]
fn one_bad_record_does_not_hide_good_ones() {
    let col = phone_column(key_manager());
    col.write("alice", "+33612345678").expect("write");
    col.write("bob", "+33712345678").expect("write");

    let mut stored = col.store().get("bob", "phone").unwrap().unwrap();
    stored.envelope.tag[15] ^= 0x80;
    col.store().put("bob", "phone", &stored).unwrap();

    let found = col.find_partial("12345678").expect("search");
    assert_eq!(found.record_ids(), ["alice"]);
    assert_eq!(found.unavailable, ["bob"]);
}

#[test]
fn query_too_short_after_normalization_is_rejected() {
    let col = phone_column(key_manager());
    col.write("alice", "+33612345678").unwrap();

    assert!(matches!(col.find_partial("+33"), Err(PiiError::InvalidQuery(_))));
    assert!(matches!(
        col.partial_candidates("(6)"),
        Err(PiiError::InvalidQuery(_))
    ));
    assert_eq!(col.find_partial("+336").unwrap().record_ids(), ["alice"]);
}

#[test]
fn spaces_around_a_name_fragment() {
    let col = name_column(key_manager());
    col.write("r1", "ab cd").unwrap();
    col.write("r2", "Jean Dupont").unwrap();

    assert!(matches!(col.find_partial("ab "), Err(PiiError::InvalidQuery(_))));
    assert!(matches!(col.find_partial(" du"), Err(PiiError::InvalidQuery(_))));
    assert_eq!(col.find_partial("ab c").unwrap().record_ids(), ["r1"]);
    assert_eq!(col.find_partial(" dup").unwrap().record_ids(), ["r2"]);
}

#[test]
fn formatting_is_ignored_on_both_sides() {
    let col = phone_column(key_manager());
    col.write("alice", "+33 6 12 34 56 78").expect("write");

    assert_eq!(col.find_partial("12-34-56").unwrap().record_ids(), ["alice"]);
    assert_eq!(col.find_exact("0033612345678").unwrap().record_ids(), Vec::<&str>::new());
    assert_eq!(col.find_exact("33.6.12.34.56.78").unwrap().record_ids(), ["alice"]);
    // stored as given
    assert_eq!(col.read("alice").unwrap().as_deref(), Some("+33 6 12 34 56 78"));
}

#[test]
fn update_replaces_all_tokens() {
    let col = phone_column(key_manager());
    col.write("alice", "+33612345678").unwrap();
    col.write("alice", "+44201234567").unwrap();

    assert!(col.find_partial("612345").unwrap().is_empty());
    assert!(col.partial_candidates("612345").unwrap().is_empty());
    assert_eq!(col.find_partial("2012345").unwrap().record_ids(), ["alice"]);
}

#[test]
fn delete_removes_from_search() {
    let col = phone_column(key_manager());
    col.write("alice", "+33612345678").unwrap();
    assert!(col.delete("alice").unwrap());
    assert!(col.partial_candidates("612345").unwrap().is_empty());
    assert_eq!(col.read("alice").unwrap(), None);
}

#[test]
fn store_never_holds_plaintext() {
    let col = phone_column(key_manager());
    col.write("alice", "+33612345678").unwrap();
    let stored = col.store().get("alice", "phone").unwrap().unwrap();
    let bytes = stored.envelope.to_bytes();
    assert!(!bytes.windows(6).any(|w| w == b"612345"));
    assert_eq!(stored.capability, SearchCapability::Partial);
}

#[cfg(feature = "sqlite")]
#[test]
fn same_scenario_on_sqlite() {
    use less_pii::{
        AttributeOptions, EncryptedAttribute, NormalizationPolicy, SearchableColumn, SqliteStore,
    };

    let attr = EncryptedAttribute::new(
        key_manager(),
        "phone",
        AttributeOptions::default().with_policy(NormalizationPolicy::Digits),
    );
    let store = SqliteStore::open_in_memory().expect("open in-memory SQLite");
    let col = SearchableColumn::new(attr, SearchCapability::Partial, store);

    col.write("alice", "+33612345678").unwrap();
    assert_eq!(col.find_partial("612345").unwrap().record_ids(), ["alice"]);
    assert!(col.find_partial("999999").unwrap().is_empty());

    let mut stored = col.store().get("alice", "phone").unwrap().unwrap();
    stored.envelope.ciphertext[3] ^= 0x10;
    col.store().put("alice", "phone", &stored).unwrap();

    assert_eq!(col.partial_candidates("612345").unwrap(), ["alice"]);
    let found = col.find_partial("612345").unwrap();
    assert!(found.matches.is_empty());
    assert_eq!(found.unavailable, ["alice"]);
}
