use proptest::prelude::*;

use less_pii::{
    BlindIndexService, EncryptionService, NormalizationPolicy, PiiError, TrigramIndexService,
};

use crate::{key_manager, name_column};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: decrypt(encrypt(p)) == p for arbitrary bytes
    #[test]
    fn prop_encrypt_decrypt_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
        let svc = EncryptionService::new(key_manager());
        let envelope = svc.encrypt(&plaintext, None).unwrap();
        prop_assert_eq!(svc.decrypt(&envelope, None).unwrap(), plaintext);
    }

    /// Property: a column returns exactly what was written
    #[test]
    fn prop_column_roundtrip(value in "[a-zA-Z0-9 éèàçÉ@.+-]{0,64}") {
        let col = name_column(key_manager());
        col.write("r", &value).unwrap();
        prop_assert_eq!(col.read("r").unwrap(), Some(value));
    }

    /// Property: blind index is deterministic and normalization-invariant
    #[test]
    fn prop_blind_index_deterministic(value in "[A-Za-z0-9 ]{1,40}") {
        let svc = BlindIndexService::new(key_manager(), NormalizationPolicy::Standard);
        let a = svc.index(&value).unwrap();
        let b = svc.index(&value.to_uppercase()).unwrap();
        prop_assert!(BlindIndexService::matches(&a, &b));
    }

    /// Property: any substring of length >= 3 is a trigram candidate
    #[test]
    fn prop_trigram_no_false_negatives(
        value in "[a-z0-9@.+-]{3,64}",
        start in 0usize..64,
        len in 3usize..16,
    ) {
        let svc = TrigramIndexService::with_defaults(key_manager());
        let chars: Vec<char> = value.chars().collect();
        let start = start % (chars.len() - 2);
        let end = (start + len).min(chars.len());
        prop_assume!(end - start >= 3);
        let query: String = chars[start..end].iter().collect();

        let stored = svc.tokens_for_storage(&value).unwrap();
        let tokens = svc.tokens_for_query(&query).unwrap();
        prop_assert!(TrigramIndexService::candidate_match(&tokens, &stored));
    }

    /// Property: a substring typed with surrounding spaces or punctuation is
    /// either a candidate or rejected for normalizing below one shingle
    #[test]
    fn prop_trigram_no_false_negatives_under_every_policy(
        value in "[a-z0-9 +.()-]{3,64}",
        start in 0usize..64,
        len in 3usize..16,
        policy in prop_oneof![
            Just(NormalizationPolicy::Standard),
            Just(NormalizationPolicy::Compact),
            Just(NormalizationPolicy::Digits),
        ],
    ) {
        let svc = TrigramIndexService::new(key_manager(), policy, 256);
        let chars: Vec<char> = value.chars().collect();
        let start = start % (chars.len() - 2);
        let end = (start + len).min(chars.len());
        prop_assume!(end - start >= 3);
        let query: String = chars[start..end].iter().collect();

        let stored = svc.tokens_for_storage(&value).unwrap();
        match svc.tokens_for_query(&query) {
            Ok(tokens) => {
                prop_assert!(TrigramIndexService::candidate_match(&tokens, &stored));
                prop_assert!(svc.verify(&value, &query));
            }
            Err(PiiError::InvalidQuery(_)) => {
                prop_assert!(policy.normalize(&query).chars().count() < 3);
            }
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }

    /// Property: two-phase search returns every true match and nothing else
    #[test]
    fn prop_partial_search_is_exact(
        values in proptest::collection::vec("[ab]{1,12}", 1..24),
        query in "[ab]{3,5}",
    ) {
        let col = name_column(key_manager());
        for (i, value) in values.iter().enumerate() {
            col.write(&format!("r{:02}", i), value).unwrap();
        }

        let found = col.find_partial(&query).unwrap();
        prop_assert!(found.unavailable.is_empty());
        for m in &found.matches {
            prop_assert!(m.plaintext.contains(&query));
        }

        let expected: Vec<String> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.contains(&query))
            .map(|(i, _)| format!("r{:02}", i))
            .collect();
        let returned: Vec<String> = found.matches.iter().map(|m| m.record_id.clone()).collect();
        prop_assert_eq!(returned, expected);
    }
}
