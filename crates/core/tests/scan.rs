use std::collections::HashSet;

use sigprop_core::model::FunctionSignature;
use sigprop_core::signature::{scan, scan_file, Exclusions};

fn sig(name: &str, bytes: &[u8]) -> FunctionSignature {
    FunctionSignature::new(0x1000, name, bytes.to_vec())
}

fn image_with(parts: &[&[u8]]) -> Vec<u8> {
    let mut image = vec![0xEEu8; 37];
    for part in parts {
        image.extend_from_slice(part);
        image.extend_from_slice(&[0xEE; 11]);
    }
    image
}

#[test]
fn finds_exact_substrings_at_any_offset() {
    let present = sig("present", &[1, 2, 3, 4, 5, 6]);
    let absent = sig("absent", &[1, 2, 3, 4, 5, 7]);
    let image = image_with(&[&present.raw_bytes]);

    let hits = scan(&image, &[present.clone(), absent], "Anchor", &Exclusions::new());
    assert_eq!(hits, HashSet::from([present.hash]));
}

#[test]
fn overlapping_signatures_are_all_reported() {
    let long = sig("long", &[9, 8, 7, 6, 5, 4, 3]);
    let prefix = sig("prefix", &[9, 8, 7]);
    let inner = sig("inner", &[7, 6, 5]);
    let image = image_with(&[&long.raw_bytes]);

    let hits = scan(&image, &[long.clone(), prefix.clone(), inner.clone()], "Anchor", &Exclusions::new());
    assert_eq!(hits, HashSet::from([long.hash, prefix.hash, inner.hash]));
}

#[test]
fn excluded_pairs_are_not_rescanned_for_the_same_variant() {
    let a = sig("a", &[1, 1, 2, 3, 5, 8]);
    let image = image_with(&[&a.raw_bytes]);
    let mut seen = Exclusions::new();
    seen.insert((a.hash.clone(), "Anchor".to_string()));

    assert!(scan(&image, &[a.clone()], "Anchor", &seen).is_empty());
    assert_eq!(scan(&image, &[a.clone()], "Pinocchio", &seen), HashSet::from([a.hash]));
}

#[test]
fn empty_inputs_find_nothing() {
    let a = sig("a", &[1, 2, 3]);
    assert!(scan(&[], &[a], "Anchor", &Exclusions::new()).is_empty());
    assert!(scan(&[1, 2, 3], &[], "Anchor", &Exclusions::new()).is_empty());
}

#[test]
fn scan_file_tests_each_hash_once_and_hashes_the_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = sig("a", &[4, 4, 4, 4]);
    let dup = sig("a_again", &[4, 4, 4, 4]);
    let b = sig("b", &[5, 5, 5, 5]);
    let path = dir.path().join("target.so");
    let image = image_with(&[&a.raw_bytes]);
    std::fs::write(&path, &image).expect("write image");

    let outcome = scan_file(&path, &[a.clone(), dup, b], "Anchor", &Exclusions::new());
    assert!(outcome.is_ok());
    assert_eq!(outcome.tested, 2);
    assert_eq!(outcome.hits, HashSet::from([a.hash]));
    assert_eq!(outcome.variant, "Anchor");
    assert_eq!(
        outcome.image_sha256.as_deref(),
        Some(sigprop_core::model::signature_digest(&image).as_str())
    );
}

#[test]
fn unreadable_target_reports_error_with_no_hits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.so");
    let a = sig("a", &[1, 2, 3]);

    let outcome = scan_file(&missing, &[a], "Native", &Exclusions::new());
    assert!(!outcome.is_ok());
    assert!(outcome.hits.is_empty());
    assert!(outcome.image_sha256.is_none());
    let err = outcome.error.expect("error text");
    assert!(err.contains("Native"), "unexpected error: {err}");
}
