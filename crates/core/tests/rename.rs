mod common;

use common::linear_view;
use sigprop_core::model::CodeRange;
use sigprop_core::rename::{
    apply, apply_with, find_prefix_collisions, load_signature_list, parse_signature_list,
    KnownSignature, RenameOptions,
};
use sigprop_core::services::analysis::{BinaryView, LoadedBinary};

fn image() -> Vec<u8> {
    (0..=255u8).collect()
}

/// Functions at 0x1000 (bytes 00..), 0x1010 (bytes 10..) and 0x1080 (bytes 80..).
fn view() -> LoadedBinary {
    linear_view(
        0x1000,
        image(),
        &[(0x1000, "sub_1000", vec![4; 4]), (0x1010, "sub_1010", vec![4; 4]), (0x1080, "sub_1080", vec![4; 4])],
    )
}

fn range() -> CodeRange {
    CodeRange::new(0x1000, 0x2000)
}

fn known(name: &str, hex: &str) -> KnownSignature {
    KnownSignature::new(name, hex::decode(hex).expect("hex"))
}

#[test]
fn matching_prefix_renames_and_differing_byte_does_not() {
    let mut view = view();
    let sigs = vec![known("foo", "000102030405"), known("bar", "1011121314ff")];

    let renamed = apply(&mut view, &sigs, range(), 48);
    assert_eq!(renamed, 1);
    assert_eq!(view.function_name(0x1000), Some("foo"));
    assert_eq!(view.function_name(0x1010), Some("sub_1010"));
    assert_eq!(view.renames().len(), 1);
    assert_eq!(view.renames()[0].old_name, "sub_1000");
}

#[test]
fn first_matching_signature_wins() {
    let mut view = view();
    let sigs = vec![known("short", "1011"), known("long", "10111213")];
    assert_eq!(apply(&mut view, &sigs, range(), 48), 1);
    assert_eq!(view.function_name(0x1010), Some("short"));

    let mut view = self::view();
    let reversed = vec![known("long", "10111213"), known("short", "1011")];
    assert_eq!(apply(&mut view, &reversed, range(), 48), 1);
    assert_eq!(view.function_name(0x1010), Some("long"));
}

#[test]
fn already_named_functions_are_not_counted() {
    let mut view = view();
    let sigs = vec![known("sub_1000", "00010203")];
    assert_eq!(apply(&mut view, &sigs, range(), 48), 0);
    assert!(view.renames().is_empty());
}

#[test]
fn functions_outside_the_range_are_left_alone() {
    let mut view = view();
    let sigs = vec![known("hot", "80818283")];
    assert_eq!(apply(&mut view, &sigs, CodeRange::new(0x1000, 0x1080), 48), 0);
    assert_eq!(view.function_name(0x1080), Some("sub_1080"));
}

#[test]
fn signature_longer_than_the_window_never_matches() {
    let mut view = view();
    let sigs = vec![known("foo", "0001020304")];
    assert_eq!(apply(&mut view, &sigs, range(), 4), 0);
}

#[test]
fn strict_mode_reports_ambiguous_matches() {
    let mut view = view();
    let sigs = vec![known("short", "1011"), known("long", "10111213"), known("foo", "0001")];

    let report = apply_with(&mut view, &sigs, range(), 48, RenameOptions { strict: true });
    assert_eq!(report.renamed, 1);
    assert_eq!(report.ambiguous.len(), 1);
    assert_eq!(report.ambiguous[0].address, "0x1010");
    assert_eq!(report.ambiguous[0].candidates, vec!["long".to_string(), "short".to_string()]);
    assert_eq!(view.function_name(0x1010), Some("sub_1010"));
    assert_eq!(view.function_name(0x1000), Some("foo"));
}

#[test]
fn prefix_collisions_are_detected() {
    let sigs = vec![
        known("a", "aabbcc"),
        known("b", "aabb"),
        known("c", "ddee"),
        known("a", "aabbccdd"),
    ];
    let collisions = find_prefix_collisions(&sigs);
    let pairs: Vec<(usize, usize)> =
        collisions.iter().map(|c| (c.first_index, c.second_index)).collect();
    assert_eq!(pairs, vec![(0, 1), (1, 3)]);
}

#[test]
fn signature_lists_ignore_extra_fields_and_skip_bad_hex() {
    let text = r#"[
        {"name": "foo", "hex": "0001", "hash": "abc", "start_addr": 4096},
        {"name": "empty", "hex": ""},
        {"name": "bad", "hex": "xyz"},
        {"name": "db_record", "found_in": ["Native"], "hex": "1011", "hash": "", "address": "0x1"}
    ]"#;
    let sigs = parse_signature_list(text).expect("parse");
    let names: Vec<&str> = sigs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["foo", "db_record"]);
    assert_eq!(sigs[0].bytes, vec![0x00, 0x01]);
}

#[test]
fn load_signature_list_reports_io_and_parse_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(load_signature_list(&dir.path().join("missing.json")).is_err());

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{").expect("write");
    let err = load_signature_list(&broken).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));

    let good = dir.path().join("sigs.json");
    std::fs::write(&good, r#"[{"name": "foo", "hex": "00010203"}]"#).expect("write");
    assert_eq!(load_signature_list(&good).expect("load").len(), 1);
}
