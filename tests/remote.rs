use assert_matches::assert_matches;

use softshelf::error::ShelfError;
use softshelf::remote::decode_catalog;

#[test]
fn invalid_entries_do_not_hide_the_rest_of_the_catalog() {
    let body = br#"{
        "message": "ok",
        "object": [
            {"id": "good", "name": "Good", "version": "1.0", "mainFile": "good.exe"},
            {"id": "My App", "name": "Spaced", "version": "2.0"},
            {"id": "../escape", "name": "Escape", "version": "1"},
            {"name": "No id", "version": "1"},
            {"id": "other", "name": "Other", "version": "3"}
        ]
    }"#;

    let entries = decode_catalog(body).unwrap();
    let ids: Vec<_> = entries.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, ["good", "other"]);
    assert_eq!(entries[0].main_file, "good.exe");
}

#[test]
fn broken_envelope_still_fails() {
    assert_matches!(
        decode_catalog(br#"{"message": "ok", "object": {"id": "x"}}"#),
        Err(ShelfError::CatalogDecode(_))
    );
}
