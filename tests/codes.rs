use std::path::PathBuf;

use matchform::codes::{CategoryCodes, CodeSpace, load_codes, save_codes};
use matchform::loader::load_raw_rows;
use matchform::records::normalize_rows;

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/matches_small.csv")
}

#[test]
fn saved_dictionary_keeps_codes_when_new_teams_arrive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/codes.json");

    let rows = load_raw_rows(&fixture_path()).unwrap();
    let mut codes = CategoryCodes::default();
    normalize_rows(&rows, &mut codes).unwrap();
    assert_eq!(codes.code(CodeSpace::Venue, "Away"), Some(0));
    assert_eq!(codes.code(CodeSpace::Venue, "Home"), Some(1));
    assert_eq!(codes.code(CodeSpace::Opponent, "Arsenal"), Some(0));
    assert_eq!(codes.code(CodeSpace::Opponent, "Fulham"), Some(4));

    save_codes(&path, &codes).unwrap();
    assert!(!path.with_extension("json.tmp").exists());
    let mut loaded = load_codes(&path).unwrap();
    assert_eq!(loaded, codes);

    // A new opponent that sorts first still goes after the existing codes.
    let mut extra = rows[0].clone();
    extra.opponent = "Aston Villa".to_string();
    extra.date = "2025-02-08".to_string();
    let mut more = rows.clone();
    more.push(extra);
    let records = normalize_rows(&more, &mut loaded).unwrap();

    assert_eq!(loaded.code(CodeSpace::Opponent, "Aston Villa"), Some(5));
    for name in ["Arsenal", "Brighton", "Chelsea", "Everton", "Fulham"] {
        assert_eq!(
            loaded.code(CodeSpace::Opponent, name),
            codes.code(CodeSpace::Opponent, name)
        );
    }
    let villa = records.iter().find(|r| r.opponent == "Aston Villa").unwrap();
    assert_eq!(villa.opponent_code, 5);
}

#[test]
fn missing_dictionary_starts_empty_and_corrupt_one_fails() {
    let dir = tempfile::tempdir().unwrap();
    let absent = dir.path().join("absent.json");
    assert!(load_codes(&absent).unwrap().is_empty());

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "{ not json").unwrap();
    assert!(load_codes(&corrupt).is_err());
}
