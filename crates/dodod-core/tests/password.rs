mod common;

use std::fs;

use common::{open_db, options, register_all, Note};
use dodod_core::credentials::{CONFIG_FILE, DATABASE_BACKUP_FILE, ROTATION_JOURNAL_FILE};
use dodod_core::{Database, DododError};
use tempfile::TempDir;

fn open_with(dir: &TempDir, password: &str) -> dodod_core::Result<Database> {
    let mut db = Database::new(options(dir.path()).with_password(password));
    register_all(&mut db);
    db.open()?;
    Ok(db)
}

#[test]
fn test_password_lifecycle() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_with(&dir, "first-password").unwrap();
        db.create(&[&Note::new("1", "secret", "PLAINTEXT_MARKER_123")])
            .unwrap();
    }

    let db = open_with(&dir, "first-password").unwrap();
    assert_eq!(db.read(&["1"]).unwrap().0, 1);
    drop(db);

    let err = open_with(&dir, "other-password").unwrap_err();
    assert!(matches!(err, DododError::WrongPassword));

    let err = open_with(&dir, "").unwrap_err();
    assert!(matches!(err, DododError::EmptyPassword));
}

#[test]
fn test_config_never_holds_the_password() {
    let dir = TempDir::new().unwrap();
    let db = open_with(&dir, "hunter2-hunter2").unwrap();
    drop(db);

    let config: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join(CONFIG_FILE)).unwrap()).unwrap();
    assert_eq!(config["isPasswordProtected"], true);
    assert_eq!(config["indexStoreName"], "snapshot");
    let encoded = config["encodedKey"].as_str().unwrap();
    assert!(encoded.starts_with("$argon2id$"));
    assert!(!encoded.contains("hunter2"));
}

#[test]
fn test_records_are_not_stored_in_plaintext() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_with(&dir, "first-password").unwrap();
        db.create(&[&Note::new("1", "secret", "PLAINTEXT_MARKER_123")])
            .unwrap();
    }

    for path in [
        dir.path().join("database").join("records.sqlite"),
        dir.path().join("store").join("index.snapshot"),
    ] {
        let on_disk = fs::read(&path).unwrap();
        let haystack = String::from_utf8_lossy(&on_disk);
        assert!(!haystack.contains("PLAINTEXT_MARKER_123"), "{}", path.display());
    }
}

#[test]
fn test_change_password() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_with(&dir, "old-password").unwrap();
        db.create(&[&Note::new("1", "rotated", "body")]).unwrap();
    }

    let mut db = Database::new(options(dir.path()).with_password("old-password"));
    db.change_password("new-password").unwrap();
    assert!(dir.path().join(DATABASE_BACKUP_FILE).exists());
    assert!(!dir.path().join(ROTATION_JOURNAL_FILE).exists());

    // The handle now carries the new password.
    register_all(&mut db);
    db.open().unwrap();
    assert_eq!(db.simple_search("rotated", 0).unwrap().total, 1);
    drop(db);

    let db = open_with(&dir, "new-password").unwrap();
    assert_eq!(db.read(&["1"]).unwrap().0, 1);
    drop(db);

    let err = open_with(&dir, "old-password").unwrap_err();
    assert!(matches!(err, DododError::WrongPassword));
}

#[test]
fn test_change_password_with_wrong_current_password() {
    let dir = TempDir::new().unwrap();
    drop(open_with(&dir, "old-password").unwrap());

    let mut db = Database::new(options(dir.path()).with_password("not-the-password"));
    let err = db.change_password("new-password").unwrap_err();
    assert!(matches!(err, DododError::WrongPassword));
    assert!(!dir.path().join(ROTATION_JOURNAL_FILE).exists());

    drop(open_with(&dir, "old-password").unwrap());
}

#[test]
fn test_interrupted_rotation_blocks_open_until_resumed() {
    let dir = TempDir::new().unwrap();
    drop(open_with(&dir, "old-password").unwrap());

    fs::write(
        dir.path().join(ROTATION_JOURNAL_FILE),
        r#"{
            "id": "01890a5d-ac96-774b-bcce-b302099a8057",
            "startedAt": "2024-01-01T00:00:00Z",
            "indexStoreName": "snapshot",
            "completed": []
        }"#,
    )
    .unwrap();

    let err = open_with(&dir, "old-password").unwrap_err();
    assert!(matches!(err, DododError::PasswordChangeIncomplete { .. }));

    let mut db = Database::new(options(dir.path()).with_password("old-password"));
    db.change_password("new-password").unwrap();
    drop(db);

    drop(open_with(&dir, "new-password").unwrap());
}

#[test]
fn test_unprotected_store_opens_without_password() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(options(dir.path()));
        db.create(&[&Note::new("1", "open", "book")]).unwrap();
    }

    let db = open_db(options(dir.path()));
    assert_eq!(db.read(&["1"]).unwrap().0, 1);
}
