pub const CREATE_KEY_VALUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS key_value (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

pub const CREATE_LOCATION_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS location_queue (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    payload     TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);
"#;

pub const CREATE_DEAD_LETTER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS location_dead_letter (
    id        INTEGER PRIMARY KEY NOT NULL,
    payload   TEXT NOT NULL,
    reason    TEXT NOT NULL,
    failed_at TEXT NOT NULL
);
"#;

pub const SELECT_VALUE: &str = r#"
SELECT value FROM key_value WHERE key = ?1;
"#;

pub const UPSERT_VALUE: &str = r#"
INSERT INTO key_value (key, value)
VALUES (?1, ?2)
ON CONFLICT (key) DO UPDATE
SET value = excluded.value;
"#;

pub const DELETE_VALUE: &str = r#"
DELETE FROM key_value WHERE key = ?1;
"#;

pub const INSERT_LOCATION: &str = r#"
INSERT INTO location_queue (payload, enqueued_at)
VALUES (?1, ?2);
"#;

pub const SELECT_PENDING_LOCATIONS: &str = r#"
SELECT id, payload FROM location_queue ORDER BY id ASC;
"#;

pub const DELETE_LOCATION: &str = r#"
DELETE FROM location_queue WHERE id = ?1;
"#;

pub const DELETE_ALL_LOCATIONS: &str = r#"
DELETE FROM location_queue;
"#;

pub const COUNT_LOCATIONS: &str = r#"
SELECT COUNT(*) AS pending FROM location_queue;
"#;

pub const INSERT_DEAD_LETTER: &str = r#"
INSERT OR REPLACE INTO location_dead_letter (id, payload, reason, failed_at)
VALUES (?1, ?2, ?3, ?4);
"#;

pub const COUNT_DEAD_LETTERS: &str = r#"
SELECT COUNT(*) AS dead FROM location_dead_letter;
"#;
