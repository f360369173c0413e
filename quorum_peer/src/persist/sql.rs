pub const SQL_CREATE_STATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS app_state (
    identity TEXT NOT NULL,
    state BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    primary key (identity)
);
"#;

pub const SQL_CREATE_JOURNAL_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS session_journal (
    group_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    identity TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    fruit BLOB DEFAULT NULL,
    exception TEXT DEFAULT NULL,
    primary key (group_id, session_id, identity)
);
"#;

pub const SQL_UPSERT_STATE: &str = r#"
INSERT INTO app_state (identity, state, updated_at)
VALUES (?, ?, ?)
ON CONFLICT (identity) DO UPDATE SET
    state = excluded.state,
    updated_at = excluded.updated_at
"#;

pub const SQL_SELECT_STATE: &str = r#"
SELECT state, updated_at FROM app_state
WHERE identity = ?
"#;

pub const SQL_INSERT_JOURNAL: &str = r#"
INSERT OR REPLACE INTO session_journal
    (group_id, session_id, identity, finished_at, fruit, exception)
VALUES (?, ?, ?, ?, ?, ?)
"#;

pub const SQL_SELECT_JOURNAL_BY_SESSION: &str = r#"
SELECT * FROM session_journal
WHERE group_id = ? AND session_id = ?
ORDER BY identity ASC
"#;

pub const SQL_SELECT_JOURNAL_BY_IDENTITY: &str = r#"
SELECT * FROM session_journal
WHERE identity = ?
ORDER BY finished_at DESC
LIMIT ?
"#;
