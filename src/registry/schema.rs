//! SQLite schema for the identity registry

/// SQL schema for the registry database
pub const SCHEMA_SQL: &str = r#"
-- Identities: the subjects whose archives and personas this system manages
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name TEXT NOT NULL,
    language TEXT NOT NULL,
    short_bio TEXT,
    detailed_profile TEXT,
    speak_pattern TEXT,
    status TEXT NOT NULL,
    status_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Turns: per-identity conversation log, feeds the generation prompt window
CREATE TABLE IF NOT EXISTS turns (
    id TEXT PRIMARY KEY,
    identity_id INTEGER NOT NULL REFERENCES identities(id),
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_turns_identity ON turns(identity_id, created_at);
"#;
