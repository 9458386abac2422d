/// SQL DDL for the tabdeck cache database. The coordinator's memory-resident
/// state is the source of truth; this cache only lets a restarted UI show the
/// last published list before the first browser reconnects.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS display_cache (
    record TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    last_saved INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
