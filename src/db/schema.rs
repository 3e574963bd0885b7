pub const SCHEMA: &str = r#"
-- Accounts
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    company_name TEXT,
    industry TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_verified INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Single-use password reset tokens (stored as SHA-256 digests)
CREATE TABLE IF NOT EXISTS password_resets (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TEXT NOT NULL,
    used INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Camera locations
CREATE TABLE IF NOT EXISTS locations (
    id TEXT PRIMARY KEY,
    address TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    description TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    input_stream_url TEXT,
    output_stream_url TEXT,
    thumbnail TEXT,
    owner_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_locations_owner ON locations(owner_user_id);

-- Detection snapshots written by the ingestion process.
-- source_id is the text form of locations.id, deliberately without a
-- foreign key constraint.
CREATE TABLE IF NOT EXISTS timeseries_analytics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    source_id TEXT NOT NULL,
    output_img_path TEXT,
    people_ct INTEGER,
    vehicle_ct INTEGER,
    detections TEXT
);

CREATE INDEX IF NOT EXISTS idx_timeseries_analytics_source_id ON timeseries_analytics(source_id);
CREATE INDEX IF NOT EXISTS idx_timeseries_analytics_timestamp ON timeseries_analytics(timestamp);

-- Append-only LLM audit ledger
CREATE TABLE IF NOT EXISTS llm_analytics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    prompt TEXT NOT NULL,
    response TEXT NOT NULL,
    execution_time_ms INTEGER,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_llm_analytics_timestamp ON llm_analytics(timestamp);
"#;

/// Additive migrations, applied in order after `SCHEMA`.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE timeseries_analytics ADD COLUMN analysis_result TEXT",
    "ALTER TABLE llm_analytics ADD COLUMN source_id TEXT",
    "CREATE INDEX IF NOT EXISTS idx_llm_analytics_prompt_source ON llm_analytics(prompt, source_id)",
];
