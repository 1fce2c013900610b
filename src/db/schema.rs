pub const SCHEMA: &str = r#"
-- Photo analysis records: one row per photo, mutated only by the worker
-- currently holding that photo's job (and by enqueue state transitions)
CREATE TABLE IF NOT EXISTS photos (
    photo_id TEXT PRIMARY KEY,
    content_ref TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'unanalyzed',

    -- Canonical fields, committed atomically in a single UPDATE
    caption TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    keywords TEXT NOT NULL DEFAULT '[]',  -- JSON array, provider order
    classification TEXT,                  -- JSON: label string or object
    poi_analysis TEXT,                    -- JSON passthrough
    collectible_insights TEXT,            -- JSON passthrough

    model_used TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_photos_state ON photos(state);

-- Pending analysis jobs: at most one row per photo (dedup invariant)
CREATE TABLE IF NOT EXISTS analysis_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id TEXT NOT NULL UNIQUE,
    priority INTEGER NOT NULL DEFAULT 0,  -- 1 = high, strict over FIFO
    run_type TEXT NOT NULL,
    candidate_models TEXT NOT NULL,       -- JSON array, dispatch order
    enqueued_at TEXT NOT NULL,
    not_before TEXT,                      -- backoff eligibility gate
    lease_expires_at TEXT,                -- set while in_progress
    claim_generation INTEGER NOT NULL DEFAULT 0,  -- bumped on every claim
    FOREIGN KEY (photo_id) REFERENCES photos(photo_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_jobs_priority ON analysis_jobs(priority, id);

-- Append-only run ledger; no UPDATE or DELETE path exists in this core
CREATE TABLE IF NOT EXISTS model_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    run_type TEXT NOT NULL,
    models_used TEXT NOT NULL,            -- JSON array, attempt order
    caption TEXT NOT NULL DEFAULT '',
    keywords TEXT NOT NULL DEFAULT '[]',
    classification TEXT,
    succeeded INTEGER NOT NULL DEFAULT 0,
    failure_note TEXT,
    FOREIGN KEY (photo_id) REFERENCES photos(photo_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_history_photo ON model_history(photo_id, id);
"#;
