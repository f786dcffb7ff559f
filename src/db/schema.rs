use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS signal_cache (
            token       TEXT NOT NULL,
            chain_id    INTEGER NOT NULL,
            raw_json    TEXT NOT NULL,
            fetched_at  INTEGER NOT NULL, -- unix millis
            PRIMARY KEY (token, chain_id)
        );

        CREATE TABLE IF NOT EXISTS assessments (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            token             TEXT NOT NULL,
            chain_id          INTEGER NOT NULL,
            action            TEXT NOT NULL,
            score             INTEGER NOT NULL,
            level             TEXT NOT NULL,
            max_score         INTEGER NOT NULL,
            critical_override TEXT,
            rules_json        TEXT NOT NULL,
            explanation       TEXT,
            created_at        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_assessments_token ON assessments(token, chain_id);
        CREATE INDEX IF NOT EXISTS idx_assessments_created ON assessments(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_signal_cache_fetched ON signal_cache(fetched_at);
        ",
    )?;
    Ok(())
}
