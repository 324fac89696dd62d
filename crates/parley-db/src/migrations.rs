use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS principals (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            role            TEXT NOT NULL DEFAULT 'user',
            token_version   INTEGER NOT NULL DEFAULT 0,
            last_seen       TEXT,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            sender_id           TEXT NOT NULL REFERENCES principals(id),
            receiver_id         TEXT REFERENCES principals(id),
            content             TEXT NOT NULL,
            attachment_ref      TEXT,
            created_at          TEXT NOT NULL,
            is_read             INTEGER NOT NULL DEFAULT 0,
            read_at             TEXT,
            read_batch          INTEGER REFERENCES read_batches(id),
            deleted_for_sender  INTEGER NOT NULL DEFAULT 0,
            deleted_for_admin   INTEGER NOT NULL DEFAULT 0,
            is_pinned           INTEGER NOT NULL DEFAULT 0,
            pinned_at           TEXT,
            pin_expires_at      TEXT,
            pinned_by           TEXT REFERENCES principals(id),
            CHECK (read_at IS NULL OR is_read = 1),
            CHECK (is_read = 1 OR read_at IS NULL)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_pinned
            ON messages(is_pinned, pinned_at);

        -- Viewer-local delete-for-me
        CREATE TABLE IF NOT EXISTS message_hidden (
            message_id      TEXT NOT NULL REFERENCES messages(id),
            principal_id    TEXT NOT NULL REFERENCES principals(id),
            PRIMARY KEY (message_id, principal_id)
        );

        CREATE TABLE IF NOT EXISTS message_stars (
            message_id      TEXT NOT NULL REFERENCES messages(id),
            principal_id    TEXT NOT NULL REFERENCES principals(id),
            PRIMARY KEY (message_id, principal_id)
        );

        CREATE INDEX IF NOT EXISTS idx_message_stars_principal
            ON message_stars(principal_id);

        -- One row per mark-read call that changed something
        CREATE TABLE IF NOT EXISTS read_batches (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            reader_id   TEXT NOT NULL REFERENCES principals(id),
            sender_id   TEXT NOT NULL REFERENCES principals(id),
            read_at     TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
