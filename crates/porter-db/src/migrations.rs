use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            enroll      TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            name        TEXT NOT NULL,
            phone       TEXT,
            credits     INTEGER NOT NULL DEFAULT 100,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS parcels (
            id               TEXT PRIMARY KEY,
            title            TEXT NOT NULL DEFAULT 'Delivery Request',
            pickup_location  TEXT NOT NULL,
            dropoff_location TEXT NOT NULL,
            reward           INTEGER NOT NULL,
            requester_id     TEXT NOT NULL REFERENCES users(id),
            acceptor_id      TEXT REFERENCES users(id),
            status           TEXT NOT NULL DEFAULT 'open'
                             CHECK (status IN ('open', 'in-progress', 'completed', 'canceled')),
            chat_room_id     TEXT,
            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            completed_at     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_parcels_status
            ON parcels(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_parcels_requester
            ON parcels(requester_id, status);
        CREATE INDEX IF NOT EXISTS idx_parcels_acceptor
            ON parcels(acceptor_id, status);

        CREATE TABLE IF NOT EXISTS chat_rooms (
            id              TEXT PRIMARY KEY,
            parcel_id       TEXT NOT NULL REFERENCES parcels(id),
            participant_a   TEXT NOT NULL REFERENCES users(id),
            participant_b   TEXT NOT NULL REFERENCES users(id),
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES chat_rooms(id),
            sender_id   TEXT NOT NULL REFERENCES users(id),
            body        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON chat_messages(room_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
