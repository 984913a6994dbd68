//! v001 -- Initial schema creation.
//!
//! Creates the five record collections (`users`, `conversations`,
//! `messages`, `notifications`, `groups`) plus the `group_members`
//! membership table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- stable external-auth id
    display_name TEXT NOT NULL,
    avatar_url   TEXT,
    created_at   TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
-- The primary key is the canonical pair key ("low,high"), so a racing
-- double-create surfaces as a constraint violation rather than a second row.
CREATE TABLE IF NOT EXISTS conversations (
    id               TEXT PRIMARY KEY NOT NULL,
    participant_low  TEXT NOT NULL,           -- FK -> users(id), sorts first
    participant_high TEXT NOT NULL,           -- FK -> users(id), sorts last
    last_timestamp   TEXT,                    -- RFC-3339, NULL until first message

    FOREIGN KEY (participant_low)  REFERENCES users(id),
    FOREIGN KEY (participant_high) REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    conversation_id TEXT NOT NULL,               -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,               -- FK -> users(id)
    contents        TEXT NOT NULL,
    timestamp       TEXT NOT NULL,               -- RFC-3339, server-assigned

    FOREIGN KEY (conversation_id) REFERENCES conversations(id),
    FOREIGN KEY (sender_id)       REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, timestamp);

-- ----------------------------------------------------------------
-- Notifications
-- ----------------------------------------------------------------
-- The unique index enforces the at-most-one-record-per-(user, kind, topic)
-- invariant and is what the atomic ON CONFLICT upsert targets.
CREATE TABLE IF NOT EXISTS notifications (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    user_id       TEXT NOT NULL,              -- FK -> users(id)
    kind          TEXT NOT NULL,              -- 'new_messages' | 'group_changed'
    topic_id      TEXT NOT NULL,              -- conversation id or group id
    since         TEXT NOT NULL,              -- RFC-3339
    other_id      TEXT,                       -- the other participant (messages)
    message_count INTEGER,                    -- unread counter (messages)

    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_key
    ON notifications(user_id, kind, topic_id);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    name        TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,                   -- FK -> groups(id)
    user_id  TEXT NOT NULL,                   -- FK -> users(id)

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)  REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
