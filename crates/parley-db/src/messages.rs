use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parley_types::models::Message;
use rusqlite::types::{ToSql, Type};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::models::{MessagePatch, NewMessage};
use crate::{Database, ts};

pub(crate) const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, attachment_ref, created_at, \
     is_read, read_at, read_batch, deleted_for_sender, deleted_for_admin, \
     is_pinned, pinned_at, pin_expires_at, pinned_by";

/// Matches both directions of a peer conversation; binds `?1` and `?2`.
pub(crate) const PAIR_CLAUSE: &str =
    "((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))";

impl Database {
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, attachment_ref, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.id.to_string(),
                    new.sender_id.to_string(),
                    new.receiver_id.map(|id| id.to_string()),
                    new.content,
                    new.attachment_ref,
                    ts(new.created_at),
                ],
            )?;
            fetch_message(tx, new.id)?
                .ok_or_else(|| anyhow::anyhow!("message {} vanished after insert", new.id))
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| fetch_message(conn, id))
    }

    /// Both directions between `a` and `b`, oldest first. When `viewer` is
    /// given, messages that viewer deleted for themselves are left out.
    pub fn get_conversation(&self, a: Uuid, b: Uuid, viewer: Option<Uuid>) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE {}
                   AND (?3 IS NULL OR NOT EXISTS (
                        SELECT 1 FROM message_hidden h
                        WHERE h.message_id = messages.id AND h.principal_id = ?3))
                 ORDER BY created_at ASC",
                MESSAGE_COLUMNS, PAIR_CLAUSE
            );
            load_messages(
                conn,
                &sql,
                params![a.to_string(), b.to_string(), viewer.map(|v| v.to_string())],
            )
        })
    }

    /// The principal's messages addressed to the assistant, oldest first.
    pub fn get_assistant_thread(&self, user_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE sender_id = ?1 AND receiver_id IS NULL
                   AND NOT EXISTS (
                        SELECT 1 FROM message_hidden h
                        WHERE h.message_id = messages.id AND h.principal_id = ?1)
                 ORDER BY created_at ASC",
                MESSAGE_COLUMNS
            );
            load_messages(conn, &sql, params![user_id.to_string()])
        })
    }

    pub fn get_starred(&self, principal_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE id IN (SELECT message_id FROM message_stars WHERE principal_id = ?1)
                 ORDER BY created_at ASC",
                MESSAGE_COLUMNS
            );
            load_messages(conn, &sql, params![principal_id.to_string()])
        })
    }

    /// Apply a field patch atomically. Returns the updated message, or `None`
    /// if no such message exists.
    pub fn apply_patch(&self, id: Uuid, patch: &MessagePatch) -> Result<Option<Message>> {
        self.with_tx(|tx| {
            let mid = id.to_string();
            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM messages WHERE id = ?1", [&mid], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            if let Some(flag) = patch.deleted_for_sender {
                tx.execute(
                    "UPDATE messages SET deleted_for_sender = ?2 WHERE id = ?1",
                    params![mid, flag],
                )?;
            }
            if let Some(flag) = patch.deleted_for_admin {
                tx.execute(
                    "UPDATE messages SET deleted_for_admin = ?2 WHERE id = ?1",
                    params![mid, flag],
                )?;
            }
            if let Some(viewer) = patch.hide_for {
                tx.execute(
                    "INSERT OR IGNORE INTO message_hidden (message_id, principal_id) VALUES (?1, ?2)",
                    params![mid, viewer.to_string()],
                )?;
            }
            if let Some((principal, starred)) = patch.star {
                if starred {
                    tx.execute(
                        "INSERT OR IGNORE INTO message_stars (message_id, principal_id) VALUES (?1, ?2)",
                        params![mid, principal.to_string()],
                    )?;
                } else {
                    tx.execute(
                        "DELETE FROM message_stars WHERE message_id = ?1 AND principal_id = ?2",
                        params![mid, principal.to_string()],
                    )?;
                }
            }
            if patch.clear_pin {
                tx.execute(
                    "UPDATE messages
                     SET is_pinned = 0, pinned_at = NULL, pin_expires_at = NULL, pinned_by = NULL
                     WHERE id = ?1",
                    [&mid],
                )?;
            }

            fetch_message(tx, id)
        })
    }
}

pub(crate) fn fetch_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    let message = conn
        .query_row(&sql, [id.to_string()], row_to_message)
        .optional()?;

    match message {
        Some(message) => {
            let mut batch = vec![message];
            attach_sets(conn, &mut batch)?;
            Ok(batch.pop())
        }
        None => Ok(None),
    }
}

pub(crate) fn load_messages(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let mut messages = stmt
        .query_map(params, row_to_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    attach_sets(conn, &mut messages)?;
    Ok(messages)
}

/// Batch-fetch the `deleted_for` and `starred_by` sets for a page of messages.
fn attach_sets(conn: &Connection, messages: &mut [Message]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
    let hidden = fetch_principal_sets(conn, "message_hidden", &ids)?;
    let stars = fetch_principal_sets(conn, "message_stars", &ids)?;

    for message in messages.iter_mut() {
        if let Some(set) = hidden.get(&message.id) {
            message.deleted_for = set.clone();
        }
        if let Some(set) = stars.get(&message.id) {
            message.starred_by = set.clone();
        }
    }
    Ok(())
}

/// Ids bound per `IN (...)` query, well below SQLite's host parameter limit.
const SET_QUERY_CHUNK: usize = 500;

fn fetch_principal_sets(
    conn: &Connection,
    table: &str,
    message_ids: &[String],
) -> Result<HashMap<Uuid, BTreeSet<Uuid>>> {
    let mut sets: HashMap<Uuid, BTreeSet<Uuid>> = HashMap::new();

    for chunk in message_ids.chunks(SET_QUERY_CHUNK) {
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT message_id, principal_id FROM {} WHERE message_id IN ({})",
            table,
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare_cached(&sql)?;
        let params: Vec<&dyn ToSql> = chunk.iter().map(|id| id as &dyn ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok((uuid_col(row, 0)?, uuid_col(row, 1)?))
        })?;
        for row in rows {
            let (message_id, principal_id) = row?;
            sets.entry(message_id).or_default().insert(principal_id);
        }
    }
    Ok(sets)
}

pub(crate) fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_col(row, 0)?,
        sender_id: uuid_col(row, 1)?,
        receiver_id: opt_uuid_col(row, 2)?,
        content: row.get(3)?,
        attachment_ref: row.get(4)?,
        created_at: ts_col(row, 5)?,
        is_read: row.get(6)?,
        read_at: opt_ts_col(row, 7)?,
        read_batch: row.get(8)?,
        deleted_for_sender: row.get(9)?,
        deleted_for_admin: row.get(10)?,
        is_pinned: row.get(11)?,
        pinned_at: opt_ts_col(row, 12)?,
        pin_expires_at: opt_ts_col(row, 13)?,
        pinned_by: opt_uuid_col(row, 14)?,
        deleted_for: BTreeSet::new(),
        starred_by: BTreeSet::new(),
    })
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn parse_ts(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(&s, idx)
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_ts(&s, idx)).transpose()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use parley_types::models::Role;

    pub(crate) fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    pub(crate) fn principal(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_principal(id, name, "hash", Role::User).unwrap();
        id
    }

    pub(crate) fn send(db: &Database, from: Uuid, to: Option<Uuid>, at: DateTime<Utc>) -> Message {
        db.insert_message(&NewMessage {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: to,
            content: format!("msg at {}", at),
            attachment_ref: None,
            created_at: at,
        })
        .unwrap()
    }

    #[test]
    fn conversation_is_ordered_and_both_directions() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");
        let c = principal(&db, "c");

        let m2 = send(&db, b, Some(a), t(2));
        let m1 = send(&db, a, Some(b), t(1));
        send(&db, a, Some(c), t(3));
        send(&db, a, None, t(4));

        let convo = db.get_conversation(a, b, Some(a)).unwrap();
        let ids: Vec<Uuid> = convo.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m1.id, m2.id]);
        assert_eq!(db.get_conversation(b, a, None).unwrap().len(), 2);
    }

    #[test]
    fn hidden_messages_only_disappear_for_that_viewer() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");
        let m = send(&db, a, Some(b), t(1));

        let patch = MessagePatch {
            hide_for: Some(b),
            ..Default::default()
        };
        let updated = db.apply_patch(m.id, &patch).unwrap().unwrap();
        assert!(updated.deleted_for.contains(&b));
        assert!(!updated.deleted_for.contains(&a));

        assert!(db.get_conversation(a, b, Some(b)).unwrap().is_empty());
        assert_eq!(db.get_conversation(a, b, Some(a)).unwrap().len(), 1);
    }

    #[test]
    fn patch_on_missing_message_returns_none() {
        let db = Database::open_in_memory().unwrap();
        let patch = MessagePatch {
            deleted_for_admin: Some(true),
            ..Default::default()
        };
        assert!(db.apply_patch(Uuid::new_v4(), &patch).unwrap().is_none());
    }

    #[test]
    fn stars_are_per_principal_and_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");
        let m = send(&db, a, Some(b), t(1));

        let star_a = MessagePatch {
            star: Some((a, true)),
            ..Default::default()
        };
        db.apply_patch(m.id, &star_a).unwrap();
        let updated = db.apply_patch(m.id, &star_a).unwrap().unwrap();
        assert_eq!(updated.starred_by.len(), 1);
        assert!(updated.starred_by.contains(&a));

        assert_eq!(db.get_starred(a).unwrap().len(), 1);
        assert!(db.get_starred(b).unwrap().is_empty());

        let unstar = MessagePatch {
            star: Some((a, false)),
            ..Default::default()
        };
        let updated = db.apply_patch(m.id, &unstar).unwrap().unwrap();
        assert!(updated.starred_by.is_empty());
    }

    #[test]
    fn long_conversations_load_their_hidden_and_star_sets() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");

        let total = 2 * SET_QUERY_CHUNK + 7;
        let mut ids = Vec::with_capacity(total);
        for i in 0..total {
            ids.push(send(&db, a, Some(b), t(i as i64)).id);
        }

        let first = ids[0];
        let last = ids[total - 1];
        for id in [first, last] {
            let patch = MessagePatch {
                hide_for: Some(b),
                ..Default::default()
            };
            db.apply_patch(id, &patch).unwrap();
            let patch = MessagePatch {
                star: Some((a, true)),
                ..Default::default()
            };
            db.apply_patch(id, &patch).unwrap();
        }

        let convo = db.get_conversation(a, b, Some(a)).unwrap();
        assert_eq!(convo.len(), total);
        for m in [&convo[0], &convo[total - 1]] {
            assert!(m.deleted_for.contains(&b));
            assert!(m.starred_by.contains(&a));
        }
        assert!(convo[SET_QUERY_CHUNK].starred_by.is_empty());

        assert_eq!(db.get_conversation(a, b, Some(b)).unwrap().len(), total - 2);
        assert_eq!(db.get_starred(a).unwrap().len(), 2);
    }

    #[test]
    fn assistant_thread_excludes_peer_messages() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");
        send(&db, a, Some(b), t(1));
        let ai = send(&db, a, None, t(2));

        let thread = db.get_assistant_thread(a).unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].id, ai.id);
        assert!(thread[0].is_assistant_directed());
    }
}
