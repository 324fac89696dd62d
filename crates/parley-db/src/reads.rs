use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::models::{ReadBatch, UnreadBatch};
use crate::{Database, ts};

impl Database {
    /// Mark every unread message from `sender` to `reader` as read, as one batch.
    ///
    /// `read_at` is never earlier than a message's `created_at`. Returns `None`
    /// when nothing was unread; no batch is allocated in that case.
    pub fn mark_read(&self, reader: Uuid, sender: Uuid, now: DateTime<Utc>) -> Result<Option<ReadBatch>> {
        self.with_tx(|tx| {
            let reader_id = reader.to_string();
            let sender_id = sender.to_string();

            let mut stmt = tx.prepare(
                "SELECT id FROM messages
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0
                 ORDER BY created_at ASC",
            )?;
            let ids = stmt
                .query_map(params![reader_id, sender_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);

            if ids.is_empty() {
                return Ok(None);
            }

            let read_at = ts(now);
            tx.execute(
                "INSERT INTO read_batches (reader_id, sender_id, read_at) VALUES (?1, ?2, ?3)",
                params![reader_id, sender_id, read_at],
            )?;
            let batch_id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE messages
                 SET is_read = 1,
                     read_batch = ?3,
                     read_at = CASE WHEN created_at > ?4 THEN created_at ELSE ?4 END
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
                params![reader_id, sender_id, batch_id, read_at],
            )?;

            let message_ids = ids
                .iter()
                .map(|id| id.parse::<Uuid>())
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(Some(ReadBatch {
                batch_id,
                read_at: now,
                message_ids,
            }))
        })
    }

    /// Revert the reader's most recent read batch of `target`'s messages.
    ///
    /// Only messages created after the reader's last reply to `target` are
    /// eligible; among those, the batch with the highest id is reverted.
    /// Returns `None` when there is nothing to revert.
    pub fn mark_unread(&self, reader: Uuid, target: Uuid) -> Result<Option<UnreadBatch>> {
        self.with_tx(|tx| {
            let reader_id = reader.to_string();
            let target_id = target.to_string();

            let last_reply: Option<String> = tx
                .query_row(
                    "SELECT MAX(created_at) FROM messages WHERE sender_id = ?1 AND receiver_id = ?2",
                    params![reader_id, target_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            let batch_id: Option<i64> = tx
                .query_row(
                    "SELECT MAX(read_batch) FROM messages
                     WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 1
                       AND (?3 IS NULL OR created_at > ?3)",
                    params![target_id, reader_id, last_reply],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            let Some(batch_id) = batch_id else {
                return Ok(None);
            };

            let mut stmt = tx.prepare(
                "SELECT id FROM messages
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND read_batch = ?3
                   AND (?4 IS NULL OR created_at > ?4)
                 ORDER BY created_at ASC",
            )?;
            let ids = stmt
                .query_map(params![target_id, reader_id, batch_id, last_reply], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);

            tx.execute(
                "UPDATE messages
                 SET is_read = 0, read_at = NULL, read_batch = NULL
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND read_batch = ?3
                   AND (?4 IS NULL OR created_at > ?4)",
                params![target_id, reader_id, batch_id, last_reply],
            )?;

            let message_ids = ids
                .iter()
                .map(|id| id.parse::<Uuid>())
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(Some(UnreadBatch {
                batch_id,
                message_ids,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::tests::{principal, send, t};
    use chrono::Duration;

    #[test]
    fn read_at_never_precedes_created_at() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");
        let early = send(&db, b, Some(a), t(1));
        // Clock skew: message stamped after the reader's "now".
        let late = send(&db, b, Some(a), t(100));

        let batch = db.mark_read(a, b, t(50)).unwrap().unwrap();
        assert_eq!(batch.message_ids.len(), 2);

        let early = db.get_message(early.id).unwrap().unwrap();
        let late = db.get_message(late.id).unwrap().unwrap();
        assert_eq!(early.read_at, Some(t(50)));
        assert_eq!(late.read_at, Some(t(100)));
        assert!(late.is_read);
        assert_eq!(late.read_batch, Some(batch.batch_id));
    }

    #[test]
    fn mark_read_without_unread_allocates_nothing() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");
        assert!(db.mark_read(a, b, t(1)).unwrap().is_none());
    }

    #[test]
    fn unread_reverts_only_the_batch_after_the_last_reply() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");

        let first: Vec<_> = (1..=5).map(|i| send(&db, b, Some(a), t(i * 10))).collect();
        db.mark_read(a, b, t(52)).unwrap().unwrap();
        send(&db, a, Some(b), t(55));
        let second: Vec<_> = (6..=8).map(|i| send(&db, b, Some(a), t(i * 10))).collect();
        db.mark_read(a, b, t(90)).unwrap().unwrap();

        let reverted = db.mark_unread(a, b).unwrap().unwrap();
        let mut expected: Vec<Uuid> = second.iter().map(|m| m.id).collect();
        let mut got = reverted.message_ids.clone();
        expected.sort();
        got.sort();
        assert_eq!(got, expected);

        for m in &first {
            let m = db.get_message(m.id).unwrap().unwrap();
            assert!(m.is_read);
            assert_eq!(m.read_at, Some(t(52)));
        }
        for m in &second {
            let m = db.get_message(m.id).unwrap().unwrap();
            assert!(!m.is_read);
            assert!(m.read_at.is_none());
            assert!(m.read_batch.is_none());
        }
    }

    #[test]
    fn identical_timestamps_still_separate_batches() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");

        let older = send(&db, b, Some(a), t(1));
        db.mark_read(a, b, t(5)).unwrap().unwrap();
        let newer = send(&db, b, Some(a), t(2));
        db.mark_read(a, b, t(5)).unwrap().unwrap();

        let reverted = db.mark_unread(a, b).unwrap().unwrap();
        assert_eq!(reverted.message_ids, vec![newer.id]);
        assert!(db.get_message(older.id).unwrap().unwrap().is_read);
    }

    #[test]
    fn unread_with_nothing_eligible_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        let a = principal(&db, "a");
        let b = principal(&db, "b");

        for i in 1..=3 {
            send(&db, a, Some(b), t(i));
        }
        db.mark_read(b, a, t(4)).unwrap().unwrap();

        // A never read anything from B.
        assert!(db.mark_unread(a, b).unwrap().is_none());

        // B replied after reading, so B's batch is closed off too.
        send(&db, b, Some(a), t(4) + Duration::seconds(1));
        assert!(db.mark_unread(b, a).unwrap().is_none());
    }
}
