use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use parley_types::models::{Message, PIN_CEILING};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::messages::{MESSAGE_COLUMNS, PAIR_CLAUSE, fetch_message, load_messages};
use crate::models::PinOutcome;
use crate::{Database, opt_ts, ts};

impl Database {
    /// Pin a message in its peer conversation.
    ///
    /// Runs as one transaction: expired pins in the conversation are cleared,
    /// then the oldest active pins are evicted until the new pin fits under
    /// [`PIN_CEILING`]. Returns `None` if the message does not exist.
    pub fn pin_message(
        &self,
        id: Uuid,
        pinned_by: Uuid,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<PinOutcome>> {
        self.with_tx(|tx| {
            let Some(target) = fetch_message(tx, id)? else {
                return Ok(None);
            };
            let Some(receiver) = target.receiver_id else {
                bail!("message {} is not part of a peer conversation", id);
            };

            let expired = sweep_pair(tx, target.sender_id, receiver, now)?;

            let sql = format!(
                "SELECT {} FROM messages
                 WHERE {} AND is_pinned = 1 AND id != ?3
                 ORDER BY pinned_at ASC",
                MESSAGE_COLUMNS, PAIR_CLAUSE
            );
            let active = load_messages(
                tx,
                &sql,
                params![target.sender_id.to_string(), receiver.to_string(), id.to_string()],
            )?;

            let overflow = (active.len() + 1).saturating_sub(PIN_CEILING);
            let mut evicted = Vec::with_capacity(overflow);
            for stale in active.into_iter().take(overflow) {
                clear_pin(tx, stale.id)?;
                if let Some(cleared) = fetch_message(tx, stale.id)? {
                    evicted.push(cleared);
                }
            }

            tx.execute(
                "UPDATE messages
                 SET is_pinned = 1, pinned_at = ?2, pin_expires_at = ?3, pinned_by = ?4
                 WHERE id = ?1",
                params![id.to_string(), ts(now), opt_ts(expires_at), pinned_by.to_string()],
            )?;

            let message = fetch_message(tx, id)?
                .ok_or_else(|| anyhow::anyhow!("message {} vanished while pinning", id))?;

            Ok(Some(PinOutcome {
                message,
                expired,
                evicted,
            }))
        })
    }

    /// Clear expired pins between `a` and `b` and return the cleared messages.
    pub fn sweep_expired_pins(&self, a: Uuid, b: Uuid, now: DateTime<Utc>) -> Result<Vec<Message>> {
        self.with_tx(|tx| sweep_pair(tx, a, b, now))
    }

    /// Clear every expired pin in every conversation.
    pub fn sweep_all_expired_pins(&self, now: DateTime<Utc>) -> Result<Vec<Message>> {
        self.with_tx(|tx| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE is_pinned = 1 AND pin_expires_at IS NOT NULL AND pin_expires_at <= ?1",
                MESSAGE_COLUMNS
            );
            let expired = load_messages(tx, &sql, params![ts(now)])?;
            clear_all(tx, expired)
        })
    }

    /// Active pins between `a` and `b`, oldest pin first.
    pub fn get_active_pins(&self, a: Uuid, b: Uuid, now: DateTime<Utc>) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE {} AND is_pinned = 1
                   AND (pin_expires_at IS NULL OR pin_expires_at > ?3)
                 ORDER BY pinned_at ASC",
                MESSAGE_COLUMNS, PAIR_CLAUSE
            );
            load_messages(conn, &sql, params![a.to_string(), b.to_string(), ts(now)])
        })
    }
}

fn sweep_pair(conn: &Connection, a: Uuid, b: Uuid, now: DateTime<Utc>) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {} FROM messages
         WHERE {} AND is_pinned = 1
           AND pin_expires_at IS NOT NULL AND pin_expires_at <= ?3",
        MESSAGE_COLUMNS, PAIR_CLAUSE
    );
    let expired = load_messages(conn, &sql, params![a.to_string(), b.to_string(), ts(now)])?;
    clear_all(conn, expired)
}

fn clear_all(conn: &Connection, expired: Vec<Message>) -> Result<Vec<Message>> {
    let mut cleared = Vec::with_capacity(expired.len());
    for message in expired {
        clear_pin(conn, message.id)?;
        if let Some(message) = fetch_message(conn, message.id)? {
            cleared.push(message);
        }
    }
    Ok(cleared)
}

fn clear_pin(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE messages
         SET is_pinned = 0, pinned_at = NULL, pin_expires_at = NULL, pinned_by = NULL
         WHERE id = ?1",
        [id.to_string()],
    )?;
    Ok(())
}
