use crate::models::PrincipalRow;
use crate::{Database, ts};
use anyhow::Result;
use chrono::{DateTime, Utc};
use parley_types::models::Role;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

const PRINCIPAL_COLUMNS: &str = "id, username, password, role, token_version, last_seen";

impl Database {
    // -- Principals --

    pub fn create_principal(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO principals (id, username, password, role) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), username, password_hash, role.as_str()),
            )?;
            Ok(())
        })
    }

    pub fn get_principal_by_username(&self, username: &str) -> Result<Option<PrincipalRow>> {
        self.with_conn(|conn| query_principal(conn, "username", username))
    }

    pub fn get_principal_by_id(&self, id: Uuid) -> Result<Option<PrincipalRow>> {
        self.with_conn(|conn| query_principal(conn, "id", &id.to_string()))
    }

    pub fn principal_exists(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM principals WHERE id = ?1",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Increment the principal's token version and return the updated row,
    /// or `None` if the principal does not exist. The bump and the read share
    /// one transaction, so the row carries exactly the version this call wrote.
    pub fn bump_token_version(&self, id: Uuid) -> Result<Option<PrincipalRow>> {
        self.with_tx(|tx| {
            let bumped = tx.execute(
                "UPDATE principals SET token_version = token_version + 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            if bumped == 0 {
                return Ok(None);
            }
            query_principal(tx, "id", &id.to_string())
        })
    }

    pub fn touch_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE principals SET last_seen = ?2 WHERE id = ?1",
                (id.to_string(), ts(at)),
            )?;
            Ok(())
        })
    }
}

fn query_principal(conn: &Connection, column: &str, value: &str) -> Result<Option<PrincipalRow>> {
    let sql = format!(
        "SELECT {} FROM principals WHERE {} = ?1",
        PRINCIPAL_COLUMNS, column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })
        .optional()?;

    let Some((id, username, password, role, token_version, last_seen)) = row else {
        return Ok(None);
    };

    Ok(Some(PrincipalRow {
        id: id.parse()?,
        username,
        password,
        role: role.parse().map_err(anyhow::Error::msg)?,
        token_version,
        last_seen: last_seen
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_version_increments_monotonically() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.create_principal(id, "alice", "hash", Role::User).unwrap();

        assert_eq!(db.get_principal_by_id(id).unwrap().unwrap().token_version, 0);
        let version = |db: &Database| db.bump_token_version(id).unwrap().map(|r| r.token_version);
        assert_eq!(version(&db), Some(1));
        assert_eq!(version(&db), Some(2));
        assert_eq!(db.get_principal_by_id(id).unwrap().unwrap().token_version, 2);
        assert!(db.bump_token_version(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn principal_lookup_by_username_and_last_seen() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.create_principal(id, "root", "hash", Role::Admin).unwrap();

        let row = db.get_principal_by_username("root").unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.role, Role::Admin);
        assert!(row.last_seen.is_none());

        let now = Utc::now();
        db.touch_last_seen(id, now).unwrap();
        let row = db.get_principal_by_id(id).unwrap().unwrap();
        assert_eq!(ts(row.last_seen.unwrap()), ts(now));
        assert!(db.get_principal_by_username("nobody").unwrap().is_none());
    }
}
