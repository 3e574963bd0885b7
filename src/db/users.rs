//! Accounts and password-reset tokens.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{format_timestamp, Database};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub company_name: Option<String>,
    pub industry: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A user about to be inserted. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub company_name: Option<String>,
    pub industry: Option<String>,
}

/// Profile fields that may be changed; `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserChanges {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
    pub industry: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PasswordReset {
    pub id: String,
    pub user_id: String,
    pub expires_at: String,
    pub used: bool,
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, company_name, industry, is_active, is_verified, created_at, updated_at";

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        company_name: row.get(5)?,
        industry: row.get(6)?,
        is_active: row.get(7)?,
        is_verified: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl Database {
    pub fn create_user(&self, user: &NewUser) -> Result<User> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        {
            let conn = self.conn()?;
            conn.execute(
                &format!(
                    "INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, 0, ?8, ?8)"
                ),
                params![
                    id,
                    user.email.to_lowercase(),
                    user.password_hash,
                    user.first_name,
                    user.last_name,
                    user.company_name,
                    user.industry,
                    now,
                ],
            )?;
        }
        self.get_user(&id)?
            .ok_or_else(|| anyhow::anyhow!("User {} vanished after insert", id))
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Email lookup is case-insensitive; addresses are stored lowercased.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                [email.to_lowercase()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self, skip: u32, limit: u32) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id LIMIT ?1 OFFSET ?2"
        ))?;
        let users = stmt
            .query_map([limit, skip], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Apply profile changes. Returns `None` when the user does not exist.
    pub fn update_user(&self, id: &str, changes: &UserChanges) -> Result<Option<User>> {
        let updated = {
            let conn = self.conn()?;
            conn.execute(
                r#"
                UPDATE users SET
                    email = COALESCE(?2, email),
                    first_name = COALESCE(?3, first_name),
                    last_name = COALESCE(?4, last_name),
                    company_name = COALESCE(?5, company_name),
                    industry = COALESCE(?6, industry),
                    updated_at = ?7
                WHERE id = ?1
                "#,
                params![
                    id,
                    changes.email.as_ref().map(|e| e.to_lowercase()),
                    changes.first_name,
                    changes.last_name,
                    changes.company_name,
                    changes.industry,
                    format_timestamp(Utc::now()),
                ],
            )?
        };
        if updated == 0 {
            return Ok(None);
        }
        self.get_user(id)
    }

    pub fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id, password_hash, format_timestamp(Utc::now())],
        )?;
        Ok(updated > 0)
    }

    pub fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE users SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id, active, format_timestamp(Utc::now())],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_user(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn create_password_reset(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO password_resets (id, user_id, token_hash, expires_at, used, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            "#,
            params![
                id,
                user_id,
                token_hash,
                format_timestamp(expires_at),
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(id)
    }

    /// An unused, unexpired reset matching `token_hash`.
    pub fn find_valid_password_reset(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordReset>> {
        let conn = self.conn()?;
        let reset = conn
            .query_row(
                r#"
                SELECT id, user_id, expires_at, used
                FROM password_resets
                WHERE token_hash = ?1 AND used = 0 AND expires_at > ?2
                "#,
                params![token_hash, format_timestamp(now)],
                |row| {
                    Ok(PasswordReset {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        expires_at: row.get(2)?,
                        used: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(reset)
    }

    /// Set the new password and burn the token in one transaction.
    ///
    /// Returns `false`, changing nothing, when the token was already used or
    /// has expired by `now`.
    pub fn consume_password_reset(
        &self,
        reset_id: &str,
        user_id: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let claimed = tx.execute(
            "UPDATE password_resets SET used = 1 WHERE id = ?1 AND used = 0 AND expires_at > ?2",
            params![reset_id, format_timestamp(now)],
        )?;
        if claimed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id, password_hash, format_timestamp(now)],
        )?;
        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            company_name: None,
            industry: Some("retail".to_string()),
        }
    }

    #[test]
    fn test_create_and_lookup_user() {
        let db = test_db();
        let user = db.create_user(&new_user("Ada@Example.com")).unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(user.is_active);
        assert!(!user.is_verified);

        let found = db.get_user_by_email("ADA@example.com").unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[test]
    fn test_duplicate_email_is_rejected() {
        let db = test_db();
        db.create_user(&new_user("dup@example.com")).unwrap();
        assert!(db.create_user(&new_user("dup@example.com")).is_err());
    }

    #[test]
    fn test_update_user_keeps_unset_fields() {
        let db = test_db();
        let user = db.create_user(&new_user("u@example.com")).unwrap();
        let changes = UserChanges {
            company_name: Some("Acme".to_string()),
            ..Default::default()
        };
        let updated = db.update_user(&user.id, &changes).unwrap().unwrap();
        assert_eq!(updated.company_name.as_deref(), Some("Acme"));
        assert_eq!(updated.industry.as_deref(), Some("retail"));
        assert!(db.update_user("missing", &changes).unwrap().is_none());
    }

    #[test]
    fn test_password_reset_is_single_use() {
        let db = test_db();
        let user = db.create_user(&new_user("r@example.com")).unwrap();
        let now = Utc::now();
        db.create_password_reset(&user.id, "digest", now + Duration::hours(24))
            .unwrap();

        let reset = db.find_valid_password_reset("digest", now).unwrap().unwrap();
        assert_eq!(reset.user_id, user.id);
        assert!(db
            .consume_password_reset(&reset.id, &user.id, "new-hash", now)
            .unwrap());

        assert!(db.find_valid_password_reset("digest", now).unwrap().is_none());
        assert_eq!(db.get_user(&user.id).unwrap().unwrap().password_hash, "new-hash");
    }

    #[test]
    fn test_expired_password_reset_is_ignored() {
        let db = test_db();
        let user = db.create_user(&new_user("e@example.com")).unwrap();
        let now = Utc::now();
        db.create_password_reset(&user.id, "old", now - Duration::minutes(1))
            .unwrap();
        assert!(db.find_valid_password_reset("old", now).unwrap().is_none());
    }

    #[test]
    fn test_racing_resets_claim_token_once() {
        let db = test_db();
        let user = db.create_user(&new_user("race@example.com")).unwrap();
        let now = Utc::now();
        db.create_password_reset(&user.id, "shared", now + Duration::hours(1))
            .unwrap();

        // Both callers look the token up before either consumes it.
        let first = db.find_valid_password_reset("shared", now).unwrap().unwrap();
        let second = db.find_valid_password_reset("shared", now).unwrap().unwrap();

        assert!(db
            .consume_password_reset(&first.id, &user.id, "winner", now)
            .unwrap());
        assert!(!db
            .consume_password_reset(&second.id, &user.id, "loser", now)
            .unwrap());
        assert_eq!(db.get_user(&user.id).unwrap().unwrap().password_hash, "winner");
    }

    #[test]
    fn test_consume_rejects_token_expired_after_lookup() {
        let db = test_db();
        let user = db.create_user(&new_user("late@example.com")).unwrap();
        let now = Utc::now();
        db.create_password_reset(&user.id, "late", now + Duration::minutes(5))
            .unwrap();
        let reset = db.find_valid_password_reset("late", now).unwrap().unwrap();

        assert!(!db
            .consume_password_reset(&reset.id, &user.id, "new-hash", now + Duration::minutes(10))
            .unwrap());
        assert_eq!(db.get_user(&user.id).unwrap().unwrap().password_hash, "hash");
    }
}
