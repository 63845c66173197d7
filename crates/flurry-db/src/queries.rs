use crate::models::{ChatRow, MemberRow, MessageRow, UserRow, parse_timestamp};
use crate::{Database, format_timestamp};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str =
    "SELECT m.id, m.chat_id, m.user_id, u.name, m.body, m.created_at
     FROM messages m
     JOIN users u ON m.user_id = u.id";

const MEMBER_COLUMNS: &str =
    "SELECT cu.chat_id, cu.user_id, u.name, cu.joined_at
     FROM chat_users cu
     JOIN users u ON cu.user_id = u.id";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, name: &str, now: DateTime<Utc>) -> Result<UserRow> {
        let row = UserRow {
            id: id.to_string(),
            name: name.to_string(),
            created_at: format_timestamp(now),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
                (&row.id, &row.name, &row.created_at),
            )?;
            Ok(())
        })?;
        Ok(row)
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at FROM users WHERE id = ?1",
                [id.to_string()],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Chats the user is a member of, oldest membership first.
    pub fn get_user_chats(&self, user_id: Uuid) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.created_at
                 FROM chat_users cu
                 JOIN chats c ON cu.chat_id = c.id
                 WHERE cu.user_id = ?1
                 ORDER BY cu.joined_at ASC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Chats --

    pub fn create_chat(&self, id: Uuid, name: Option<&str>, now: DateTime<Utc>) -> Result<ChatRow> {
        let row = ChatRow {
            id: id.to_string(),
            name: name.map(str::to_string),
            created_at: format_timestamp(now),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (id, name, created_at) VALUES (?1, ?2, ?3)",
                (&row.id, &row.name, &row.created_at),
            )?;
            Ok(())
        })?;
        Ok(row)
    }

    pub fn get_chat(&self, id: Uuid) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at FROM chats WHERE id = ?1",
                [id.to_string()],
                chat_from_row,
            )
            .optional()
        })
    }

    // -- Members --

    /// Adds the user to the chat unless the pair already exists.
    /// Returns the number of rows inserted (0 or 1).
    ///
    /// `joined_at` is `now` unless that would not sort after the chat's
    /// latest join, so the member feed cursor never skips a row.
    pub fn upsert_membership(&self, chat_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let joined_at = next_stamp(
                conn,
                "SELECT MAX(joined_at) FROM chat_users WHERE chat_id = ?1",
                chat_id,
                now,
            )?;
            let affected = conn.execute(
                "INSERT OR IGNORE INTO chat_users (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                (chat_id.to_string(), user_id.to_string(), joined_at),
            )?;
            Ok(affected)
        })
    }

    pub fn get_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE cu.chat_id = ?1 AND cu.user_id = ?2", MEMBER_COLUMNS);
            conn.query_row(&sql, [chat_id.to_string(), user_id.to_string()], member_from_row)
                .optional()
        })
    }

    /// Members in join order.
    pub fn get_members(&self, chat_id: Uuid) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE cu.chat_id = ?1 ORDER BY cu.joined_at ASC, cu.rowid ASC",
                MEMBER_COLUMNS
            );
            query_members(conn, &sql, &[&chat_id.to_string()])
        })
    }

    /// Members who joined strictly after `since`, in join order.
    pub fn get_members_since(&self, chat_id: Uuid, since: DateTime<Utc>) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE cu.chat_id = ?1 AND cu.joined_at > ?2 ORDER BY cu.joined_at ASC, cu.rowid ASC",
                MEMBER_COLUMNS
            );
            query_members(conn, &sql, &[&chat_id.to_string(), &format_timestamp(since)])
        })
    }

    // -- Messages --

    /// Stores a message stamped strictly after every earlier message in the
    /// chat. A clock that stalls or steps back yields `latest + 1µs` instead
    /// of `now`, so insert order and `created_at` order always agree.
    pub fn insert_message(
        &self,
        id: Uuid,
        chat_id: Uuid,
        user_id: Uuid,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let created_at = next_stamp(
                conn,
                "SELECT MAX(created_at) FROM messages WHERE chat_id = ?1",
                chat_id,
                now,
            )?;
            conn.execute(
                "INSERT INTO messages (id, chat_id, user_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.to_string(), chat_id.to_string(), user_id.to_string(), body, created_at],
            )?;

            let user_name: String = conn
                .query_row("SELECT name FROM users WHERE id = ?1", [user_id.to_string()], |row| {
                    row.get(0)
                })
                .map_err(|_| anyhow!("User not found: {}", user_id))?;

            Ok(MessageRow {
                id: id.to_string(),
                chat_id: chat_id.to_string(),
                user_id: user_id.to_string(),
                user_name,
                body: body.to_string(),
                created_at,
            })
        })
    }

    /// All messages of a chat, oldest first.
    pub fn get_messages(&self, chat_id: Uuid) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE m.chat_id = ?1 ORDER BY m.created_at ASC, m.rowid ASC",
                MESSAGE_COLUMNS
            );
            query_messages(conn, &sql, &[&chat_id.to_string()])
        })
    }

    /// Messages created strictly after `since`, oldest first.
    pub fn get_messages_since(&self, chat_id: Uuid, since: DateTime<Utc>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE m.chat_id = ?1 AND m.created_at > ?2 ORDER BY m.created_at ASC, m.rowid ASC",
                MESSAGE_COLUMNS
            );
            query_messages(conn, &sql, &[&chat_id.to_string(), &format_timestamp(since)])
        })
    }
}

/// Formatted timestamp for a new row: `now`, or one microsecond past the
/// latest value `latest_sql` finds for the chat if `now` does not sort after it.
fn next_stamp(conn: &Connection, latest_sql: &str, chat_id: Uuid, now: DateTime<Utc>) -> Result<String> {
    let latest: Option<String> = conn.query_row(latest_sql, [chat_id.to_string()], |row| row.get(0))?;
    let stamp = format_timestamp(now);
    match latest {
        Some(latest) if stamp <= latest => {
            Ok(format_timestamp(parse_timestamp(&latest)? + Duration::microseconds(1)))
        }
        _ => Ok(stamp),
    }
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        chat_id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        joined_at: row.get(3)?,
    })
}

fn query_members(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<MemberRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, member_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_messages(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                user_id: row.get(2)?,
                user_name: row.get(3)?,
                body: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
