//! SQLite-backed datastore.
//!
//! One connection behind a mutex. Every trait method runs as a single
//! transaction on a blocking thread, so the async runtime's workers never
//! wait on disk.
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{Datastore, Placement, Settlement, StoreError, UserFilter};
use crate::types::{
    DeletionLedgerEntry, Email, PendingSecret, ReceivedShare, SecretId, ShareToken, User,
};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    email TEXT PRIMARY KEY,
    name  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queue (
    owner     TEXT NOT NULL REFERENCES users(email) ON DELETE CASCADE ON UPDATE CASCADE,
    secret_id TEXT NOT NULL,
    position  INTEGER NOT NULL,
    PRIMARY KEY (owner, secret_id)
);

CREATE TABLE IF NOT EXISTS pending_shares (
    owner     TEXT NOT NULL,
    secret_id TEXT NOT NULL,
    seq       INTEGER NOT NULL,
    payload   BLOB NOT NULL,
    PRIMARY KEY (owner, secret_id, seq),
    FOREIGN KEY (owner, secret_id) REFERENCES queue(owner, secret_id)
        ON DELETE CASCADE ON UPDATE CASCADE
);

CREATE TABLE IF NOT EXISTS progress (
    owner     TEXT NOT NULL REFERENCES users(email) ON DELETE CASCADE ON UPDATE CASCADE,
    secret_id TEXT NOT NULL,
    count     INTEGER NOT NULL,
    PRIMARY KEY (owner, secret_id)
);

CREATE TABLE IF NOT EXISTS held_shares (
    holder    TEXT NOT NULL REFERENCES users(email) ON DELETE CASCADE ON UPDATE CASCADE,
    secret_id TEXT NOT NULL,
    payload   BLOB NOT NULL,
    PRIMARY KEY (holder, secret_id)
);

CREATE INDEX IF NOT EXISTS held_shares_by_secret ON held_shares(secret_id);

CREATE TABLE IF NOT EXISTS deletions (
    secret_id            TEXT PRIMARY KEY,
    expected_share_count INTEGER NOT NULL
);
";

/// Datastore persisted in a SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Private database that disappears with the store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("sqlite schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn user_exists(conn: &Connection, email: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row("SELECT 1 FROM users WHERE email = ?1", [email], |_| Ok(()))
        .optional()?
        .is_some())
}

fn holds(conn: &Connection, holder: &str, secret_id: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM held_shares WHERE holder = ?1 AND secret_id = ?2",
            [holder, secret_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Emails of users matching `filter`, ordered by email.
fn matching_emails(conn: &Connection, filter: &UserFilter) -> rusqlite::Result<Vec<String>> {
    let mut clauses = Vec::new();
    let mut values: Vec<String> = Vec::new();
    if let Some(email) = &filter.exclude {
        values.push(email.to_string());
        clauses.push(format!("u.email <> ?{}", values.len()));
    }
    if let Some(id) = &filter.lacking_share {
        values.push(id.to_string());
        clauses.push(format!(
            "NOT EXISTS (SELECT 1 FROM held_shares h WHERE h.holder = u.email AND h.secret_id = ?{})",
            values.len()
        ));
    }
    if let Some(id) = &filter.holding_share {
        values.push(id.to_string());
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM held_shares h WHERE h.holder = u.email AND h.secret_id = ?{})",
            values.len()
        ));
    }
    if let Some(id) = &filter.lacking_progress {
        values.push(id.to_string());
        clauses.push(format!(
            "NOT EXISTS (SELECT 1 FROM progress p WHERE p.owner = u.email AND p.secret_id = ?{})",
            values.len()
        ));
    }

    let mut sql = String::from("SELECT u.email FROM users u");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY u.email");

    let mut stmt = conn.prepare(&sql)?;
    let emails = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(emails)
}

fn load_user(conn: &Connection, email: &str) -> Result<Option<User>, StoreError> {
    let Some(name) = conn
        .query_row("SELECT name FROM users WHERE email = ?1", [email], |row| {
            row.get::<_, String>(0)
        })
        .optional()?
    else {
        return Ok(None);
    };
    let mut user = User::new(Email::new(email), name);

    let mut queue = conn.prepare(
        "SELECT secret_id FROM queue WHERE owner = ?1 ORDER BY position",
    )?;
    let mut shares = conn.prepare(
        "SELECT payload FROM pending_shares WHERE owner = ?1 AND secret_id = ?2 ORDER BY seq",
    )?;
    let ids = queue
        .query_map([email], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for id in ids {
        let remaining = shares
            .query_map([email, id.as_str()], |row| row.get::<_, Vec<u8>>(0))?
            .map(|r| r.map(ShareToken::from_bytes))
            .collect::<Result<Vec<_>, _>>()?;
        user.queue.push(PendingSecret::new(SecretId::new(id), remaining));
    }

    let mut held = conn.prepare(
        "SELECT secret_id, payload FROM held_shares WHERE holder = ?1 ORDER BY rowid",
    )?;
    user.held_shares = held
        .query_map([email], |row| {
            Ok(ReceivedShare {
                secret_id: SecretId::new(row.get::<_, String>(0)?),
                payload: ShareToken::from_bytes(row.get(1)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut progress = conn.prepare("SELECT secret_id, count FROM progress WHERE owner = ?1")?;
    let rows = progress
        .query_map([email], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (id, count) in rows {
        user.progress.set(SecretId::new(id), count as usize);
    }

    Ok(Some(user))
}

#[async_trait::async_trait]
impl Datastore for SqliteStore {
    async fn find_user(&self, email: &Email) -> Result<Option<User>, StoreError> {
        let email = email.clone();
        self.run(move |conn| load_user(conn, email.as_str())).await
    }

    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        let filter = filter.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let emails = matching_emails(&tx, &filter)?;
            let mut users = Vec::with_capacity(emails.len());
            for email in emails {
                if let Some(user) = load_user(&tx, &email)? {
                    users.push(user);
                }
            }
            tx.commit()?;
            Ok(users)
        })
        .await
    }

    async fn find_emails(&self, filter: &UserFilter) -> Result<Vec<Email>, StoreError> {
        let filter = filter.clone();
        self.run(move |conn| {
            let emails = matching_emails(conn, &filter)?;
            Ok(emails.into_iter().map(Email::new).collect())
        })
        .await
    }

    async fn insert_user(&self, email: &Email, name: &str) -> Result<(), StoreError> {
        let (email, name) = (email.clone(), name.to_string());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if user_exists(&tx, email.as_str())? {
                return Err(StoreError::AlreadyExists { email });
            }
            tx.execute(
                "INSERT INTO users (email, name) VALUES (?1, ?2)",
                params![email.as_str(), name],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_profile(
        &self,
        email: &Email,
        name: Option<&str>,
        new_email: Option<&Email>,
    ) -> Result<(), StoreError> {
        let email = email.clone();
        let name = name.map(str::to_string);
        let new_email = new_email.cloned();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if let Some(new_email) = &new_email {
                if new_email != &email && user_exists(&tx, new_email.as_str())? {
                    return Err(StoreError::AlreadyExists {
                        email: new_email.clone(),
                    });
                }
            }
            if !user_exists(&tx, email.as_str())? {
                return Err(StoreError::user(&email));
            }
            if let Some(name) = &name {
                tx.execute(
                    "UPDATE users SET name = ?1 WHERE email = ?2",
                    params![name, email.as_str()],
                )?;
            }
            if let Some(new_email) = &new_email {
                // Owned rows follow through ON UPDATE CASCADE.
                tx.execute(
                    "UPDATE users SET email = ?1 WHERE email = ?2",
                    params![new_email.as_str(), email.as_str()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn enqueue_secret(&self, owner: &Email, pending: PendingSecret) -> Result<(), StoreError> {
        let owner = owner.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if !user_exists(&tx, owner.as_str())? {
                return Err(StoreError::user(&owner));
            }
            let id = pending.secret_id.as_str();
            tx.execute(
                "INSERT INTO queue (owner, secret_id, position)
                 SELECT ?1, ?2, COALESCE(MAX(position), 0) + 1 FROM queue WHERE owner = ?1",
                params![owner.as_str(), id],
            )?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO pending_shares (owner, secret_id, seq, payload) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (seq, share) in pending.remaining.iter().enumerate() {
                    insert.execute(params![owner.as_str(), id, seq as i64, share.as_bytes()])?;
                }
            }
            tx.execute(
                "INSERT INTO progress (owner, secret_id, count) VALUES (?1, ?2, 0)
                 ON CONFLICT (owner, secret_id) DO UPDATE SET count = 0",
                params![owner.as_str(), id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn place_share(
        &self,
        owner: &Email,
        secret_id: &SecretId,
        recipient: &Email,
    ) -> Result<Placement, StoreError> {
        let (owner, secret_id, recipient) = (owner.clone(), secret_id.clone(), recipient.clone());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let (o, id, r) = (owner.as_str(), secret_id.as_str(), recipient.as_str());

            if !user_exists(&tx, o)? {
                return Err(StoreError::user(&owner));
            }
            let queued = tx
                .query_row(
                    "SELECT 1 FROM queue WHERE owner = ?1 AND secret_id = ?2",
                    [o, id],
                    |_| Ok(()),
                )
                .optional()?;
            if queued.is_none() {
                return Err(StoreError::queued(&owner, &secret_id));
            }
            let Some((seq, payload)) = tx
                .query_row(
                    "SELECT seq, payload FROM pending_shares
                     WHERE owner = ?1 AND secret_id = ?2 ORDER BY seq LIMIT 1",
                    [o, id],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional()?
            else {
                return Err(StoreError::ConcurrentModification {
                    reason: format!("no shares of {secret_id} left to place"),
                });
            };
            if recipient == owner {
                return Err(StoreError::ConcurrentModification {
                    reason: format!("{owner} cannot receive its own share"),
                });
            }
            if !user_exists(&tx, r)? {
                return Err(StoreError::RecipientGone { email: recipient });
            }
            if holds(&tx, r, id)? {
                return Err(StoreError::already_holds(&recipient, &secret_id));
            }

            tx.execute(
                "DELETE FROM pending_shares WHERE owner = ?1 AND secret_id = ?2 AND seq = ?3",
                params![o, id, seq],
            )?;
            tx.execute(
                "INSERT INTO held_shares (holder, secret_id, payload) VALUES (?1, ?2, ?3)",
                params![r, id, payload],
            )?;
            tx.execute(
                "INSERT INTO progress (owner, secret_id, count) VALUES (?1, ?2, 1)
                 ON CONFLICT (owner, secret_id) DO UPDATE SET count = count + 1",
                params![o, id],
            )?;
            let progress: i64 = tx.query_row(
                "SELECT count FROM progress WHERE owner = ?1 AND secret_id = ?2",
                [o, id],
                |row| row.get(0),
            )?;
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM pending_shares WHERE owner = ?1 AND secret_id = ?2",
                [o, id],
                |row| row.get(0),
            )?;
            tx.commit()?;

            Ok(Placement {
                share: ShareToken::from_bytes(payload),
                remaining: remaining as usize,
                progress: progress as usize,
            })
        })
        .await
    }

    async fn settle_secret(&self, owner: &Email, secret_id: &SecretId) -> Result<Settlement, StoreError> {
        let (owner, secret_id) = (owner.clone(), secret_id.clone());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let (o, id) = (owner.as_str(), secret_id.as_str());
            let queued = tx
                .query_row(
                    "SELECT 1 FROM queue WHERE owner = ?1 AND secret_id = ?2",
                    [o, id],
                    |_| Ok(()),
                )
                .optional()?;
            if queued.is_none() {
                return Ok(Settlement::Absent);
            }
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM pending_shares WHERE owner = ?1 AND secret_id = ?2",
                [o, id],
                |row| row.get(0),
            )?;
            let settlement = if remaining == 0 {
                tx.execute(
                    "DELETE FROM queue WHERE owner = ?1 AND secret_id = ?2",
                    [o, id],
                )?;
                Settlement::Completed
            } else {
                tx.execute(
                    "UPDATE queue
                     SET position = (SELECT MAX(position) + 1 FROM queue WHERE owner = ?1)
                     WHERE owner = ?1 AND secret_id = ?2",
                    [o, id],
                )?;
                Settlement::Rotated {
                    remaining: remaining as usize,
                }
            };
            tx.commit()?;
            Ok(settlement)
        })
        .await
    }

    async fn transfer_share(&self, from: &Email, to: &Email, secret_id: &SecretId) -> Result<(), StoreError> {
        let (from, to, secret_id) = (from.clone(), to.clone(), secret_id.clone());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let (f, t, id) = (from.as_str(), to.as_str(), secret_id.as_str());

            if !user_exists(&tx, f)? {
                return Err(StoreError::user(&from));
            }
            let Some(payload) = tx
                .query_row(
                    "SELECT payload FROM held_shares WHERE holder = ?1 AND secret_id = ?2",
                    [f, id],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?
            else {
                return Err(StoreError::held(&from, &secret_id));
            };
            if to == from {
                return Err(StoreError::already_holds(&to, &secret_id));
            }
            if !user_exists(&tx, t)? {
                return Err(StoreError::RecipientGone { email: to });
            }
            if holds(&tx, t, id)? {
                return Err(StoreError::already_holds(&to, &secret_id));
            }

            tx.execute(
                "DELETE FROM held_shares WHERE holder = ?1 AND secret_id = ?2",
                [f, id],
            )?;
            tx.execute(
                "INSERT INTO held_shares (holder, secret_id, payload) VALUES (?1, ?2, ?3)",
                params![t, id, payload],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn grant_share(&self, to: &Email, share: &ReceivedShare) -> Result<(), StoreError> {
        let (to, share) = (to.clone(), share.clone());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let id = share.secret_id.as_str();
            if !user_exists(&tx, to.as_str())? {
                return Err(StoreError::RecipientGone { email: to });
            }
            if holds(&tx, to.as_str(), id)? {
                return Err(StoreError::already_holds(&to, &share.secret_id));
            }
            tx.execute(
                "INSERT INTO held_shares (holder, secret_id, payload) VALUES (?1, ?2, ?3)",
                params![to.as_str(), id, share.payload.as_bytes()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_user(&self, email: &Email) -> Result<User, StoreError> {
        let email = email.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let user = load_user(&tx, email.as_str())?.ok_or_else(|| StoreError::user(&email))?;
            tx.execute("DELETE FROM users WHERE email = ?1", [email.as_str()])?;
            tx.commit()?;
            Ok(user)
        })
        .await
    }

    async fn purge_share(&self, holder: &Email, secret_id: &SecretId) -> Result<bool, StoreError> {
        let (holder, secret_id) = (holder.clone(), secret_id.clone());
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM held_shares WHERE holder = ?1 AND secret_id = ?2",
                [holder.as_str(), secret_id.as_str()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn record_deletion(&self, entry: &DeletionLedgerEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO deletions (secret_id, expected_share_count) VALUES (?1, ?2)
                 ON CONFLICT (secret_id) DO UPDATE SET expected_share_count = excluded.expected_share_count",
                params![entry.secret_id.as_str(), entry.expected_share_count as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn next_ledger_entry(&self) -> Result<Option<DeletionLedgerEntry>, StoreError> {
        self.run(|conn| {
            Ok(conn
                .query_row(
                    "SELECT secret_id, expected_share_count FROM deletions ORDER BY rowid LIMIT 1",
                    [],
                    |row| {
                        Ok(DeletionLedgerEntry {
                            secret_id: SecretId::new(row.get::<_, String>(0)?),
                            expected_share_count: row.get::<_, i64>(1)? as usize,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    async fn ledger_entries(&self) -> Result<Vec<DeletionLedgerEntry>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT secret_id, expected_share_count FROM deletions ORDER BY rowid",
            )?;
            let entries = stmt
                .query_map([], |row| {
                    Ok(DeletionLedgerEntry {
                        secret_id: SecretId::new(row.get::<_, String>(0)?),
                        expected_share_count: row.get::<_, i64>(1)? as usize,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }

    async fn resolve_ledger_entry(&self, secret_id: &SecretId) -> Result<bool, StoreError> {
        let secret_id = secret_id.clone();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM deletions WHERE secret_id = ?1",
                [secret_id.as_str()],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}
