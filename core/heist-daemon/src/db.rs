//! SQLite persistence for heist-daemon.
//!
//! One database backs the engine's store, the credit ledger and the member
//! directory. Records are kept as JSON payloads keyed by community and id;
//! only the columns used for filtering are broken out.

use chrono::Utc;
use heist_core::ports::LedgerResult;
use heist_core::{
    Config, Ledger, LedgerError, MemberDirectory, MemberRecord, Store, StoreResult, Target,
    TargetQuery, Theme,
};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::path::PathBuf;

pub struct Db {
    path: PathBuf,
    opening_balance: i64,
}

impl Db {
    pub fn new(path: PathBuf, opening_balance: i64) -> Result<Self, String> {
        let db = Self {
            path,
            opening_balance,
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn record_display_name(
        &self,
        community_id: &str,
        member_id: &str,
        display_name: &str,
    ) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO member_names (community_id, member_id, display_name, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(community_id, member_id) DO UPDATE SET \
                    display_name = excluded.display_name, \
                    updated_at = excluded.updated_at",
                params![community_id, member_id, display_name, now_rfc3339()],
            )
            .map_err(|err| format!("Failed to record display name: {}", err))?;
            Ok(())
        })
    }

    fn lookup_display_name(
        &self,
        community_id: &str,
        member_id: &str,
    ) -> Result<Option<String>, String> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT display_name FROM member_names WHERE community_id = ?1 AND member_id = ?2",
                params![community_id, member_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| format!("Failed to query display name: {}", err))
        })
    }

    fn read_balance(conn: &Connection, community_id: &str, member_id: &str) -> Result<Option<i64>, String> {
        conn.query_row(
            "SELECT balance FROM accounts WHERE community_id = ?1 AND member_id = ?2",
            params![community_id, member_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| format!("Failed to query balance: {}", err))
    }

    /// Applies `delta` to an account inside an immediate transaction. Refuses
    /// to take the balance below zero.
    fn adjust_balance(&self, community_id: &str, member_id: &str, delta: i64) -> LedgerResult<i64> {
        let opening_balance = self.opening_balance;
        let outcome = self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| format!("Failed to begin ledger transaction: {}", err))?;
            let balance = Self::read_balance(&tx, community_id, member_id)?
                .unwrap_or(opening_balance);
            let next = balance.saturating_add(delta);
            if next < 0 {
                return Ok(Err(LedgerError::Insufficient {
                    balance,
                    requested: delta.saturating_neg(),
                }));
            }
            tx.execute(
                "INSERT INTO accounts (community_id, member_id, balance, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(community_id, member_id) DO UPDATE SET \
                    balance = excluded.balance, \
                    updated_at = excluded.updated_at",
                params![community_id, member_id, next, now_rfc3339()],
            )
            .map_err(|err| format!("Failed to update balance: {}", err))?;
            tx.commit()
                .map_err(|err| format!("Failed to commit ledger transaction: {}", err))?;
            Ok(Ok(next))
        });
        outcome.map_err(LedgerError::from)?
    }

    fn load_payload<T: serde::de::DeserializeOwned>(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<T>, String> {
        let payload: Option<String> = self.with_connection(|conn| {
            conn.query_row(sql, args, |row| row.get(0))
                .optional()
                .map_err(|err| format!("Failed to query record: {}", err))
        })?;
        match payload {
            Some(payload) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|err| format!("Failed to parse record payload: {}", err)),
            None => Ok(None),
        }
    }

    fn load_payloads<T: serde::de::DeserializeOwned>(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<T>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|err| format!("Failed to prepare query: {}", err))?;
            let rows = stmt
                .query_map(args, |row| row.get::<_, String>(0))
                .map_err(|err| format!("Failed to read rows: {}", err))?;

            let mut records = Vec::new();
            for row in rows {
                let payload = row.map_err(|err| format!("Failed to decode row: {}", err))?;
                let record: T = serde_json::from_str(&payload)
                    .map_err(|err| format!("Failed to parse record payload: {}", err))?;
                records.push(record);
            }
            Ok(records)
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS configs (
                    community_id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS members (
                    community_id TEXT NOT NULL,
                    member_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (community_id, member_id)
                 );
                 CREATE TABLE IF NOT EXISTS targets (
                    community_id TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    crew_size INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (community_id, target_id)
                 );
                 CREATE TABLE IF NOT EXISTS themes (
                    community_id TEXT NOT NULL,
                    theme_id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (community_id, theme_id)
                 );
                 CREATE TABLE IF NOT EXISTS accounts (
                    community_id TEXT NOT NULL,
                    member_id TEXT NOT NULL,
                    balance INTEGER NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (community_id, member_id)
                 );
                 CREATE TABLE IF NOT EXISTS member_names (
                    community_id TEXT NOT NULL,
                    member_id TEXT NOT NULL,
                    display_name TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (community_id, member_id)
                 );
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))?;
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn encode<T: serde::Serialize>(record: &T) -> Result<String, String> {
    serde_json::to_string(record).map_err(|err| format!("Failed to serialize record: {}", err))
}

impl Store for Db {
    fn load_config(&self, community_id: &str) -> StoreResult<Option<Config>> {
        Ok(self.load_payload(
            "SELECT payload FROM configs WHERE community_id = ?1",
            params![community_id],
        )?)
    }

    fn save_config(&self, config: &Config) -> StoreResult<()> {
        let payload = encode(config)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO configs (community_id, payload, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(community_id) DO UPDATE SET \
                    payload = excluded.payload, \
                    updated_at = excluded.updated_at",
                params![config.community_id, payload, now_rfc3339()],
            )
            .map_err(|err| format!("Failed to save config: {}", err))?;
            Ok(())
        })?;
        Ok(())
    }

    fn load_member(&self, community_id: &str, member_id: &str) -> StoreResult<Option<MemberRecord>> {
        Ok(self.load_payload(
            "SELECT payload FROM members WHERE community_id = ?1 AND member_id = ?2",
            params![community_id, member_id],
        )?)
    }

    fn save_member(&self, record: &MemberRecord) -> StoreResult<()> {
        let payload = encode(record)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO members (community_id, member_id, status, payload, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(community_id, member_id) DO UPDATE SET \
                    status = excluded.status, \
                    payload = excluded.payload, \
                    updated_at = excluded.updated_at",
                params![
                    record.community_id,
                    record.member_id,
                    record.status.as_str(),
                    payload,
                    now_rfc3339()
                ],
            )
            .map_err(|err| format!("Failed to save member: {}", err))?;
            Ok(())
        })?;
        Ok(())
    }

    fn query_targets(&self, query: &TargetQuery) -> StoreResult<Vec<Target>> {
        let targets: Vec<Target> = match &query.community_id {
            Some(community_id) => self.load_payloads(
                "SELECT payload FROM targets WHERE community_id = ?1 ORDER BY crew_size, target_id",
                params![community_id],
            )?,
            None => self.load_payloads(
                "SELECT payload FROM targets ORDER BY community_id, crew_size, target_id",
                params![],
            )?,
        };
        Ok(query.apply(targets))
    }

    fn save_target(&self, target: &Target) -> StoreResult<()> {
        let payload = encode(target)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO targets (community_id, target_id, crew_size, payload, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(community_id, target_id) DO UPDATE SET \
                    crew_size = excluded.crew_size, \
                    payload = excluded.payload, \
                    updated_at = excluded.updated_at",
                params![
                    target.community_id,
                    target.target_id,
                    target.crew_size,
                    payload,
                    now_rfc3339()
                ],
            )
            .map_err(|err| format!("Failed to save target: {}", err))?;
            Ok(())
        })?;
        Ok(())
    }

    fn load_themes(&self, community_id: &str) -> StoreResult<Vec<Theme>> {
        Ok(self.load_payloads(
            "SELECT payload FROM themes WHERE community_id = ?1 ORDER BY theme_id",
            params![community_id],
        )?)
    }

    fn save_theme(&self, community_id: &str, theme: &Theme) -> StoreResult<()> {
        let payload = encode(theme)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO themes (community_id, theme_id, payload) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(community_id, theme_id) DO UPDATE SET payload = excluded.payload",
                params![community_id, theme.id, payload],
            )
            .map_err(|err| format!("Failed to save theme: {}", err))?;
            Ok(())
        })?;
        Ok(())
    }
}

impl Ledger for Db {
    fn balance(&self, community_id: &str, member_id: &str) -> LedgerResult<i64> {
        let opening_balance = self.opening_balance;
        let balance = self.with_connection(|conn| Self::read_balance(conn, community_id, member_id))?;
        Ok(balance.unwrap_or(opening_balance))
    }

    fn deposit(&self, community_id: &str, member_id: &str, amount: i64) -> LedgerResult<i64> {
        self.adjust_balance(community_id, member_id, amount.max(0))
    }

    fn withdraw(&self, community_id: &str, member_id: &str, amount: i64) -> LedgerResult<i64> {
        self.adjust_balance(community_id, member_id, amount.max(0).saturating_neg())
    }
}

impl MemberDirectory for Db {
    fn display_name(&self, community_id: &str, member_id: &str) -> String {
        match self.lookup_display_name(community_id, member_id) {
            Ok(Some(name)) => name,
            Ok(None) => member_id.to_string(),
            Err(err) => {
                tracing::warn!(
                    community = %community_id,
                    member = %member_id,
                    error = %err,
                    "Failed to look up display name"
                );
                member_id.to_string()
            }
        }
    }
}
