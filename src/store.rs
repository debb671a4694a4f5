use crate::common::{current_timestamp, format_timestamp, make_session_id};
use crate::config::{Config, DatabaseConfig};
use crate::error::{Result, RewindError};
use crate::migrations::{self, MigrationRunner, LATEST_VERSION};
use crate::models::{
    ChangeType, Command, CommandFilter, FileChange, NewCommand, NewFileChange, Session, StoreStats,
};
use crate::retry::{is_retryable_error, retry_if_retryable, RetryConfig};
use crate::tracker::hash_bytes;
use log::{debug, info};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const STORE_ID_CHARS: usize = 16;

pub const SCHEMA: &str = r#"
-- Sessions: logical grouping of commands
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    name TEXT,
    description TEXT,
    agent_name TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    cwd_start TEXT,
    command_count INTEGER DEFAULT 0,
    success_count INTEGER DEFAULT 0,
    error_count INTEGER DEFAULT 0
);

-- Commands: one row per recorded invocation
CREATE TABLE IF NOT EXISTS commands (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT REFERENCES sessions(id),
    timestamp TEXT NOT NULL,
    command TEXT NOT NULL,
    cwd TEXT NOT NULL,
    exit_code INTEGER,
    output TEXT,
    error_output TEXT,
    duration_ms INTEGER,
    platform TEXT,
    shell TEXT,
    user TEXT,
    hostname TEXT,
    tags TEXT,
    notes TEXT
);

-- File changes: append-only deltas attributed to a command
CREATE TABLE IF NOT EXISTS file_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    command_id INTEGER NOT NULL REFERENCES commands(id),
    file_path TEXT NOT NULL,
    change_type TEXT NOT NULL,
    old_hash TEXT,
    new_hash TEXT,
    old_size INTEGER,
    new_size INTEGER,
    backup_path TEXT,
    warning TEXT,
    created_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_commands_session ON commands(session_id);
CREATE INDEX IF NOT EXISTS idx_commands_timestamp ON commands(timestamp);
CREATE INDEX IF NOT EXISTS idx_file_changes_command ON file_changes(command_id);
CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);

-- Migration tracking table
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT,
    execution_time_ms INTEGER
);

-- Store-level metadata
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const SESSION_COLUMNS: &str = "id, name, description, agent_name, started_at, ended_at, cwd_start, \
     command_count, success_count, error_count";

const COMMAND_COLUMNS: &str = "id, session_id, timestamp, command, cwd, exit_code, output, \
     error_output, duration_ms, platform, shell, user, hostname, tags, notes";

const FILE_CHANGE_COLUMNS: &str = "id, command_id, file_path, change_type, old_hash, new_hash, \
     old_size, new_size, backup_path, warning, created_at";

type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Attributes of a session about to be opened.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub name: Option<String>,
    pub agent_name: Option<String>,
    pub description: Option<String>,
    pub cwd_start: Option<String>,
}

impl NewSession {
    pub fn named(name: impl Into<String>) -> Self {
        NewSession {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// SQLite-backed event store for sessions, commands and file changes.
///
/// Cloning is cheap; clones share one connection pool. Writes run in
/// `BEGIN IMMEDIATE` transactions so only one writer holds the lock, and a
/// busy database is retried with bounded backoff before surfacing as a
/// store error.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    pool: Arc<Pool<SqliteConnectionManager>>,
    retry: RetryConfig,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl Store {
    /// Open (creating if needed) the store at `db_path`.
    pub fn open(db_path: &Path, settings: &DatabaseConfig, retry: RetryConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RewindError::store(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let busy_timeout_ms = settings.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(settings.max_connections.max(1))
            .build(manager)
            .map_err(|e| RewindError::store(format!("Failed to create connection pool: {}", e)))?;

        let mut conn = pool.get()?;
        initialize_schema(&mut conn)?;
        assign_store_id(&conn, db_path)?;
        drop(conn);

        debug!("Opened store at {}", db_path.display());

        Ok(Self {
            path: db_path.to_path_buf(),
            pool: Arc::new(pool),
            retry,
        })
    }

    /// Open the store described by a full configuration.
    pub fn open_with_config(config: &Config) -> Result<Self> {
        Self::open(
            &config.database_path(),
            &config.database,
            RetryConfig::from(&config.retry.db_ops),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn get_connection(&self) -> Result<DbConnection> {
        retry_if_retryable(&self.retry, || Ok(self.pool.get()?))
    }

    /// Run `op` inside an immediate transaction, retrying while the store is busy.
    fn write<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&Transaction) -> Result<T>,
    {
        retry_if_retryable(&self.retry, || {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = op(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .map_err(|e| {
            if is_retryable_error(&e) {
                RewindError::store(format!(
                    "store still busy after {} attempts: {}",
                    self.retry.max_attempts, e
                ))
            } else {
                e
            }
        })
    }

    /// Open a new session, closing any session still active.
    ///
    /// At most one session is active per store; the previous one is
    /// finalized in the same transaction.
    pub fn insert_session(&self, session: &NewSession) -> Result<String> {
        let id = self.write(|tx| {
            let active: Vec<String> = {
                let mut stmt = tx.prepare("SELECT id FROM sessions WHERE ended_at IS NULL")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                ids
            };
            for previous in &active {
                info!("Closing session {} before starting a new one", previous);
                finalize_session_tx(tx, previous)?;
            }

            let base = make_session_id(session.name.as_deref());
            let mut id = base.clone();
            let mut suffix = 1;
            while session_exists_tx(tx, &id)? {
                suffix += 1;
                id = format!("{}-{}", base, suffix);
            }

            tx.execute(
                "INSERT INTO sessions (id, name, description, agent_name, started_at, cwd_start)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    session.name,
                    session.description,
                    session.agent_name,
                    current_timestamp(),
                    session.cwd_start,
                ],
            )?;
            Ok(id)
        })?;

        info!("Started session {}", id);
        Ok(id)
    }

    /// Set `ended_at` and freeze the session's counters.
    ///
    /// Closing an already closed session is a no-op.
    pub fn close_session(&self, session_id: &str) -> Result<()> {
        self.write(|tx| {
            let ended_at: Option<Option<String>> = tx
                .query_row(
                    "SELECT ended_at FROM sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;

            match ended_at {
                None => Err(RewindError::not_found(format!("session {}", session_id))),
                Some(Some(_)) => Ok(()),
                Some(None) => finalize_session_tx(tx, session_id),
            }
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.get_connection()?;
        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// Most recently started sessions first
    pub fn get_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map(params![limit as i64], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// The session with no `ended_at`, if any
    pub fn active_session(&self) -> Result<Option<Session>> {
        let conn = self.get_connection()?;
        let session = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE ended_at IS NULL
                     ORDER BY started_at DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                [],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// Insert a command and update the owning session's counters.
    pub fn insert_command(&self, session_id: Option<&str>, command: &NewCommand) -> Result<i64> {
        let tags = if command.tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&command.tags)?)
        };

        self.write(|tx| {
            if let Some(sid) = session_id {
                let ended_at: Option<Option<String>> = tx
                    .query_row(
                        "SELECT ended_at FROM sessions WHERE id = ?1",
                        params![sid],
                        |row| row.get(0),
                    )
                    .optional()?;
                match ended_at {
                    None => return Err(RewindError::not_found(format!("session {}", sid))),
                    Some(Some(_)) => {
                        return Err(RewindError::store(format!(
                            "session {} is closed; its counts are frozen",
                            sid
                        )))
                    }
                    Some(None) => {}
                }
            }

            tx.execute(
                "INSERT INTO commands (
                    session_id, timestamp, command, cwd, exit_code, output, error_output,
                    duration_ms, platform, shell, user, hostname, tags, notes
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    session_id,
                    current_timestamp(),
                    command.command,
                    command.cwd,
                    command.exit_code,
                    command.output,
                    command.error_output,
                    command.duration_ms.map(|d| d as i64),
                    command.environment.platform,
                    command.environment.shell,
                    command.environment.user,
                    command.environment.hostname,
                    tags,
                    command.notes,
                ],
            )?;
            let command_id = tx.last_insert_rowid();

            if let Some(sid) = session_id {
                tx.execute(
                    "UPDATE sessions SET
                        command_count = command_count + 1,
                        success_count = success_count + CASE WHEN ?1 = 0 THEN 1 ELSE 0 END,
                        error_count = error_count + CASE WHEN ?1 IS NOT NULL AND ?1 != 0 THEN 1 ELSE 0 END
                     WHERE id = ?2",
                    params![command.exit_code, sid],
                )?;
            }

            Ok(command_id)
        })
    }

    /// Fill in the result of a command logged before it finished.
    pub fn complete_command(
        &self,
        command_id: i64,
        exit_code: i32,
        output: Option<&str>,
        error_output: Option<&str>,
        duration_ms: Option<u64>,
    ) -> Result<()> {
        self.write(|tx| {
            let existing: Option<(Option<i32>, Option<String>)> = tx
                .query_row(
                    "SELECT exit_code, session_id FROM commands WHERE id = ?1",
                    params![command_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let (previous, session_id) = match existing {
                None => return Err(RewindError::not_found(format!("command {}", command_id))),
                Some(row) => row,
            };
            if previous.is_some() {
                return Err(RewindError::invalid_input(format!(
                    "command {} already has a result",
                    command_id
                )));
            }

            tx.execute(
                "UPDATE commands SET exit_code = ?1, output = ?2, error_output = ?3, duration_ms = ?4
                 WHERE id = ?5",
                params![
                    exit_code,
                    output,
                    error_output,
                    duration_ms.map(|d| d as i64),
                    command_id
                ],
            )?;

            if let Some(sid) = session_id {
                tx.execute(
                    "UPDATE sessions SET
                        success_count = success_count + CASE WHEN ?1 = 0 THEN 1 ELSE 0 END,
                        error_count = error_count + CASE WHEN ?1 != 0 THEN 1 ELSE 0 END
                     WHERE id = ?2 AND ended_at IS NULL",
                    params![exit_code, sid],
                )?;
            }
            Ok(())
        })
    }

    /// Insert one file change; the command must already exist.
    pub fn insert_file_change(&self, command_id: i64, change: &NewFileChange) -> Result<i64> {
        let ids = self.insert_file_changes(command_id, std::slice::from_ref(change))?;
        Ok(ids[0])
    }

    /// Insert a batch of file changes for one command in a single transaction.
    pub fn insert_file_changes(
        &self,
        command_id: i64,
        changes: &[NewFileChange],
    ) -> Result<Vec<i64>> {
        for change in changes {
            change.validate()?;
        }

        self.write(|tx| {
            if !command_exists_tx(tx, command_id)? {
                return Err(RewindError::not_found(format!("command {}", command_id)));
            }

            let now = current_timestamp();
            let mut ids = Vec::with_capacity(changes.len());
            for change in changes {
                tx.execute(
                    "INSERT INTO file_changes (
                        command_id, file_path, change_type, old_hash, new_hash,
                        old_size, new_size, backup_path, warning, created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        command_id,
                        change.file_path.to_string_lossy(),
                        change.change_type.as_str(),
                        change.old_hash,
                        change.new_hash,
                        change.old_size.map(|s| s as i64),
                        change.new_size.map(|s| s as i64),
                        change.backup_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                        change.warning,
                        now,
                    ],
                )?;
                ids.push(tx.last_insert_rowid());
            }
            Ok(ids)
        })
    }

    /// File changes of one command in insertion order
    pub fn get_file_changes(&self, command_id: i64) -> Result<Vec<FileChange>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM file_changes WHERE command_id = ?1 ORDER BY id",
            FILE_CHANGE_COLUMNS
        ))?;
        let changes = stmt
            .query_map(params![command_id], file_change_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(changes)
    }

    pub fn get_command(&self, command_id: i64) -> Result<Option<Command>> {
        let conn = self.get_connection()?;
        let command = conn
            .query_row(
                &format!("SELECT {} FROM commands WHERE id = ?1", COMMAND_COLUMNS),
                params![command_id],
                command_from_row,
            )
            .optional()?;
        Ok(command)
    }

    pub fn last_command(&self) -> Result<Option<Command>> {
        let conn = self.get_connection()?;
        let command = conn
            .query_row(
                &format!(
                    "SELECT {} FROM commands ORDER BY timestamp DESC, id DESC LIMIT 1",
                    COMMAND_COLUMNS
                ),
                [],
                command_from_row,
            )
            .optional()?;
        Ok(command)
    }

    /// Newest command with at least one file change among the last `window` commands.
    pub fn last_command_with_changes(&self, window: usize) -> Result<Option<Command>> {
        let conn = self.get_connection()?;
        let command = conn
            .query_row(
                &format!(
                    "SELECT {cols} FROM (
                        SELECT {cols} FROM commands ORDER BY timestamp DESC, id DESC LIMIT ?1
                     ) AS recent
                     WHERE EXISTS (SELECT 1 FROM file_changes f WHERE f.command_id = recent.id)
                     ORDER BY timestamp DESC, id DESC LIMIT 1",
                    cols = COMMAND_COLUMNS
                ),
                params![window as i64],
                command_from_row,
            )
            .optional()?;
        Ok(command)
    }

    /// Commands matching `filter`, most recent first.
    pub fn get_commands(&self, filter: &CommandFilter) -> Result<Vec<Command>> {
        let mut sql = format!("SELECT {} FROM commands WHERE 1=1", COMMAND_COLUMNS);
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(session_id) = &filter.session_id {
            values.push(Box::new(session_id.clone()));
            sql.push_str(&format!(" AND session_id = ?{}", values.len()));
        }
        if let Some(since) = &filter.since {
            values.push(Box::new(format_timestamp(since)));
            sql.push_str(&format!(" AND timestamp >= ?{}", values.len()));
        }
        if filter.errors_only {
            sql.push_str(" AND exit_code IS NOT NULL AND exit_code != 0");
        }
        if let Some(text) = &filter.text {
            values.push(Box::new(text.clone()));
            let n = values.len();
            sql.push_str(&format!(
                " AND (instr(command, ?{n}) > 0 OR instr(COALESCE(output, ''), ?{n}) > 0)"
            ));
        }
        values.push(Box::new(filter.limit as i64));
        sql.push_str(&format!(
            " ORDER BY timestamp DESC, id DESC LIMIT ?{}",
            values.len()
        ));

        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let commands = stmt
            .query_map(params.as_slice(), command_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(commands)
    }

    /// Aggregate counts computed from current rows.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.get_connection()?;
        let (total, successful, failed): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN exit_code = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN exit_code IS NOT NULL AND exit_code != 0 THEN 1 ELSE 0 END), 0)
             FROM commands",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let sessions: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let file_changes: i64 =
            conn.query_row("SELECT COUNT(*) FROM file_changes", [], |row| row.get(0))?;

        Ok(StoreStats {
            total_commands: total as u64,
            successful_commands: successful as u64,
            failed_commands: failed as u64,
            total_sessions: sessions as u64,
            total_file_changes: file_changes as u64,
            database_path: self.path.clone(),
            storage_bytes: self.storage_bytes(),
        })
    }

    /// Bytes on disk for the database file and its WAL.
    fn storage_bytes(&self) -> u64 {
        let mut wal = self.path.clone().into_os_string();
        wal.push("-wal");
        [self.path.clone(), PathBuf::from(wal)]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Identifier minted when the store was created.
    ///
    /// Stores sharing one backup directory keep their backups apart under
    /// this id, since command ids restart at 1 in every store.
    pub fn store_id(&self) -> Result<String> {
        let conn = self.get_connection()?;
        let id: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'store_id'", [], |row| {
                row.get(0)
            })
            .optional()?;
        id.ok_or_else(|| RewindError::store("store has no id in its meta table"))
    }

    /// Current schema version recorded in `schema_migrations`.
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.get_connection()?;
        Ok(migrations::current_version(&conn)?)
    }

    /// Run SQLite's integrity check; anything but "ok" is a store error.
    pub fn check_integrity(&self) -> Result<()> {
        let conn = self.get_connection()?;
        let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if result == "ok" {
            Ok(())
        } else {
            Err(RewindError::store(format!("schema inconsistency: {}", result)))
        }
    }
}

/// Create the full schema on a fresh database, or migrate an existing one.
fn initialize_schema(conn: &mut Connection) -> Result<()> {
    let has_commands_table: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='commands'",
        [],
        |row| {
            let count: i64 = row.get(0)?;
            Ok(count > 0)
        },
    )?;

    if !has_commands_table {
        let tx = conn.transaction()?;
        tx.execute_batch(SCHEMA)?;
        if migrations::current_version(&tx)? < LATEST_VERSION {
            migrations::record_migration(&tx, LATEST_VERSION, "New store with complete schema", 0)?;
        }
        tx.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('created_at', ?1)",
            params![current_timestamp()],
        )?;
        tx.commit()?;
        return Ok(());
    }

    let mut runner = MigrationRunner::new(conn)?;
    let applied = runner
        .migrate()
        .map_err(|e| RewindError::store(format!("schema migration failed: {}", e)))?;
    if applied > 0 {
        info!("Upgraded store schema ({} migrations applied)", applied);
    }
    Ok(())
}

/// Give the store an id the first time it is opened. Existing ids stay.
fn assign_store_id(conn: &Connection, db_path: &Path) -> Result<()> {
    let seed = format!(
        "{}:{}:{}",
        db_path.display(),
        current_timestamp(),
        std::process::id()
    );
    let id = hash_bytes(seed.as_bytes())[..STORE_ID_CHARS].to_string();
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('store_id', ?1)",
        params![id],
    )?;
    Ok(())
}

fn session_exists_tx(tx: &Transaction, session_id: &str) -> Result<bool> {
    let exists = tx
        .query_row(
            "SELECT 1 FROM sessions WHERE id = ?1",
            params![session_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

fn command_exists_tx(tx: &Transaction, command_id: i64) -> Result<bool> {
    let exists = tx
        .query_row(
            "SELECT 1 FROM commands WHERE id = ?1",
            params![command_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

/// Recompute counters from the session's commands and set `ended_at`.
fn finalize_session_tx(tx: &Transaction, session_id: &str) -> Result<()> {
    tx.execute(
        "UPDATE sessions SET
            ended_at = ?1,
            command_count = (SELECT COUNT(*) FROM commands WHERE session_id = ?2),
            success_count = (SELECT COUNT(*) FROM commands WHERE session_id = ?2 AND exit_code = 0),
            error_count = (SELECT COUNT(*) FROM commands
                           WHERE session_id = ?2 AND exit_code IS NOT NULL AND exit_code != 0)
         WHERE id = ?2",
        params![current_timestamp(), session_id],
    )?;
    info!("Closed session {}", session_id);
    Ok(())
}

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        agent_name: row.get(3)?,
        started_at: row.get(4)?,
        ended_at: row.get(5)?,
        cwd_start: row.get(6)?,
        command_count: row.get::<_, Option<i64>>(7)?.unwrap_or(0) as u32,
        success_count: row.get::<_, Option<i64>>(8)?.unwrap_or(0) as u32,
        error_count: row.get::<_, Option<i64>>(9)?.unwrap_or(0) as u32,
    })
}

fn command_from_row(row: &Row) -> rusqlite::Result<Command> {
    let tags: Option<String> = row.get(13)?;
    let tags = match tags {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?,
        None => Vec::new(),
    };

    Ok(Command {
        id: row.get(0)?,
        session_id: row.get(1)?,
        timestamp: row.get(2)?,
        command: row.get(3)?,
        cwd: row.get(4)?,
        exit_code: row.get(5)?,
        output: row.get(6)?,
        error_output: row.get(7)?,
        duration_ms: row.get::<_, Option<i64>>(8)?.map(|d| d as u64),
        platform: row.get(9)?,
        shell: row.get(10)?,
        user: row.get(11)?,
        hostname: row.get(12)?,
        tags,
        notes: row.get(14)?,
    })
}

fn file_change_from_row(row: &Row) -> rusqlite::Result<FileChange> {
    let change_type: String = row.get(3)?;
    let change_type = change_type
        .parse::<ChangeType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(FileChange {
        id: row.get(0)?,
        command_id: row.get(1)?,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        change_type,
        old_hash: row.get(4)?,
        new_hash: row.get(5)?,
        old_size: row.get::<_, Option<i64>>(6)?.map(|s| s as u64),
        new_size: row.get::<_, Option<i64>>(7)?.map(|s| s as u64),
        backup_path: row.get::<_, Option<String>>(8)?.map(PathBuf::from),
        warning: row.get(9)?,
        created_at: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
    })
}
