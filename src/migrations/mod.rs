use chrono::Local;
use log::info;
use rusqlite::{params, Connection, Result, Transaction};

/// Highest schema version known to this build.
pub const LATEST_VERSION: u32 = 3;

/// Migration trait for database schema changes
pub trait Migration {
    /// Unique version number (must be sequential)
    fn version(&self) -> u32;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Apply the migration
    fn up(&self, tx: &Transaction) -> Result<()>;
}

/// Applies pending migrations to an open connection.
pub struct MigrationRunner<'a> {
    conn: &'a mut Connection,
    migrations: Vec<Box<dyn Migration>>,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(conn: &'a mut Connection) -> Result<Self> {
        ensure_migrations_table(conn)?;
        Ok(Self {
            conn,
            migrations: load_all_migrations(),
        })
    }

    /// Get current schema version
    pub fn current_version(&self) -> Result<u32> {
        current_version(&*self.conn)
    }

    /// Run all pending migrations, each in its own transaction.
    ///
    /// Returns the number of migrations applied.
    pub fn migrate(&mut self) -> Result<usize> {
        let current = self.current_version()?;
        let mut applied = 0;

        for migration in self.migrations.iter().filter(|m| m.version() > current) {
            let start = std::time::Instant::now();
            let tx = self.conn.transaction()?;

            migration.up(&tx)?;
            record_migration(
                &tx,
                migration.version(),
                migration.description(),
                start.elapsed().as_millis() as i64,
            )?;

            tx.commit()?;
            info!(
                "Applied schema migration v{}: {}",
                migration.version(),
                migration.description()
            );
            applied += 1;
        }

        Ok(applied)
    }
}

fn load_all_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateCoreTables),
        Box::new(AddMetaTable),
        Box::new(AddRecordDetails),
    ]
}

pub(crate) fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            description TEXT,
            execution_time_ms INTEGER
        )",
        [],
    )?;
    Ok(())
}

pub(crate) fn current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn.query_row(
        "SELECT MAX(version) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

pub(crate) fn record_migration(
    conn: &Connection,
    version: u32,
    description: &str,
    execution_time_ms: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description, execution_time_ms)
         VALUES (?1, ?2, ?3, ?4)",
        params![version, Local::now().to_rfc3339(), description, execution_time_ms],
    )?;
    Ok(())
}

fn has_column(tx: &Transaction, table: &str, column: &str) -> Result<bool> {
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>>>()?;
    Ok(columns.iter().any(|c| c == column))
}

fn add_column_if_missing(tx: &Transaction, table: &str, column: &str, decl: &str) -> Result<()> {
    if !has_column(tx, table, column)? {
        tx.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
            [],
        )?;
    }
    Ok(())
}

/// Migration 001: sessions, commands and file_changes
pub struct CreateCoreTables;

impl Migration for CreateCoreTables {
    fn version(&self) -> u32 {
        1
    }

    fn description(&self) -> &str {
        "Create sessions, commands and file_changes tables"
    }

    fn up(&self, tx: &Transaction) -> Result<()> {
        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                name TEXT,
                agent_name TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                command_count INTEGER DEFAULT 0,
                success_count INTEGER DEFAULT 0,
                error_count INTEGER DEFAULT 0
            );
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
                hostname TEXT
            );
            CREATE TABLE IF NOT EXISTS file_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command_id INTEGER NOT NULL REFERENCES commands(id),
                file_path TEXT NOT NULL,
                change_type TEXT NOT NULL,
                old_hash TEXT,
                new_hash TEXT,
                backup_path TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_commands_session ON commands(session_id);
            CREATE INDEX IF NOT EXISTS idx_commands_timestamp ON commands(timestamp);
            CREATE INDEX IF NOT EXISTS idx_file_changes_command ON file_changes(command_id);
            "#,
        )
    }
}

/// Migration 002: meta table for store-level metadata
pub struct AddMetaTable;

impl Migration for AddMetaTable {
    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &str {
        "Add meta table for store metadata"
    }

    fn up(&self, tx: &Transaction) -> Result<()> {
        tx.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        tx.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('created_at', ?1)",
            params![Local::now().to_rfc3339()],
        )?;

        Ok(())
    }
}

/// Migration 003: tags, notes, sizes and per-file warnings
pub struct AddRecordDetails;

impl Migration for AddRecordDetails {
    fn version(&self) -> u32 {
        3
    }

    fn description(&self) -> &str {
        "Add command tags/notes, session description, file sizes and warnings"
    }

    fn up(&self, tx: &Transaction) -> Result<()> {
        add_column_if_missing(tx, "sessions", "description", "TEXT")?;
        add_column_if_missing(tx, "sessions", "cwd_start", "TEXT")?;
        add_column_if_missing(tx, "commands", "tags", "TEXT")?;
        add_column_if_missing(tx, "commands", "notes", "TEXT")?;
        add_column_if_missing(tx, "file_changes", "old_size", "INTEGER")?;
        add_column_if_missing(tx, "file_changes", "new_size", "INTEGER")?;
        add_column_if_missing(tx, "file_changes", "warning", "TEXT")?;
        add_column_if_missing(tx, "file_changes", "created_at", "TEXT")?;
        tx.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at)",
            [],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_migration_runner_from_empty() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();

        let mut runner = MigrationRunner::new(&mut conn).unwrap();
        assert_eq!(runner.current_version().unwrap(), 0);

        assert_eq!(runner.migrate().unwrap(), LATEST_VERSION as usize);
        assert_eq!(runner.current_version().unwrap(), LATEST_VERSION);

        // Second run is a no-op
        assert_eq!(runner.migrate().unwrap(), 0);
    }

    #[test]
    fn test_record_details_tolerates_existing_columns() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();

        // A store written by an older tool that already carried size columns
        conn.execute_batch(
            "CREATE TABLE file_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command_id INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                change_type TEXT NOT NULL,
                old_hash TEXT,
                new_hash TEXT,
                old_size INTEGER,
                new_size INTEGER,
                backup_path TEXT
            );",
        )
        .unwrap();

        let mut runner = MigrationRunner::new(&mut conn).unwrap();
        runner.migrate().unwrap();

        let tx = conn.transaction().unwrap();
        assert!(has_column(&tx, "file_changes", "warning").unwrap());
        assert!(has_column(&tx, "file_changes", "old_size").unwrap());
        assert!(has_column(&tx, "commands", "tags").unwrap());
    }
}
