//! Versioned schema migrations for a room's `messages` table.
//!
//! The applied version lives in SQLite's `PRAGMA user_version`. Each step runs
//! in its own transaction and only adds what is missing, so tables written by
//! older deployments without a version marker migrate cleanly.

use log::{ debug, info };
use rusqlite::Connection;

use crate::store::StoreError;

struct Migration {
    version: u32,
    description: &'static str,
    apply: fn(&Connection) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "messages table",
        apply: create_messages_table,
    },
    Migration {
        version: 2,
        description: "file attachment columns",
        apply: add_file_columns,
    },
];

const FILE_COLUMNS: &[(&str, &str)] = &[
    ("type", "TEXT DEFAULT 'text'"),
    ("fileName", "TEXT"),
    ("fileSize", "INTEGER"),
    ("fileType", "TEXT"),
    ("fileData", "TEXT"),
];

fn create_messages_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            user TEXT,
            role TEXT,
            content TEXT
        )"
    )
}

fn add_file_columns(conn: &Connection) -> rusqlite::Result<()> {
    let existing = table_columns(conn, "messages")?;
    for (name, decl) in FILE_COLUMNS {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        conn.execute_batch(&format!("ALTER TABLE messages ADD COLUMN {} {}", name, decl))?;
    }
    Ok(())
}

pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt.query_map([], |row| row.get::<_, String>(1))?.collect();
    columns
}

pub fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

#[cfg(test)]
fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Applies every migration newer than the recorded version.
pub fn run_migrations(conn: &Connection) -> Result<u32, StoreError> {
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!("Schema v{} ({}) already applied", migration.version, migration.description);
            continue;
        }

        info!("Applying schema v{} ({})", migration.version, migration.description);
        apply(conn, migration).map_err(|e| StoreError::Migration {
            version: migration.version,
            message: e.to_string(),
        })?;
        applied += 1;
    }

    Ok(applied)
}

fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    (migration.apply)(&tx)?;
    tx.execute_batch(&format!("PRAGMA user_version = {}", migration.version))?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_table(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE messages (id TEXT PRIMARY KEY, user TEXT, role TEXT, content TEXT);
             INSERT INTO messages (id, user, role, content) VALUES ('m1', 'Alice', 'user', 'hi');"
        ).unwrap();
    }

    #[test]
    fn fresh_database_gets_full_schema() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 2);
        assert_eq!(current_version(&conn).unwrap(), latest_version());

        let columns = table_columns(&conn, "messages").unwrap();
        assert_eq!(
            columns,
            vec!["id", "user", "role", "content", "type", "fileName", "fileSize", "fileType", "fileData"]
        );
    }

    #[test]
    fn legacy_table_gains_file_columns_and_keeps_rows() {
        let conn = Connection::open_in_memory().unwrap();
        legacy_table(&conn);

        run_migrations(&conn).unwrap();

        let (content, kind): (String, String) = conn
            .query_row("SELECT content, type FROM messages WHERE id = 'm1'", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(content, "hi");
        assert_eq!(kind, "text");
    }

    #[test]
    fn unversioned_table_with_file_columns_migrates() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE messages (
                id TEXT PRIMARY KEY, user TEXT, role TEXT, content TEXT,
                type TEXT DEFAULT 'text', fileName TEXT, fileSize INTEGER, fileType TEXT, fileData TEXT
            )"
        ).unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), 2);
        assert_eq!(table_columns(&conn, "messages").unwrap().len(), 9);
    }

    #[test]
    fn running_twice_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        legacy_table(&conn);

        run_migrations(&conn).unwrap();
        let before = table_columns(&conn, "messages").unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 0);
        assert_eq!(table_columns(&conn, "messages").unwrap(), before);

        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0)).unwrap();
        assert_eq!(rows, 1);
    }
}
