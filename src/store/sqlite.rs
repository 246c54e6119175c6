use async_trait::async_trait;
use log::{ debug, warn };
use rusqlite::{ params, Connection, Row };
use std::path::Path;
use std::sync::{ Arc, Mutex };

use crate::models::chat::{ ChatMessage, MessageKind, Role };
use crate::store::{ migrations, MessageStore, StoreError };

const SELECT_ALL: &str =
    "SELECT id, user, role, content, type, fileName, fileSize, fileType, fileData
     FROM messages ORDER BY rowid";

const UPSERT: &str =
    "INSERT INTO messages (id, user, role, content, type, fileName, fileSize, fileType, fileData)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
     ON CONFLICT (id) DO UPDATE SET
        user = excluded.user,
        role = excluded.role,
        content = excluded.content,
        type = excluded.type,
        fileName = excluded.fileName,
        fileSize = excluded.fileSize,
        fileType = excluded.fileType,
        fileData = excluded.fileData";

/// One SQLite database per room. rusqlite is blocking, so every call hops onto
/// the blocking pool with a shared handle to the connection.
pub struct SqliteMessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMessageStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        debug!("Opening room database {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self { conn: Arc::new(Mutex::new(conn)) }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
        where T: Send + 'static, F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&*guard)
        }).await?
    }
}

/// Unknown `role`/`type` values fall back to `user`/`text`. Older deployments
/// stored the envelope tag (`add`, `update`) in the `type` column.
fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id: String = row.get(0)?;
    let role = match row.get::<_, Option<String>>(2)? {
        Some(raw) =>
            raw.parse::<Role>().unwrap_or_else(|e| {
                warn!("Message {}: {}, reading it as 'user'", id, e);
                Role::User
            }),
        None => Role::User,
    };
    let kind = match row.get::<_, Option<String>>(4)? {
        Some(raw) =>
            raw.parse::<MessageKind>().unwrap_or_else(|e| {
                warn!("Message {}: {}, reading it as 'text'", id, e);
                MessageKind::Text
            }),
        None => MessageKind::Text,
    };
    let file_size = row.get::<_, Option<i64>>(6)?.and_then(|s| {
        let size = u64::try_from(s).ok();
        if size.is_none() {
            warn!("Message {}: ignoring negative fileSize {}", id, s);
        }
        size
    });

    Ok(ChatMessage {
        user: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        role,
        content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        kind,
        file_name: row.get(5)?,
        file_size,
        file_type: row.get(7)?,
        file_data: row.get(8)?,
        id,
    })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn migrate(&self) -> Result<u32, StoreError> {
        self.with_conn(migrations::run_migrations).await
    }

    async fn load_all(&self) -> Result<Vec<ChatMessage>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(SELECT_ALL)?;
            let rows = stmt.query_map([], row_to_message)?.collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        }).await
    }

    async fn upsert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let message = message.clone();
        let file_size = message.file_size
            .map(|s| i64::try_from(s).map_err(|_| StoreError::FileSizeOutOfRange(s)))
            .transpose()?;
        self.with_conn(move |conn| {
            conn.execute(
                UPSERT,
                params![
                    message.id,
                    message.user,
                    message.role,
                    message.content,
                    message.kind,
                    message.file_name,
                    file_size,
                    message.file_type,
                    message.file_data
                ]
            )?;
            Ok(())
        }).await
    }
}

#[cfg(test)]
impl SqliteMessageStore {
    pub async fn get(&self, id: &str) -> Result<Option<ChatMessage>, StoreError> {
        use rusqlite::OptionalExtension;

        let id = id.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT id, user, role, content, type, fileName, fileSize, fileType, fileData
                     FROM messages WHERE id = ?1",
                    params![id],
                    row_to_message
                )
                .optional()?;
            Ok(found)
        }).await
    }
}
