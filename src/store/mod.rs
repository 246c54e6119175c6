pub mod memory;
pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::cli::Args;
use crate::models::chat::ChatMessage;
use crate::room::RoomId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("migration v{version} failed: {message}")]
    Migration {
        version: u32,
        message: String,
    },
    #[error("fileSize {0} does not fit in the store")]
    FileSizeOutOfRange(u64),
    #[error("unsupported store type: {0}")]
    Unsupported(String),
}

/// Durable per-room message table keyed by message id.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Brings the schema up to date. Returns the number of migrations applied.
    async fn migrate(&self) -> Result<u32, StoreError>;

    /// All rows, oldest first by insertion.
    async fn load_all(&self) -> Result<Vec<ChatMessage>, StoreError>;

    /// Inserts the message, or replaces every column but `id` if it exists.
    /// An existing row keeps its original position.
    async fn upsert(&self, message: &ChatMessage) -> Result<(), StoreError>;
}

pub enum StoreBackend {
    Sqlite {
        data_dir: PathBuf,
    },
    Memory {
        rooms: Mutex<HashMap<RoomId, Arc<memory::MemoryMessageStore>>>,
    },
}

impl StoreBackend {
    pub fn sqlite(data_dir: impl Into<PathBuf>) -> Self {
        StoreBackend::Sqlite { data_dir: data_dir.into() }
    }

    pub fn memory() -> Self {
        StoreBackend::Memory { rooms: Mutex::new(HashMap::new()) }
    }

    pub fn from_args(args: &Args) -> Result<Self, StoreError> {
        match args.store_type.to_lowercase().as_str() {
            "sqlite" => {
                info!("Room history will be stored in SQLite files under: {}", args.data_dir);
                Ok(Self::sqlite(&args.data_dir))
            }
            "memory" => {
                info!("Room history will be kept in memory only");
                Ok(Self::memory())
            }
            other => Err(StoreError::Unsupported(other.to_string())),
        }
    }

    /// Opens the store that backs a single room.
    pub async fn open(&self, room: &RoomId) -> Result<Arc<dyn MessageStore>, StoreError> {
        match self {
            StoreBackend::Sqlite { data_dir } => {
                let data_dir = data_dir.clone();
                let path = data_dir.join(format!("{}.sqlite3", room));
                let store = tokio::task::spawn_blocking(move || {
                    std::fs::create_dir_all(&data_dir)?;
                    sqlite::SqliteMessageStore::open(&path)
                }).await??;
                Ok(Arc::new(store))
            }
            StoreBackend::Memory { rooms } => {
                let mut rooms = rooms.lock().await;
                let store: Arc<dyn MessageStore> = rooms.entry(room.clone()).or_default().clone();
                Ok(store)
            }
        }
    }
}
