use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::chat::ChatMessage;
use crate::store::{ MessageStore, StoreError };

/// Keeps rows for the lifetime of the process. Nothing to migrate.
#[derive(Default)]
pub struct MemoryMessageStore {
    rows: Mutex<Vec<ChatMessage>>,
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn migrate(&self) -> Result<u32, StoreError> {
        Ok(0)
    }

    async fn load_all(&self) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self.rows.lock().await.clone())
    }

    async fn upsert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        match rows.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => rows.push(message.clone()),
        }
        Ok(())
    }
}
