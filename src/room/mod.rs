pub mod session;

use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::Mutex;
use url::form_urlencoded;
use uuid::Uuid;

use crate::store::{ StoreBackend, StoreError };
pub use session::{ Outbound, PeerId, RoomHandle, RoomSession, SessionState };

const MAX_ROOM_ID_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomIdError {
    #[error("room id is empty")]
    Empty,
    #[error("room id is longer than 128 characters")]
    TooLong,
    #[error("room id contains invalid character {0:?}")]
    InvalidChar(char),
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room {0} is no longer running")]
    Closed(RoomId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Name of an isolated chat channel, taken from the connection URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(s: &str) -> Result<Self, RoomIdError> {
        if s.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if s.len() > MAX_ROOM_ID_LEN {
            return Err(RoomIdError::TooLong);
        }
        if let Some(c) = s.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
            return Err(RoomIdError::InvalidChar(c));
        }
        Ok(RoomId(s.to_string()))
    }

    pub fn generate() -> Self {
        RoomId(Uuid::new_v4().simple().to_string())
    }

    /// The last non-empty path segment names the room, so `/room1` and
    /// `/parties/chat/room1` are the same room. Falls back to a `room` query
    /// parameter. `None` means the client did not ask for one.
    pub fn from_request(path: &str, query: Option<&str>) -> Result<Option<Self>, RoomIdError> {
        if let Some(segment) = path.split('/').filter(|s| !s.is_empty()).last() {
            return Self::parse(segment).map(Some);
        }

        let requested = query.and_then(|q| {
            form_urlencoded
                ::parse(q.as_bytes())
                .find(|(k, _)| k == "room")
                .map(|(_, v)| v.into_owned())
        });
        match requested {
            Some(room) if !room.is_empty() => Self::parse(&room).map(Some),
            _ => Ok(None),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live room actors, started on first join.
pub struct RoomRegistry {
    backend: StoreBackend,
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
}

impl RoomRegistry {
    pub fn new(backend: StoreBackend) -> Self {
        Self {
            backend,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Opening a room's store happens outside the registry lock, so a slow
    /// disk only delays joins to that room.
    pub async fn join(&self, room: &RoomId) -> Result<RoomHandle, RoomError> {
        if let Some(handle) = self.live(room).await {
            return Ok(handle);
        }

        let store = self.backend.open(room).await?;

        let mut rooms = self.rooms.lock().await;
        match rooms.get(room) {
            // another join won the race while the store was opening
            Some(handle) if !handle.is_closed() => Ok(handle.clone()),
            previous => {
                if previous.is_some() {
                    info!("Room {} session is gone, starting a new one", room);
                }
                let handle = session::spawn(room.clone(), store);
                rooms.insert(room.clone(), handle.clone());
                Ok(handle)
            }
        }
    }

    async fn live(&self, room: &RoomId) -> Option<RoomHandle> {
        let rooms = self.rooms.lock().await;
        rooms
            .get(room)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    pub async fn active_rooms(&self) -> Vec<RoomId> {
        let rooms = self.rooms.lock().await;
        let mut active: Vec<RoomId> = rooms
            .iter()
            .filter(|(_, handle)| !handle.is_closed())
            .map(|(room, _)| room.clone())
            .collect();
        active.sort();
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;
    use tokio::sync::mpsc;

    #[test]
    fn room_from_last_path_segment() {
        let room = RoomId::from_request("/parties/chat/lobby", None).unwrap();
        assert_eq!(room.unwrap().as_str(), "lobby");
        let room = RoomId::from_request("/lobby/", None).unwrap();
        assert_eq!(room.unwrap().as_str(), "lobby");
    }

    #[test]
    fn room_from_query_when_path_is_empty() {
        let room = RoomId::from_request("/", Some("room=abc-1&x=y")).unwrap();
        assert_eq!(room.unwrap().as_str(), "abc-1");
        assert_eq!(RoomId::from_request("/", None).unwrap(), None);
        assert_eq!(RoomId::from_request("", Some("room=")).unwrap(), None);
    }

    #[test]
    fn invalid_room_ids_are_rejected() {
        assert_eq!(RoomId::parse(""), Err(RoomIdError::Empty));
        assert_eq!(RoomId::parse("a b"), Err(RoomIdError::InvalidChar(' ')));
        assert_eq!(RoomId::parse(&"x".repeat(129)), Err(RoomIdError::TooLong));
        assert!(RoomId::from_request("/rooms/a.b", None).is_err());
    }

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = RoomId::generate();
        let b = RoomId::generate();
        assert_ne!(a, b);
        assert!(RoomId::parse(a.as_str()).is_ok());
    }

    #[tokio::test]
    async fn rooms_do_not_share_history() {
        let registry = RoomRegistry::new(StoreBackend::memory());
        let red = registry.join(&RoomId::parse("red").unwrap()).await.unwrap();
        let blue = registry.join(&RoomId::parse("blue").unwrap()).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = PeerId::new_v4();
        red.connect(peer, tx).unwrap();
        red.receive(
            peer,
            r#"{"type":"add","id":"m1","content":"hi","user":"Alice","role":"user"}"#.to_string()
        ).unwrap();

        let red_history = red.snapshot().await.unwrap();
        assert_eq!(red_history.len(), 1);
        assert_eq!(red_history[0].role, Role::User);
        assert!(blue.snapshot().await.unwrap().is_empty());

        let active: Vec<String> = registry
            .active_rooms().await
            .into_iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(active, vec!["blue", "red"]);
    }

    #[tokio::test]
    async fn joining_twice_returns_the_same_room() {
        let registry = RoomRegistry::new(StoreBackend::memory());
        let room = RoomId::parse("lobby").unwrap();
        let first = registry.join(&room).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = PeerId::new_v4();
        first.connect(peer, tx).unwrap();
        first.receive(
            peer,
            r#"{"type":"add","id":"m1","content":"hi","user":"Alice","role":"user"}"#.to_string()
        ).unwrap();

        let second = registry.join(&room).await.unwrap();
        assert_eq!(second.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_joins_share_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RoomRegistry::new(StoreBackend::sqlite(dir.path().join("rooms")));
        let room = RoomId::parse("busy").unwrap();

        let (first, second) = tokio::join!(registry.join(&room), registry.join(&room));
        let (first, second) = (first.unwrap(), second.unwrap());

        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = PeerId::new_v4();
        first.connect(peer, tx).unwrap();
        first.receive(
            peer,
            r#"{"type":"add","id":"m1","content":"hi","user":"Alice","role":"user"}"#.to_string()
        ).unwrap();
        first.snapshot().await.unwrap();

        assert_eq!(second.snapshot().await.unwrap().len(), 1);
        assert_eq!(registry.active_rooms().await, vec![room]);
        assert!(dir.path().join("rooms").join("busy.sqlite3").exists());
    }
}
