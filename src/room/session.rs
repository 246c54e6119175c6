//! A room's session: the in-memory history, the attached peers and the store
//! behind them, driven by a single task so every event for a room is handled
//! one at a time.

use log::{ debug, error, info, warn };
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{ mpsc, oneshot };
use uuid::Uuid;

use crate::models::chat::ChatMessage;
use crate::models::websocket::WireMessage;
use crate::room::{ RoomError, RoomId };
use crate::store::{ MessageStore, StoreError };

pub type PeerId = Uuid;

/// Text frames queued for one peer's socket writer.
pub type Outbound = mpsc::UnboundedSender<String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
}

pub struct RoomSession {
    room: RoomId,
    state: SessionState,
    messages: Vec<ChatMessage>,
    peers: HashMap<PeerId, Outbound>,
    store: Arc<dyn MessageStore>,
}

impl RoomSession {
    pub fn new(room: RoomId, store: Arc<dyn MessageStore>) -> Self {
        Self {
            room,
            state: SessionState::Uninitialized,
            messages: Vec::new(),
            peers: HashMap::new(),
            store,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Migrates the store and loads the full history into memory.
    pub async fn start(&mut self) -> Result<(), StoreError> {
        self.state = SessionState::Loading;

        let applied = self.store.migrate().await?;
        if applied > 0 {
            info!("Room {}: applied {} schema migration(s)", self.room, applied);
        }
        self.messages = self.store.load_all().await?;

        self.state = SessionState::Ready;
        info!("Room {} ready with {} message(s)", self.room, self.messages.len());
        Ok(())
    }

    pub fn snapshot(&self) -> WireMessage {
        WireMessage::All {
            messages: self.messages.clone(),
        }
    }

    /// Sends the history snapshot to the new peer only, then attaches it for
    /// fan-out. The snapshot is queued ahead of any later broadcast.
    pub fn connect(&mut self, peer: PeerId, outbound: Outbound) {
        let json = match serde_json::to_string(&self.snapshot()) {
            Ok(json) => json,
            Err(e) => {
                error!("Room {}: failed to serialize snapshot: {}", self.room, e);
                return;
            }
        };
        if outbound.send(json).is_err() {
            warn!("Room {}: peer {} left before the snapshot was sent", self.room, peer);
            return;
        }
        self.peers.insert(peer, outbound);
        info!("Room {}: peer {} connected ({} attached)", self.room, peer, self.peers.len());
    }

    pub fn disconnect(&mut self, peer: PeerId) {
        if self.peers.remove(&peer).is_some() {
            info!("Room {}: peer {} disconnected ({} attached)", self.room, peer, self.peers.len());
        }
    }

    /// Relays the raw event to every other peer, then applies it to the
    /// history. Events that do not parse are still relayed.
    pub async fn receive(&mut self, peer: PeerId, raw: &str) {
        self.broadcast(raw, Some(peer));

        let parsed = match serde_json::from_str::<WireMessage>(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Room {}: ignoring malformed event from {}: {}", self.room, peer, e);
                return;
            }
        };

        match parsed {
            WireMessage::Add(payload) | WireMessage::Update(payload) => {
                let message = payload.into_chat_message();
                let id = message.id.clone();
                if let Err(e) = self.save_message(message).await {
                    error!("Room {}: failed to persist message {}: {}", self.room, id, e);
                }
            }
            WireMessage::All { .. } => {
                debug!("Room {}: ignoring snapshot sent by {}", self.room, peer);
            }
            WireMessage::Unknown => {
                debug!("Room {}: ignoring unknown event type from {}", self.room, peer);
            }
        }
    }

    /// Sends `raw` to every attached peer except `exclude`. Peers whose socket
    /// writer has gone away are dropped.
    pub fn broadcast(&mut self, raw: &str, exclude: Option<PeerId>) {
        let room = &self.room;
        self.peers.retain(|id, outbound| {
            if Some(*id) == exclude {
                return true;
            }
            if outbound.send(raw.to_string()).is_err() {
                debug!("Room {}: dropping closed peer {}", room, id);
                return false;
            }
            true
        });
    }

    /// Upserts into the store first and only then into memory, so a failed
    /// write leaves both sides unchanged. An existing id keeps its position.
    pub async fn save_message(&mut self, message: ChatMessage) -> Result<(), StoreError> {
        for problem in message.validate() {
            warn!("Room {}: message {} is malformed: {}", self.room, message.id, problem);
        }

        self.store.upsert(&message).await?;

        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                *existing = message;
            }
            None => self.messages.push(message),
        }
        Ok(())
    }
}

pub enum RoomCommand {
    Connect {
        peer: PeerId,
        outbound: Outbound,
    },
    Disconnect {
        peer: PeerId,
    },
    Receive {
        peer: PeerId,
        raw: String,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
}

/// Mailbox of a running room task.
#[derive(Clone)]
pub struct RoomHandle {
    room: RoomId,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.tx.send(command).map_err(|_| RoomError::Closed(self.room.clone()))
    }

    pub fn connect(&self, peer: PeerId, outbound: Outbound) -> Result<(), RoomError> {
        self.send(RoomCommand::Connect { peer, outbound })
    }

    pub fn disconnect(&self, peer: PeerId) -> Result<(), RoomError> {
        self.send(RoomCommand::Disconnect { peer })
    }

    pub fn receive(&self, peer: PeerId, raw: String) -> Result<(), RoomError> {
        self.send(RoomCommand::Receive { peer, raw })
    }

    pub async fn snapshot(&self) -> Result<Vec<ChatMessage>, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Snapshot { reply })?;
        rx.await.map_err(|_| RoomError::Closed(self.room.clone()))
    }
}

pub fn spawn(room: RoomId, store: Arc<dyn MessageStore>) -> RoomHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = RoomSession::new(room.clone(), store);
    tokio::spawn(run(session, rx));
    RoomHandle { room, tx }
}

async fn run(mut session: RoomSession, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
    if let Err(e) = session.start().await {
        error!("Room {} failed to start: {}", session.room, e);
        return;
    }

    while let Some(command) = rx.recv().await {
        match command {
            RoomCommand::Connect { peer, outbound } => session.connect(peer, outbound),
            RoomCommand::Disconnect { peer } => session.disconnect(peer),
            RoomCommand::Receive { peer, raw } => session.receive(peer, &raw).await,
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(session.messages.clone());
            }
        }
    }
    debug!("Room {} mailbox closed", session.room);
}
