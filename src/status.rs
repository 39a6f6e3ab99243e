//! Process-wide status surface and notification bus.

use serde::Serialize;
use tokio::sync::{broadcast, watch};

pub const FRIENDLY_NAME: &str = "Hotword";
pub const ICON: &str = "mdi:microphone";

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Value of the published status key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerStatus {
    Idle,
    Listening,
}

impl ListenerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerStatus::Idle => "idle",
            ListenerStatus::Listening => "listening",
        }
    }
}

/// Display metadata passed through to observers untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusAttributes {
    pub friendly_name: &'static str,
    pub icon: &'static str,
}

impl Default for StatusAttributes {
    fn default() -> Self {
        Self {
            friendly_name: FRIENDLY_NAME,
            icon: ICON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: ListenerStatus,
    pub attributes: StatusAttributes,
}

/// Fire-and-forget notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum HotwordEvent {
    /// The configured phrase was heard. `name` is the listener's logical name.
    HotwordDetected { name: String },
}

/// Holds the current status and fans out state changes and events.
pub struct StatusBoard {
    state_tx: watch::Sender<EntityState>,
    event_tx: broadcast::Sender<HotwordEvent>,
}

impl StatusBoard {
    /// Starts out `idle`.
    pub fn new(entity_id: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(EntityState {
            entity_id: entity_id.into(),
            state: ListenerStatus::Idle,
            attributes: StatusAttributes::default(),
        });
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { state_tx, event_tx }
    }

    pub fn set(&self, status: ListenerStatus) {
        self.state_tx.send_modify(|entity| entity.state = status);
        log::debug!("{} -> {}", self.state_tx.borrow().entity_id, status.as_str());
    }

    pub fn current(&self) -> ListenerStatus {
        self.state_tx.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<EntityState> {
        self.state_tx.subscribe()
    }

    pub fn fire(&self, event: HotwordEvent) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HotwordEvent> {
        self.event_tx.subscribe()
    }
}
