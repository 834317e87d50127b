//! Analytics event envelope and payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::engine::Color;
use crate::session::types::{EndReason, SessionId};

/// Variant-specific payload. Tagged as `eventType` on the wire and flattened
/// into the envelope alongside the common fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "snake_case")]
pub enum GameEventData {
    GameStarted {
        player1: String,
        player2: String,
    },
    MoveMade {
        column: u8,
        row: u8,
        color: Color,
        sequence: u32,
    },
    GameCompleted {
        winner: Option<String>,
        reason: EndReason,
    },
    PlayerJoined,
    PlayerLeft,
    PlayerReconnected,
}

impl GameEventData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            GameEventData::GameStarted { .. } => "game_started",
            GameEventData::MoveMade { .. } => "move_made",
            GameEventData::GameCompleted { .. } => "game_completed",
            GameEventData::PlayerJoined => "player_joined",
            GameEventData::PlayerLeft => "player_left",
            GameEventData::PlayerReconnected => "player_reconnected",
        }
    }
}

/// One analytics record. `metadata` is a free-form bag for fields that
/// don't warrant a dedicated struct field (client version, room code, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: Uuid,
    pub game_id: SessionId,
    pub player_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: JsonMap<String, JsonValue>,
    #[serde(flatten)]
    pub data: GameEventData,
}

impl GameEvent {
    pub fn new(game_id: SessionId, player_id: Option<String>, timestamp: DateTime<Utc>, data: GameEventData) -> Self {
        Self {
            id: Uuid::new_v4(),
            game_id,
            player_id,
            timestamp,
            metadata: JsonMap::new(),
            data,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_matches_wire_tag() {
        let event = GameEventData::MoveMade {
            column: 3,
            row: 0,
            color: Color::Red,
            sequence: 1,
        };
        assert_eq!(event.kind_name(), "move_made");
    }

    #[test]
    fn metadata_builder_accumulates() {
        let event = GameEvent::new(SessionId::new(), None, Utc::now(), GameEventData::PlayerJoined)
            .with_metadata("client_version", "1.2.0")
            .with_metadata("room_code", "AB12");
        assert_eq!(event.metadata.len(), 2);
    }
}
