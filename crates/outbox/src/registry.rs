//! Event type registry: maps a persisted `event_type` to its deserializer.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use devboard_events::catalog::{
    BoardCreated, BoardDeleted, BoardUpdated, ProjectCreated, ProjectDeleted, ProjectMemberAdded,
    ProjectUpdated, TaskItemAssigned, TaskItemCreated, TaskItemDeleted, TaskItemStatusChanged,
    TaskItemUpdated,
};
use devboard_events::{EventEnvelope, IntegrationEvent};

type DecodeFn = fn(&str) -> Result<EventEnvelope<JsonValue>, serde_json::Error>;

/// Why a stored payload could not be turned into an envelope.
///
/// Both variants are terminal for the record.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Could not resolve type: {0}")]
    UnknownType(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

fn decode_as<E: IntegrationEvent>(payload: &str) -> Result<EventEnvelope<JsonValue>, serde_json::Error> {
    let event: E = serde_json::from_str(payload)?;
    EventEnvelope::from_event(&event)
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every DevBoard integration event.
    pub fn devboard() -> Self {
        Self::new()
            .with::<ProjectCreated>()
            .with::<ProjectUpdated>()
            .with::<ProjectDeleted>()
            .with::<ProjectMemberAdded>()
            .with::<BoardCreated>()
            .with::<BoardUpdated>()
            .with::<BoardDeleted>()
            .with::<TaskItemCreated>()
            .with::<TaskItemUpdated>()
            .with::<TaskItemDeleted>()
            .with::<TaskItemStatusChanged>()
            .with::<TaskItemAssigned>()
    }

    pub fn with<E: IntegrationEvent>(mut self) -> Self {
        self.register::<E>();
        self
    }

    pub fn register<E: IntegrationEvent>(&mut self) {
        self.decoders.insert(E::EVENT_TYPE, decode_as::<E>);
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    /// Validate `payload` against the registered schema and build the
    /// broker-facing envelope.
    pub fn decode(&self, event_type: &str, payload: &str) -> Result<EventEnvelope<JsonValue>, DecodeError> {
        let decode = self
            .decoders
            .get(event_type)
            .ok_or_else(|| DecodeError::UnknownType(event_type.to_string()))?;
        Ok(decode(payload)?)
    }
}
