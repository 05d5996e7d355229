//! DevBoard integration events (projects, boards, task items).
//!
//! Event type names are persisted in the outbox; treat them as a wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devboard_core::{BoardId, EventId, ProjectId, TaskItemId, TenantId, UserId};

use crate::event::IntegrationEvent;

/// Metadata every integration event carries (flattened into the payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: TenantId,
}

impl EventMetadata {
    /// Fresh metadata for an event happening now.
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            event_id: EventId::new(),
            occurred_at: Utc::now(),
            tenant_id,
        }
    }
}

macro_rules! integration_event {
    ($t:ty, $name:literal) => {
        impl IntegrationEvent for $t {
            const EVENT_TYPE: &'static str = $name;

            fn event_id(&self) -> EventId {
                self.meta.event_id
            }

            fn tenant_id(&self) -> TenantId {
                self.meta.tenant_id
            }

            fn occurred_at(&self) -> DateTime<Utc> {
                self.meta.occurred_at
            }
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreated {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub project_id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdated {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub project_id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDeleted {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMemberAdded {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub role: String,
}

integration_event!(ProjectCreated, "project.created");
integration_event!(ProjectUpdated, "project.updated");
integration_event!(ProjectDeleted, "project.deleted");
integration_event!(ProjectMemberAdded, "project.member_added");

// ─────────────────────────────────────────────────────────────────────────────
// Boards
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardCreated {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub board_id: BoardId,
    pub project_id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardUpdated {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub board_id: BoardId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardDeleted {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub board_id: BoardId,
}

integration_event!(BoardCreated, "board.created");
integration_event!(BoardUpdated, "board.updated");
integration_event!(BoardDeleted, "board.deleted");

// ─────────────────────────────────────────────────────────────────────────────
// Task items
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItemCreated {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub task_item_id: TaskItemId,
    pub board_id: BoardId,
    pub title: String,
    #[serde(default)]
    pub assigned_to_user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItemUpdated {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub task_item_id: TaskItemId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItemDeleted {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub task_item_id: TaskItemId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItemStatusChanged {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub task_item_id: TaskItemId,
    pub old_status: String,
    pub new_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItemAssigned {
    #[serde(flatten)]
    pub meta: EventMetadata,
    pub task_item_id: TaskItemId,
    pub assigned_to_user_id: UserId,
    pub assigned_by_user_id: UserId,
}

integration_event!(TaskItemCreated, "task_item.created");
integration_event!(TaskItemUpdated, "task_item.updated");
integration_event!(TaskItemDeleted, "task_item.deleted");
integration_event!(TaskItemStatusChanged, "task_item.status_changed");
integration_event!(TaskItemAssigned, "task_item.assigned");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_flattened_into_the_payload() {
        let tenant_id = TenantId::new();
        let event = TaskItemCreated {
            meta: EventMetadata::new(tenant_id),
            task_item_id: TaskItemId::new(),
            board_id: BoardId::new(),
            title: "Write release notes".to_string(),
            assigned_to_user_id: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["tenantId"], serde_json::json!(tenant_id.to_string()));
        assert_eq!(json["title"], "Write release notes");
        assert!(json.get("meta").is_none());

        let back: TaskItemCreated = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.tenant_id(), tenant_id);
    }

    #[test]
    fn missing_assignee_defaults_to_none() {
        let meta = EventMetadata::new(TenantId::new());
        let json = serde_json::json!({
            "eventId": meta.event_id,
            "occurredAt": meta.occurred_at,
            "tenantId": meta.tenant_id,
            "taskItemId": TaskItemId::new(),
            "boardId": BoardId::new(),
            "title": "t",
        });
        let event: TaskItemCreated = serde_json::from_value(json).unwrap();
        assert!(event.assigned_to_user_id.is_none());
    }

    #[test]
    fn event_type_names_are_unique() {
        let names = [
            ProjectCreated::EVENT_TYPE,
            ProjectUpdated::EVENT_TYPE,
            ProjectDeleted::EVENT_TYPE,
            ProjectMemberAdded::EVENT_TYPE,
            BoardCreated::EVENT_TYPE,
            BoardUpdated::EVENT_TYPE,
            BoardDeleted::EVENT_TYPE,
            TaskItemCreated::EVENT_TYPE,
            TaskItemUpdated::EVENT_TYPE,
            TaskItemDeleted::EVENT_TYPE,
            TaskItemStatusChanged::EVENT_TYPE,
            TaskItemAssigned::EVENT_TYPE,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
