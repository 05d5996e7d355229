//! DevBoard integration event consumers.
//!
//! Every handler is wrapped in [`IdempotentHandler`]: the outbox delivers
//! at-least-once, so the same event id can arrive more than once.

use std::sync::{Arc, Mutex};

use tracing::info;

use devboard_core::{TenantId, UserId};
use devboard_events::catalog::{
    BoardCreated, BoardDeleted, BoardUpdated, ProjectCreated, ProjectDeleted, ProjectMemberAdded,
    ProjectUpdated, TaskItemAssigned, TaskItemCreated, TaskItemDeleted, TaskItemStatusChanged,
    TaskItemUpdated,
};
use devboard_events::{ConsumerRunner, HandlerError, IdempotentHandler, IntegrationEvent, TypedHandler};

/// User-facing notification channel (email, push, in-app...).
pub trait Notifier: Send + Sync {
    fn notify(&self, tenant_id: TenantId, user_id: UserId, message: &str) -> Result<(), HandlerError>;
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, tenant_id: TenantId, user_id: UserId, message: &str) -> Result<(), HandlerError> {
        info!(tenant_id = %tenant_id, user_id = %user_id, message, "notification sent");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub message: String,
}

/// Records notifications in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, tenant_id: TenantId, user_id: UserId, message: &str) -> Result<(), HandlerError> {
        self.sent
            .lock()
            .map_err(|_| HandlerError::transient("notification log poisoned"))?
            .push(Notification {
                tenant_id,
                user_id,
                message: message.to_string(),
            });
        Ok(())
    }
}

fn register<E, F>(runner: &mut ConsumerRunner, f: F)
where
    E: IntegrationEvent,
    F: Fn(&E) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    runner.register(E::EVENT_TYPE, IdempotentHandler::new(TypedHandler::new(f)));
}

/// Register the handler for every DevBoard event type.
pub fn register_devboard_handlers(runner: &mut ConsumerRunner, notifier: Arc<dyn Notifier>) {
    register::<ProjectCreated, _>(runner, |e| {
        info!(tenant_id = %e.meta.tenant_id, project_id = %e.project_id, name = %e.name, "project created");
        Ok(())
    });
    register::<ProjectUpdated, _>(runner, |e| {
        info!(tenant_id = %e.meta.tenant_id, project_id = %e.project_id, name = %e.name, "project updated");
        Ok(())
    });
    register::<ProjectDeleted, _>(runner, |e| {
        info!(tenant_id = %e.meta.tenant_id, project_id = %e.project_id, "project deleted; cleaning up dependents");
        Ok(())
    });

    let n = notifier.clone();
    register::<ProjectMemberAdded, _>(runner, move |e| {
        info!(tenant_id = %e.meta.tenant_id, project_id = %e.project_id, user_id = %e.user_id, role = %e.role, "project member added");
        n.notify(
            e.meta.tenant_id,
            e.user_id,
            &format!("You were added to project {} as {}", e.project_id, e.role),
        )
    });

    register::<BoardCreated, _>(runner, |e| {
        info!(tenant_id = %e.meta.tenant_id, board_id = %e.board_id, project_id = %e.project_id, name = %e.name, "board created");
        Ok(())
    });
    register::<BoardUpdated, _>(runner, |e| {
        info!(tenant_id = %e.meta.tenant_id, board_id = %e.board_id, name = %e.name, "board updated");
        Ok(())
    });
    register::<BoardDeleted, _>(runner, |e| {
        info!(tenant_id = %e.meta.tenant_id, board_id = %e.board_id, "board deleted; cleaning up task items");
        Ok(())
    });

    let n = notifier.clone();
    register::<TaskItemCreated, _>(runner, move |e| {
        info!(tenant_id = %e.meta.tenant_id, task_item_id = %e.task_item_id, board_id = %e.board_id, title = %e.title, "task item created");
        match e.assigned_to_user_id {
            Some(user_id) => n.notify(e.meta.tenant_id, user_id, &format!("New task assigned to you: {}", e.title)),
            None => Ok(()),
        }
    });
    register::<TaskItemUpdated, _>(runner, |e| {
        info!(tenant_id = %e.meta.tenant_id, task_item_id = %e.task_item_id, title = %e.title, "task item updated");
        Ok(())
    });
    register::<TaskItemDeleted, _>(runner, |e| {
        info!(tenant_id = %e.meta.tenant_id, task_item_id = %e.task_item_id, "task item deleted; cleaning up comments and attachments");
        Ok(())
    });
    register::<TaskItemStatusChanged, _>(runner, |e| {
        info!(
            tenant_id = %e.meta.tenant_id,
            task_item_id = %e.task_item_id,
            old_status = %e.old_status,
            new_status = %e.new_status,
            "task item status changed"
        );
        Ok(())
    });

    let n = notifier;
    register::<TaskItemAssigned, _>(runner, move |e| {
        info!(
            tenant_id = %e.meta.tenant_id,
            task_item_id = %e.task_item_id,
            assigned_to = %e.assigned_to_user_id,
            assigned_by = %e.assigned_by_user_id,
            "task item assigned"
        );
        n.notify(
            e.meta.tenant_id,
            e.assigned_to_user_id,
            &format!("Task {} was assigned to you", e.task_item_id),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use devboard_core::{BoardId, TaskItemId};
    use devboard_events::catalog::EventMetadata;
    use devboard_events::{DeliveryOutcome, EventEnvelope, InMemoryDeadLetterSink, RedeliveryPolicy};

    fn runner(notifier: Arc<InMemoryNotifier>) -> ConsumerRunner {
        let mut runner = ConsumerRunner::new(RedeliveryPolicy::immediate(3), Arc::new(InMemoryDeadLetterSink::new()));
        register_devboard_handlers(&mut runner, notifier);
        runner
    }

    #[test]
    fn every_event_type_has_a_handler() {
        let runner = runner(Arc::new(InMemoryNotifier::new()));
        for event_type in [
            "project.created",
            "project.updated",
            "project.deleted",
            "project.member_added",
            "board.created",
            "board.updated",
            "board.deleted",
            "task_item.created",
            "task_item.updated",
            "task_item.deleted",
            "task_item.status_changed",
            "task_item.assigned",
        ] {
            assert!(runner.handles(event_type), "{event_type}");
        }
    }

    #[test]
    fn assignee_is_notified_once_per_event() {
        let notifier = Arc::new(InMemoryNotifier::new());
        let runner = runner(notifier.clone());

        let assignee = UserId::new();
        let event = TaskItemCreated {
            meta: EventMetadata::new(TenantId::new()),
            task_item_id: TaskItemId::new(),
            board_id: BoardId::new(),
            title: "Fix login redirect".to_string(),
            assigned_to_user_id: Some(assignee),
        };
        let envelope = EventEnvelope::from_event(&event).unwrap();

        assert_eq!(runner.deliver(&envelope), DeliveryOutcome::Handled { attempts: 1 });
        assert_eq!(runner.deliver(&envelope), DeliveryOutcome::Handled { attempts: 1 });

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, assignee);
        assert!(sent[0].message.contains("Fix login redirect"));
    }

    #[test]
    fn unassigned_task_sends_no_notification() {
        let notifier = Arc::new(InMemoryNotifier::new());
        let runner = runner(notifier.clone());
        let event = TaskItemCreated {
            meta: EventMetadata::new(TenantId::new()),
            task_item_id: TaskItemId::new(),
            board_id: BoardId::new(),
            title: "Backlog grooming".to_string(),
            assigned_to_user_id: None,
        };

        runner.deliver(&EventEnvelope::from_event(&event).unwrap());
        assert!(notifier.sent().is_empty());
    }
}
