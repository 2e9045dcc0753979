//! Live constraints registry: a mutable, observable task-constraint table.
//!
//! Process-lifetime only, no persistence. The registry is owned by a single
//! writer (the engine) and handed to dependents by reference, so last-write-
//! wins semantics hold without extra locking.

use std::collections::HashMap;

use tracing::info;

use crate::task::{TaskConstraints, TaskType};

pub type ListenerId = u64;

type Listener = Box<dyn Fn(TaskType, &TaskConstraints) + Send>;

#[derive(Default)]
pub struct ConstraintsRegistry {
    table: HashMap<TaskType, TaskConstraints>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: ListenerId,
}

impl ConstraintsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_type: TaskType) -> Option<TaskConstraints> {
        self.table.get(&task_type).copied()
    }

    /// Replace the constraints for a task type. Registered listeners are
    /// invoked synchronously, so an operator edit is observable before the
    /// next generation resolves its tasks.
    pub fn set(&mut self, task_type: TaskType, constraints: TaskConstraints) {
        info!(
            task_type = %task_type,
            complexity = constraints.complexity,
            "constraints updated"
        );
        self.table.insert(task_type, constraints);
        for (_, listener) in &self.listeners {
            listener(task_type, &constraints);
        }
    }

    pub fn subscribe(
        &mut self,
        listener: impl Fn(TaskType, &TaskConstraints) + Send + 'static,
    ) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if the id was already gone.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }
}
