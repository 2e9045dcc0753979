//! Feedback bridge: binds the simulation driver's step events to fitness
//! computation, durable metrics records, and real-time fan-out.
//!
//! The driver owns the clock; this side only reacts. Events arrive as typed
//! messages over a channel, and per-event work is isolated: a store or
//! broadcast failure is logged and never crosses back into the tick loop.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::auth::Topic;
use crate::population::Agent;
use crate::realtime::{Hub, MetricsPayload, PushMessage};
use crate::store::{MetricsRecord, MetricsSink};
use crate::task::{task_fitness, TaskContext, TaskType};

/// Measured readings from one simulation step. Any field may be absent; an
/// absent reading means "no data", never zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
}

/// Last-known metrics per `(agentId, taskType)`. Last write wins, no
/// versioning; entries live until process restart.
#[derive(Debug, Default)]
pub struct FeedbackCache {
    entries: HashMap<(String, TaskType), SimulationMetrics>,
}

impl FeedbackCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, agent_id: &str, task_type: TaskType, metrics: SimulationMetrics) {
        self.entries.insert((agent_id.to_string(), task_type), metrics);
    }

    /// Point lookup. `None` means "no metrics yet" and callers must fall back
    /// to static weights.
    pub fn read(&self, agent_id: &str, task_type: TaskType) -> Option<&SimulationMetrics> {
        self.entries.get(&(agent_id.to_string(), task_type))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A completed task step from the simulation driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub agent_id: String,
    pub task: TaskContext,
    pub generation: u32,
    pub agent: Agent,
    pub metrics: SimulationMetrics,
}

/// A driver tick. Only `done = true` ticks carry an actionable result;
/// progress-only ticks are ignored by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPayload {
    pub agent_id: String,
    pub task: TaskContext,
    pub generation: u32,
    pub agent: Agent,
    pub metrics: SimulationMetrics,
    pub done: bool,
}

/// Typed messages from the simulation driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimulationEvent {
    Tick(TickPayload),
    TaskCompleted(TaskCompletion),
}

/// Consumes driver events; owns the feedback cache and the metrics sink.
pub struct FeedbackBridge {
    cache: FeedbackCache,
    store: Box<dyn MetricsSink>,
}

impl FeedbackBridge {
    pub fn new(store: Box<dyn MetricsSink>) -> Self {
        Self {
            cache: FeedbackCache::new(),
            store,
        }
    }

    pub fn cache(&self) -> &FeedbackCache {
        &self.cache
    }

    pub fn record_simulation_feedback(
        &mut self,
        agent_id: &str,
        task_type: TaskType,
        metrics: SimulationMetrics,
    ) {
        self.cache.record(agent_id, task_type, metrics);
    }

    pub fn read_simulation_feedback(
        &self,
        agent_id: &str,
        task_type: TaskType,
    ) -> Option<&SimulationMetrics> {
        self.cache.read(agent_id, task_type)
    }

    /// Full completion path: cache upsert, fitness, durable record, push.
    /// The store append and the broadcast are independent best-effort steps;
    /// either failing leaves the other untouched. Returns the fitness.
    pub fn handle_task_completed(&mut self, hub: &mut Hub, event: TaskCompletion) -> f64 {
        self.cache
            .record(&event.agent_id, event.task.task_type, event.metrics);

        let complexity = event.task.constraints.complexity;
        let fitness = task_fitness(&event.agent, &event.task, complexity, Some(&event.metrics));

        let lifted = event.agent.lifted();
        let record = MetricsRecord {
            agent_id: event.agent_id.clone(),
            task_type: event.task.task_type,
            generation: event.generation,
            speed: lifted.speed,
            accuracy: lifted.accuracy,
            efficiency: lifted.efficiency,
            fitness,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.append(&record) {
            warn!(
                agent_id = %event.agent_id,
                task_type = %event.task.task_type,
                error = %e,
                "metrics append failed, record dropped"
            );
        }

        let topic = Topic::AgentMetrics(event.agent_id.clone());
        let message = PushMessage::Metrics(MetricsPayload {
            agent_id: event.agent_id.clone(),
            task_type: event.task.task_type,
            generation: event.generation,
            metrics: event.metrics,
            fitness,
        });
        let delivered = hub.broadcast(&topic, &message);

        info!(
            agent_id = %event.agent_id,
            task_type = %event.task.task_type,
            generation = event.generation,
            fitness = fitness,
            delivered = delivered,
            "task completion processed"
        );
        fitness
    }

    /// Tick gate: `done = false` is a progress-only no-op.
    pub fn on_simulation_tick(&mut self, hub: &mut Hub, payload: TickPayload) -> Option<f64> {
        if !payload.done {
            debug!(agent_id = %payload.agent_id, "progress tick ignored");
            return None;
        }
        Some(self.handle_task_completed(
            hub,
            TaskCompletion {
                agent_id: payload.agent_id,
                task: payload.task,
                generation: payload.generation,
                agent: payload.agent,
                metrics: payload.metrics,
            },
        ))
    }
}
