//! Engine composition root: owns the population, task contexts, constraints
//! registry, feedback bridge, and hub, and runs the fixed-period generation
//! loop.
//!
//! The simulation driver is an external collaborator. Its events arrive over
//! a typed channel and the engine only reacts to them; it never drives the
//! driver's clock.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::constraints::ConstraintsRegistry;
use crate::feedback::{FeedbackBridge, SimulationEvent};
use crate::orchestrator::evolve_across_tasks;
use crate::population::{Agent, EvolutionOptions};
use crate::realtime::Hub;
use crate::store::{JsonlMetricsStore, MetricsSink, MetricsWriter};
use crate::task::{TaskContext, TaskError};

pub struct EvolutionEngine {
    options: EvolutionOptions,
    generation_interval: Duration,
    population: Vec<Agent>,
    agent_ids: Vec<String>,
    tasks: Vec<TaskContext>,
    generation: u32,
    registry: ConstraintsRegistry,
    bridge: FeedbackBridge,
    hub: Hub,
    rng: StdRng,
}

impl EvolutionEngine {
    /// Build an engine from configuration, seeding the initial population.
    /// The JSONL store runs behind a writer thread, so a slow disk never
    /// stalls the generation loop.
    pub fn from_config(config: &Config) -> Result<Self, TaskError> {
        let store = JsonlMetricsStore::new(config.store.path.clone());
        Self::new(config, Box::new(MetricsWriter::spawn(Box::new(store))))
    }

    pub fn new(config: &Config, store: Box<dyn MetricsSink>) -> Result<Self, TaskError> {
        let tasks = config
            .tasks
            .iter()
            .map(|t| t.to_context())
            .collect::<Result<Vec<_>, _>>()?;

        let mut rng = StdRng::from_entropy();
        let population = seed_population(
            config.engine.population_size,
            config.engine.multi_objective,
            &mut rng,
        );
        let agent_ids = (0..population.len()).map(|i| format!("agent{}", i)).collect();

        Ok(Self {
            options: config.evolution_options(),
            generation_interval: Duration::from_millis(config.engine.generation_interval_ms),
            population,
            agent_ids,
            tasks,
            generation: 0,
            registry: ConstraintsRegistry::new(),
            bridge: FeedbackBridge::new(store),
            hub: Hub::new(config.realtime.jwt_secret.as_bytes()),
            rng,
        })
    }

    pub fn population(&self) -> &[Agent] {
        &self.population
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn registry_mut(&mut self) -> &mut ConstraintsRegistry {
        &mut self.registry
    }

    pub fn hub_mut(&mut self) -> &mut Hub {
        &mut self.hub
    }

    pub fn bridge(&self) -> &FeedbackBridge {
        &self.bridge
    }

    /// Route one driver event through the feedback bridge.
    pub fn handle_event(&mut self, event: SimulationEvent) {
        match event {
            SimulationEvent::Tick(payload) => {
                self.bridge.on_simulation_tick(&mut self.hub, payload);
            }
            SimulationEvent::TaskCompleted(completion) => {
                self.bridge.handle_task_completed(&mut self.hub, completion);
            }
        }
    }

    /// Advance the shared population by one generation across all tasks.
    pub fn advance_generation(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        self.population = evolve_across_tasks(
            &self.population,
            &self.tasks,
            self.generation,
            &self.options,
            &self.registry,
            self.bridge.cache(),
            Some(&self.agent_ids),
            &mut self.rng,
        );
        self.generation += 1;
        info!(
            generation = self.generation,
            population = self.population.len(),
            tasks = self.tasks.len(),
            "generation advanced"
        );
    }

    /// Main loop: drain driver events as they arrive and advance one
    /// generation per scheduler period. Returns when the driver channel
    /// closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<SimulationEvent>) {
        info!(
            interval_ms = self.generation_interval.as_millis() as u64,
            "engine ready, entering generation loop"
        );
        let mut interval = tokio::time::interval(self.generation_interval);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            error!("driver channel closed, stopping engine");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.advance_generation();
                }
            }
        }
    }
}

/// Forward newline-delimited JSON driver events from a reader into the
/// engine's event channel. Malformed lines are logged and skipped. Returns
/// when the reader ends or the engine side hangs up.
pub async fn pump_driver_events<R>(reader: R, tx: mpsc::Sender<SimulationEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<SimulationEvent>(trimmed) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "ignoring malformed driver event"),
        }
    }
}

/// Build an initial population jittered around unit traits.
pub fn seed_population(size: usize, multi_objective: bool, rng: &mut impl Rng) -> Vec<Agent> {
    (0..size)
        .map(|_| {
            let speed = rng.gen_range(0.8..=1.2);
            let accuracy = rng.gen_range(0.8..=1.2);
            if multi_objective {
                Agent::multi_objective(speed, accuracy, rng.gen_range(0.8..=1.2))
            } else {
                Agent::simple(speed, accuracy)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{SimulationMetrics, TaskCompletion, TickPayload};
    use crate::store::{MetricsRecord, MockMetricsSink, StoreError};
    use crate::task::{TaskConstraints, TaskType};

    fn config() -> Config {
        let mut config = Config::default_local("engine-test-secret".to_string());
        config.engine.population_size = 8;
        config
    }

    fn engine_with_mock(expected_appends: usize) -> EvolutionEngine {
        let mut sink = MockMetricsSink::new();
        sink.expect_append().times(expected_appends).returning(|_| Ok(()));
        EvolutionEngine::new(&config(), Box::new(sink)).unwrap()
    }

    #[test]
    fn test_seed_population_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let multi = seed_population(5, true, &mut rng);
        assert_eq!(multi.len(), 5);
        assert!(multi.iter().all(|a| a.is_multi_objective()));

        let simple = seed_population(5, false, &mut rng);
        assert!(simple.iter().all(|a| !a.is_multi_objective()));
    }

    #[test]
    fn test_advance_generation_keeps_size_across_many_generations() {
        let mut engine = engine_with_mock(0);
        let size = engine.population().len();
        for _ in 0..25 {
            engine.advance_generation();
            assert_eq!(engine.population().len(), size);
        }
        assert_eq!(engine.generation(), 25);
    }

    #[test]
    fn test_completion_event_updates_cache() {
        let mut engine = engine_with_mock(1);
        engine.handle_event(SimulationEvent::TaskCompleted(TaskCompletion {
            agent_id: "agent0".to_string(),
            task: TaskContext::new(TaskType::Time, TaskConstraints::new(1.0)),
            generation: 0,
            agent: Agent::multi_objective(1.0, 1.0, 1.0),
            metrics: SimulationMetrics {
                time_ms: Some(90.0),
                accuracy: Some(0.97),
                energy: Some(5.0),
            },
        }));
        assert!(engine.bridge().cache().read("agent0", TaskType::Time).is_some());
    }

    #[test]
    fn test_progress_tick_is_ignored() {
        let mut engine = engine_with_mock(0);
        engine.handle_event(SimulationEvent::Tick(TickPayload {
            agent_id: "agent0".to_string(),
            task: TaskContext::new(TaskType::Time, TaskConstraints::new(1.0)),
            generation: 0,
            agent: Agent::simple(1.0, 1.0),
            metrics: SimulationMetrics::default(),
            done: false,
        }));
        assert!(engine.bridge().cache().is_empty());
    }

    #[test]
    fn test_operator_edit_applies_next_generation() {
        let mut engine = engine_with_mock(0);
        engine
            .registry_mut()
            .set(TaskType::Time, TaskConstraints::new(100.0));
        // Just exercises the resolved path; the orchestrator tests pin the
        // override semantics.
        engine.advance_generation();
        assert_eq!(engine.generation(), 1);
    }

    #[test]
    fn test_slow_store_does_not_stall_the_engine() {
        struct SlowSink;
        impl MetricsSink for SlowSink {
            fn append(&mut self, _record: &MetricsRecord) -> Result<(), StoreError> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            }
        }

        let mut engine = EvolutionEngine::new(
            &config(),
            Box::new(MetricsWriter::spawn(Box::new(SlowSink))),
        )
        .unwrap();

        // Five completions queue 1.5s of sink latency; the event handling and
        // the generation steps must not absorb any of it.
        let start = std::time::Instant::now();
        for generation in 0..5 {
            engine.handle_event(SimulationEvent::TaskCompleted(TaskCompletion {
                agent_id: "agent0".to_string(),
                task: TaskContext::new(TaskType::Time, TaskConstraints::new(1.0)),
                generation,
                agent: Agent::multi_objective(1.0, 1.0, 1.0),
                metrics: SimulationMetrics {
                    time_ms: Some(100.0),
                    accuracy: Some(0.95),
                    energy: Some(5.0),
                },
            }));
            engine.advance_generation();
        }
        assert!(
            start.elapsed() < Duration::from_millis(300),
            "engine loop stalled on store latency: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_pump_driver_events_forwards_and_skips_garbage() {
        let input = concat!(
            r#"{"event":"task_completed","agentId":"a1","task":{"type":"time","constraints":{"complexity":1.0}},"generation":0,"agent":{"speed":1.0,"accuracy":1.0},"metrics":{}}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"event":"tick","agentId":"a1","task":{"type":"time","constraints":{"complexity":1.0}},"generation":0,"agent":{"speed":1.0,"accuracy":1.0},"metrics":{},"done":false}"#,
            "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        pump_driver_events(tokio::io::BufReader::new(input.as_bytes()), tx).await;

        assert!(matches!(rx.recv().await, Some(SimulationEvent::TaskCompleted(_))));
        assert!(matches!(rx.recv().await, Some(SimulationEvent::Tick(_))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_run_stops_when_driver_channel_closes() {
        let engine = engine_with_mock(0);
        let (tx, rx) = mpsc::channel(8);
        drop(tx);
        // Must return rather than loop forever.
        engine.run(rx).await;
    }
}
