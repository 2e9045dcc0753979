//! Task model: per-task-type objective weighting, mutation ranges, annealing
//! schedules, and fitness derivation from live simulation metrics.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::feedback::SimulationMetrics;
use crate::population::{Agent, FactorRange, ObjectiveWeights};

/// Accuracy threshold below which an agent is considered to be failing the
/// accuracy objective, regardless of task constraints.
pub const ACCURACY_FLOOR: f64 = 0.9;

/// Deadlines under this are considered tight.
pub const TIGHT_DEADLINE_MS: f64 = 3000.0;
/// Energy limits under this are considered tight.
pub const TIGHT_ENERGY_LIMIT: f64 = 80.0;
/// Complexity at or above this marks a hard task.
pub const HARD_COMPLEXITY: f64 = 70.0;

/// Multiplier applied to the upper end of a range when live metrics show an
/// objective failing its constraint.
const METRIC_PRESSURE: f64 = 1.08;
/// Upper-end multiplier when fitness has not improved.
const STAGNATION_BOOST: f64 = 1.05;
/// Constraint-tightness nudge applied by [`live_constraint_bias`].
const CONSTRAINT_BIAS: f64 = 1.06;
/// Weight added to a failing objective before renormalization.
const FAILING_WEIGHT_BUMP: f64 = 0.15;

/// Errors from task-type parsing and task construction.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),
    #[error("objective weights must sum to 1, got {0}")]
    InvalidWeights(f64),
}

/// The three optimization regimes a lab can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Accuracy,
    Resource,
    Time,
}

impl FromStr for TaskType {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accuracy" => Ok(TaskType::Accuracy),
            "resource" => Ok(TaskType::Resource),
            "time" => Ok(TaskType::Time),
            other => Err(TaskError::UnknownTaskType(other.to_string())),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Accuracy => "accuracy",
            TaskType::Resource => "resource",
            TaskType::Time => "time",
        };
        f.write_str(s)
    }
}

/// Difficulty and resource constraints of a task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConstraints {
    /// Difficulty divisor, >= 0. Floored at epsilon before division.
    pub complexity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_deadline_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_limit: Option<f64>,
}

impl TaskConstraints {
    pub fn new(complexity: f64) -> Self {
        Self {
            complexity,
            time_deadline_ms: None,
            energy_limit: None,
        }
    }
}

/// A task type plus its constraints and optional static objective weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub constraints: TaskConstraints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<ObjectiveWeights>,
}

impl TaskContext {
    pub fn new(task_type: TaskType, constraints: TaskConstraints) -> Self {
        Self {
            task_type,
            constraints,
            weights: None,
        }
    }

    /// Static weights for this task: the configured triple if set, otherwise
    /// the per-type defaults.
    pub fn static_weights(&self) -> ObjectiveWeights {
        self.weights.unwrap_or_else(|| default_weights_for(self.task_type))
    }
}

/// Default (speed, accuracy, efficiency) weighting per task type. Each triple
/// sums to 1.0.
pub fn default_weights_for(task_type: TaskType) -> ObjectiveWeights {
    match task_type {
        TaskType::Accuracy => ObjectiveWeights::new(0.2, 0.6, 0.2),
        TaskType::Resource => ObjectiveWeights::new(0.2, 0.2, 0.6),
        TaskType::Time => ObjectiveWeights::new(0.6, 0.2, 0.2),
    }
}

/// How far and how fast the mutation range may anneal for a task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnealingSchedule {
    /// Maximum fraction of the range width that can be annealed away.
    pub max_drop: f64,
    /// Generations over which the drop accumulates.
    pub denom: f64,
}

/// Harder tasks anneal faster and are allowed to shrink further.
pub fn annealing_schedule(constraints: &TaskConstraints) -> AnnealingSchedule {
    if constraints.complexity >= 50.0 {
        AnnealingSchedule { max_drop: 0.7, denom: 50.0 }
    } else {
        AnnealingSchedule { max_drop: 0.4, denom: 150.0 }
    }
}

impl AnnealingSchedule {
    pub fn factor(&self, generation: u32) -> f64 {
        1.0 - (generation as f64 / self.denom).min(self.max_drop)
    }
}

/// Per-attribute mutation factor ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutationRanges {
    pub speed: FactorRange,
    pub accuracy: FactorRange,
    pub efficiency: FactorRange,
}

/// Factor ranges biased by task type, then adjusted for tight energy or
/// deadline constraints.
pub fn mutation_ranges_for(task: &TaskContext) -> MutationRanges {
    let mut ranges = MutationRanges {
        speed: FactorRange::new(0.9, 1.1),
        accuracy: FactorRange::new(0.9, 1.1),
        efficiency: FactorRange::new(0.9, 1.1),
    };

    match task.task_type {
        // Resource tasks push efficiency upside and keep speed conservative.
        TaskType::Resource => {
            ranges.efficiency = FactorRange::new(0.9, 1.25);
            ranges.speed = FactorRange::new(0.92, 1.05);
        }
        TaskType::Time => {
            ranges.speed = FactorRange::new(0.9, 1.25);
        }
        TaskType::Accuracy => {
            ranges.accuracy = FactorRange::new(0.9, 1.25);
        }
    }

    if let Some(limit) = task.constraints.energy_limit {
        if limit < TIGHT_ENERGY_LIMIT {
            ranges.efficiency.min += 0.05;
            ranges.efficiency.max += 0.10;
            ranges.speed.max = ranges.speed.max.min(1.1);
        }
    }
    if let Some(deadline) = task.constraints.time_deadline_ms {
        if deadline < TIGHT_DEADLINE_MS {
            ranges.speed.min += 0.05;
            ranges.speed.max += 0.10;
        }
    }

    ranges
}

/// Per-trait multiplicative bias derived purely from how tight the current
/// constraints are. No history is consulted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraitBias {
    pub speed: f64,
    pub accuracy: f64,
    pub efficiency: f64,
}

pub fn live_constraint_bias(task: &TaskContext) -> TraitBias {
    let mut bias = TraitBias { speed: 1.0, accuracy: 1.0, efficiency: 1.0 };
    if let Some(deadline) = task.constraints.time_deadline_ms {
        if deadline < TIGHT_DEADLINE_MS {
            bias.speed = CONSTRAINT_BIAS;
        }
    }
    if let Some(limit) = task.constraints.energy_limit {
        if limit < TIGHT_ENERGY_LIMIT {
            bias.efficiency = CONSTRAINT_BIAS;
        }
    }
    if task.constraints.complexity >= HARD_COMPLEXITY {
        bias.accuracy = CONSTRAINT_BIAS;
    }
    bias
}

fn metrics_miss_deadline(task: &TaskConstraints, metrics: &SimulationMetrics) -> bool {
    matches!(
        (metrics.time_ms, task.time_deadline_ms),
        (Some(t), Some(deadline)) if t > deadline
    )
}

fn metrics_exceed_energy(task: &TaskConstraints, metrics: &SimulationMetrics) -> bool {
    matches!(
        (metrics.energy, task.energy_limit),
        (Some(e), Some(limit)) if e > limit
    )
}

fn metrics_below_accuracy_floor(metrics: &SimulationMetrics) -> bool {
    matches!(metrics.accuracy, Some(a) if a < ACCURACY_FLOOR)
}

/// Task-aware mutation: combines the per-type ranges with the task's
/// annealing schedule, the current-constraint bias, a stagnation boost, and
/// extra pressure on whichever attribute the live metrics show failing.
///
/// This is the single point where real measured behavior feeds back into
/// mutation strength.
#[allow(clippy::too_many_arguments)]
pub fn task_specific_mutation(
    agent: &Agent,
    generation: u32,
    task: &TaskContext,
    last_fitness: f64,
    current_fitness: f64,
    metrics: Option<&SimulationMetrics>,
    rng: &mut impl Rng,
) -> Agent {
    let mut ranges = mutation_ranges_for(task);
    let anneal = annealing_schedule(&task.constraints).factor(generation);
    ranges.speed = ranges.speed.scaled(anneal);
    ranges.accuracy = ranges.accuracy.scaled(anneal);
    ranges.efficiency = ranges.efficiency.scaled(anneal);

    let bias = live_constraint_bias(task);
    ranges.speed.max *= bias.speed;
    ranges.accuracy.max *= bias.accuracy;
    ranges.efficiency.max *= bias.efficiency;

    if current_fitness <= last_fitness {
        ranges.speed.max *= STAGNATION_BOOST;
        ranges.accuracy.max *= STAGNATION_BOOST;
        ranges.efficiency.max *= STAGNATION_BOOST;
    }

    if let Some(m) = metrics {
        if metrics_miss_deadline(&task.constraints, m) {
            ranges.speed.max *= METRIC_PRESSURE;
        }
        if metrics_exceed_energy(&task.constraints, m) {
            ranges.efficiency.max *= METRIC_PRESSURE;
        }
        if metrics_below_accuracy_floor(m) {
            ranges.accuracy.max *= METRIC_PRESSURE;
        }
    }

    apply_ranges(agent, &ranges, rng)
}

fn apply_ranges(agent: &Agent, ranges: &MutationRanges, rng: &mut impl Rng) -> Agent {
    match agent {
        Agent::Simple(a) => Agent::simple(
            a.speed * ranges.speed.sample(rng),
            a.accuracy * ranges.accuracy.sample(rng),
        ),
        Agent::MultiObjective(a) => Agent::multi_objective(
            a.speed * ranges.speed.sample(rng),
            a.accuracy * ranges.accuracy.sample(rng),
            a.efficiency * ranges.efficiency.sample(rng),
        ),
    }
}

/// Objective weights re-derived from live metrics: the configured/default
/// triple with the failing objectives bumped, renormalized to sum 1.
pub fn weights_from_metrics(task: &TaskContext, metrics: &SimulationMetrics) -> ObjectiveWeights {
    let mut weights = task.static_weights();
    if metrics_miss_deadline(&task.constraints, metrics) {
        weights.speed += FAILING_WEIGHT_BUMP;
    }
    if metrics_exceed_energy(&task.constraints, metrics) {
        weights.efficiency += FAILING_WEIGHT_BUMP;
    }
    if metrics_below_accuracy_floor(metrics) {
        weights.accuracy += FAILING_WEIGHT_BUMP;
    }
    weights.normalized()
}

/// Multi-objective fitness for this task: metrics-derived weights when live
/// metrics are available, static/default weights otherwise. A simple agent is
/// scored with an implicit efficiency of 1.0.
pub fn task_fitness(
    agent: &Agent,
    task: &TaskContext,
    complexity: f64,
    metrics: Option<&SimulationMetrics>,
) -> f64 {
    let weights = match metrics {
        Some(m) => weights_from_metrics(task, m),
        None => task.static_weights(),
    };
    agent.weighted_fitness(complexity, &weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn time_task(complexity: f64) -> TaskContext {
        TaskContext::new(TaskType::Time, TaskConstraints::new(complexity))
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!("accuracy".parse::<TaskType>().unwrap(), TaskType::Accuracy);
        assert_eq!("resource".parse::<TaskType>().unwrap(), TaskType::Resource);
        assert_eq!("time".parse::<TaskType>().unwrap(), TaskType::Time);
    }

    #[test]
    fn test_task_type_parse_unknown_is_error() {
        match "speedrun".parse::<TaskType>() {
            Err(TaskError::UnknownTaskType(t)) => assert_eq!(t, "speedrun"),
            other => panic!("expected UnknownTaskType, got {:?}", other),
        }
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        for ty in [TaskType::Accuracy, TaskType::Resource, TaskType::Time] {
            let w = default_weights_for(ty);
            assert!((w.sum() - 1.0).abs() < 1e-12, "weights for {} must sum to 1", ty);
        }
    }

    #[test]
    fn test_default_weights_favor_their_objective() {
        assert_eq!(default_weights_for(TaskType::Accuracy).accuracy, 0.6);
        assert_eq!(default_weights_for(TaskType::Resource).efficiency, 0.6);
        assert_eq!(default_weights_for(TaskType::Time).speed, 0.6);
    }

    #[test]
    fn test_annealing_schedule_hard_vs_easy() {
        let hard = annealing_schedule(&TaskConstraints::new(50.0));
        assert_eq!(hard.max_drop, 0.7);
        assert_eq!(hard.denom, 50.0);

        let easy = annealing_schedule(&TaskConstraints::new(49.9));
        assert_eq!(easy.max_drop, 0.4);
        assert_eq!(easy.denom, 150.0);
    }

    #[test]
    fn test_annealing_schedule_factor_floors() {
        let hard = annealing_schedule(&TaskConstraints::new(80.0));
        assert_eq!(hard.factor(0), 1.0);
        assert!((hard.factor(10_000) - 0.3).abs() < 1e-12);

        let easy = annealing_schedule(&TaskConstraints::new(1.0));
        assert!((easy.factor(10_000) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_mutation_ranges_task_biases() {
        let resource = TaskContext::new(TaskType::Resource, TaskConstraints::new(1.0));
        let r = mutation_ranges_for(&resource);
        assert!(r.efficiency.max > 1.1);
        assert!(r.speed.max < 1.1);

        let time = mutation_ranges_for(&time_task(1.0));
        assert!(time.speed.max > 1.1);

        let accuracy = TaskContext::new(TaskType::Accuracy, TaskConstraints::new(1.0));
        assert!(mutation_ranges_for(&accuracy).accuracy.max > 1.1);
    }

    #[test]
    fn test_mutation_ranges_tight_energy_caps_speed() {
        let mut task = TaskContext::new(TaskType::Time, TaskConstraints::new(1.0));
        task.constraints.energy_limit = Some(50.0);
        let r = mutation_ranges_for(&task);
        assert!(r.speed.max <= 1.1);
        assert!(r.efficiency.max > 1.1);
        assert!(r.efficiency.min > 0.9);
    }

    #[test]
    fn test_mutation_ranges_tight_deadline_pushes_speed() {
        let mut task = TaskContext::new(TaskType::Accuracy, TaskConstraints::new(1.0));
        task.constraints.time_deadline_ms = Some(1000.0);
        let r = mutation_ranges_for(&task);
        assert!(r.speed.min > 0.9);
        assert!(r.speed.max > 1.1);
    }

    #[test]
    fn test_live_constraint_bias() {
        let mut task = time_task(70.0);
        task.constraints.time_deadline_ms = Some(2000.0);
        task.constraints.energy_limit = Some(40.0);
        let bias = live_constraint_bias(&task);
        assert_eq!(bias.speed, CONSTRAINT_BIAS);
        assert_eq!(bias.efficiency, CONSTRAINT_BIAS);
        assert_eq!(bias.accuracy, CONSTRAINT_BIAS);

        let relaxed = live_constraint_bias(&time_task(1.0));
        assert_eq!(relaxed.speed, 1.0);
        assert_eq!(relaxed.accuracy, 1.0);
        assert_eq!(relaxed.efficiency, 1.0);
    }

    #[test]
    fn test_weights_from_metrics_bump_failing_objective() {
        let mut task = time_task(1.0);
        task.constraints.time_deadline_ms = Some(100.0);

        let slow = SimulationMetrics {
            time_ms: Some(500.0),
            accuracy: Some(0.99),
            energy: None,
        };
        let w = weights_from_metrics(&task, &slow);
        assert!((w.sum() - 1.0).abs() < 1e-12);
        assert!(w.speed > default_weights_for(TaskType::Time).speed);
    }

    #[test]
    fn test_weights_from_metrics_passing_metrics_keep_static() {
        let task = time_task(1.0);
        let fine = SimulationMetrics {
            time_ms: Some(10.0),
            accuracy: Some(0.99),
            energy: Some(1.0),
        };
        assert_eq!(weights_from_metrics(&task, &fine), task.static_weights());
    }

    #[test]
    fn test_task_fitness_all_ones_is_one() {
        let agent = Agent::multi_objective(1.0, 1.0, 1.0);
        let task = time_task(1.0);
        assert!((task_fitness(&agent, &task, 1.0, None) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_task_fitness_absent_metrics_fall_back_to_static() {
        let agent = Agent::multi_objective(2.0, 1.0, 1.0);
        let task = time_task(1.0);
        let with_none = task_fitness(&agent, &task, 1.0, None);
        let expected = agent.weighted_fitness(1.0, &task.static_weights());
        assert!((with_none - expected).abs() < 1e-12);
    }

    #[test]
    fn test_task_specific_mutation_simple_agent_keeps_shape() {
        let mut rng = rng();
        let agent = Agent::simple(1.0, 1.0);
        let task = time_task(1.0);
        let m = task_specific_mutation(&agent, 0, &task, 0.0, 1.0, None, &mut rng);
        assert!(!m.is_multi_objective());
        assert!(m.speed() > 0.0);
    }

    #[test]
    fn test_task_specific_mutation_metric_pressure_widens_upside() {
        // A missed deadline must allow a strictly larger speed factor than the
        // same task with passing metrics.
        let mut task = time_task(1.0);
        task.constraints.time_deadline_ms = Some(100.0);

        let miss = SimulationMetrics {
            time_ms: Some(400.0),
            accuracy: Some(0.99),
            energy: None,
        };

        let mut max_with_pressure: f64 = 0.0;
        let mut max_without: f64 = 0.0;
        let agent = Agent::multi_objective(1.0, 1.0, 1.0);
        let mut rng = rng();
        for _ in 0..400 {
            let m = task_specific_mutation(&agent, 0, &task, 0.0, 1.0, Some(&miss), &mut rng);
            max_with_pressure = max_with_pressure.max(m.speed());
            let m = task_specific_mutation(&agent, 0, &task, 0.0, 1.0, None, &mut rng);
            max_without = max_without.max(m.speed());
        }
        assert!(max_with_pressure > max_without);
    }

    #[test]
    fn test_task_context_serde_wire_shape() {
        let mut task = time_task(2.0);
        task.constraints.time_deadline_ms = Some(1500.0);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "time");
        assert_eq!(json["constraints"]["complexity"], 2.0);
        assert_eq!(json["constraints"]["timeDeadlineMs"], 1500.0);

        let back: TaskContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }
}
