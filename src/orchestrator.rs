//! Cross-task orchestrator: evolves one shared population against several
//! task contexts at once, merging the per-task sub-populations back into a
//! single fixed-size population.

use rand::Rng;
use tracing::debug;

use crate::constraints::ConstraintsRegistry;
use crate::feedback::{FeedbackCache, SimulationMetrics};
use crate::population::{crossover, Agent, EvolutionOptions};
use crate::task::{task_fitness, task_specific_mutation, TaskContext};

/// One generation of multi-task evolution over a shared population.
///
/// Each task ranks the entire population by its own fitness (biased by cached
/// live metrics when `agent_ids` are supplied), contributes
/// `keep_top / task_count` elites and `offspring / task_count` children, and
/// the floor-division remainder is filled with clones of the globally best
/// agents, each ranked by its best-fit task. The result always matches the
/// input population's size.
#[allow(clippy::too_many_arguments)]
pub fn evolve_across_tasks(
    population: &[Agent],
    tasks: &[TaskContext],
    generation: u32,
    opts: &EvolutionOptions,
    registry: &ConstraintsRegistry,
    feedback: &FeedbackCache,
    agent_ids: Option<&[String]>,
    rng: &mut impl Rng,
) -> Vec<Agent> {
    if population.is_empty() || tasks.is_empty() {
        return population.to_vec();
    }

    // Registry entries override a task's embedded constraints, so operator
    // edits take effect on the very next generation.
    let resolved: Vec<TaskContext> = tasks
        .iter()
        .map(|task| {
            let mut task = task.clone();
            if let Some(live) = registry.get(task.task_type) {
                task.constraints = live;
            }
            task
        })
        .collect();

    let task_count = resolved.len();
    let elites_per_task = opts.keep_top / task_count;
    let offspring_per_task = opts.offspring / task_count;

    let metrics_for = |index: usize, task: &TaskContext| -> Option<&SimulationMetrics> {
        agent_ids
            .and_then(|ids| ids.get(index))
            .and_then(|id| feedback.read(id, task.task_type))
    };

    let mut next: Vec<Agent> = Vec::with_capacity(population.len());

    for task in &resolved {
        let complexity = task.constraints.complexity;
        let mut scored: Vec<(usize, f64)> = population
            .iter()
            .enumerate()
            .map(|(i, agent)| (i, task_fitness(agent, task, complexity, metrics_for(i, task))))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (index, _) in scored.iter().take(elites_per_task) {
            next.push(population[*index]);
        }

        let parent_pool: Vec<(usize, f64)> = scored
            .iter()
            .take(opts.parents.max(1).min(scored.len()))
            .copied()
            .collect();
        for i in 0..offspring_per_task {
            let (i1, f1) = parent_pool[i % parent_pool.len()];
            let (i2, f2) = parent_pool[(i + 1) % parent_pool.len()];
            let child = crossover(&population[i1], &population[i2]);
            // The higher-ranked parent's fitness counts as "current", the
            // partner's as "last": ties trigger the stagnation boost.
            let mutated = task_specific_mutation(
                &child,
                generation,
                task,
                f2,
                f1,
                metrics_for(i1, task),
                rng,
            );
            next.push(mutated);
        }
    }

    // Remainder fill: floor division loses slots, which are reclaimed with
    // clones of the globally best agents across all tasks combined.
    if next.len() < population.len() {
        let mut global: Vec<(usize, f64)> = population
            .iter()
            .enumerate()
            .map(|(i, agent)| {
                let best = resolved
                    .iter()
                    .map(|task| {
                        task_fitness(agent, task, task.constraints.complexity, metrics_for(i, task))
                    })
                    .fold(f64::NEG_INFINITY, f64::max);
                (i, best)
            })
            .collect();
        global.sort_by(|a, b| b.1.total_cmp(&a.1));

        debug!(
            missing = population.len() - next.len(),
            "filling remainder slots with global best"
        );
        let mut fill = 0;
        while next.len() < population.len() {
            next.push(population[global[fill % global.len()].0]);
            fill += 1;
        }
    }

    next.truncate(population.len());
    next
}
