//! Population model: agent representation, fitness math, and the genetic
//! operators (selection, crossover, mutation, single-task generation step).

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Floor applied to task complexity before division, so a zero-difficulty
/// task never produces an infinite fitness.
pub const COMPLEXITY_EPSILON: f64 = 1e-6;

/// Default multiplicative mutation range.
pub const DEFAULT_MUTATION_RANGE: FactorRange = FactorRange { min: 0.9, max: 1.1 };

/// Agent tuned on speed and accuracy only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimpleAgent {
    pub speed: f64,
    pub accuracy: f64,
}

/// Agent carrying the third objective, efficiency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiObjectiveAgent {
    pub speed: f64,
    pub accuracy: f64,
    pub efficiency: f64,
}

/// An evolvable parameter vector. The two shapes are distinguished
/// structurally: any multi-objective operation lifts a `Simple` agent to a
/// `MultiObjective` one with `efficiency = 1.0` at its boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Agent {
    MultiObjective(MultiObjectiveAgent),
    Simple(SimpleAgent),
}

impl Agent {
    pub fn simple(speed: f64, accuracy: f64) -> Self {
        Agent::Simple(SimpleAgent { speed, accuracy })
    }

    pub fn multi_objective(speed: f64, accuracy: f64, efficiency: f64) -> Self {
        Agent::MultiObjective(MultiObjectiveAgent {
            speed,
            accuracy,
            efficiency,
        })
    }

    pub fn speed(&self) -> f64 {
        match self {
            Agent::Simple(a) => a.speed,
            Agent::MultiObjective(a) => a.speed,
        }
    }

    pub fn accuracy(&self) -> f64 {
        match self {
            Agent::Simple(a) => a.accuracy,
            Agent::MultiObjective(a) => a.accuracy,
        }
    }

    /// Efficiency if present, `None` for a simple agent.
    pub fn efficiency(&self) -> Option<f64> {
        match self {
            Agent::Simple(_) => None,
            Agent::MultiObjective(a) => Some(a.efficiency),
        }
    }

    pub fn is_multi_objective(&self) -> bool {
        matches!(self, Agent::MultiObjective(_))
    }

    /// Lift to the multi-objective shape, defaulting efficiency to 1.0.
    pub fn lifted(&self) -> MultiObjectiveAgent {
        match self {
            Agent::Simple(a) => MultiObjectiveAgent {
                speed: a.speed,
                accuracy: a.accuracy,
                efficiency: 1.0,
            },
            Agent::MultiObjective(a) => *a,
        }
    }

    /// Single-objective fitness: `speed * accuracy / max(complexity, eps)`.
    pub fn fitness(&self, complexity: f64) -> f64 {
        (self.speed() * self.accuracy()) / complexity.max(COMPLEXITY_EPSILON)
    }

    /// Weighted multi-objective fitness over the epsilon-floored complexity.
    pub fn weighted_fitness(&self, complexity: f64, weights: &ObjectiveWeights) -> f64 {
        let a = self.lifted();
        let score =
            weights.speed * a.speed + weights.accuracy * a.accuracy + weights.efficiency * a.efficiency;
        score / complexity.max(COMPLEXITY_EPSILON)
    }
}

/// Per-objective weighting. A valid triple sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub speed: f64,
    pub accuracy: f64,
    pub efficiency: f64,
}

impl ObjectiveWeights {
    pub fn new(speed: f64, accuracy: f64, efficiency: f64) -> Self {
        Self {
            speed,
            accuracy,
            efficiency,
        }
    }

    pub fn sum(&self) -> f64 {
        self.speed + self.accuracy + self.efficiency
    }

    /// Rescale so the triple sums to 1.0. A degenerate all-zero triple falls
    /// back to an even split.
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        if total <= 0.0 {
            return Self::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
        }
        Self::new(self.speed / total, self.accuracy / total, self.efficiency / total)
    }
}

/// Inclusive multiplicative factor range sampled during mutation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorRange {
    pub min: f64,
    pub max: f64,
}

impl FactorRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Scale both ends, as annealing does.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            min: self.min * factor,
            max: self.max * factor,
        }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        if self.max <= self.min {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

/// Knobs for a single generation step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvolutionOptions {
    /// How many top-ranked agents breed.
    pub parents: usize,
    /// How many children to produce per generation.
    pub offspring: usize,
    /// How many top-ranked agents survive unchanged.
    pub keep_top: usize,
}

/// Rank by single-objective fitness descending and return the first `n`
/// clones. The sort is stable, so equal-fitness agents keep input order.
/// `n` larger than the population returns the whole ranked population.
pub fn select_top(population: &[Agent], complexity: f64, n: usize) -> Vec<Agent> {
    let mut ranked: Vec<Agent> = population.to_vec();
    ranked.sort_by(|a, b| b.fitness(complexity).total_cmp(&a.fitness(complexity)));
    ranked.truncate(n);
    ranked
}

/// Arithmetic-mean crossover. The child is multi-objective iff either parent
/// is; an absent efficiency contributes 1.0 to the mean.
pub fn crossover(p1: &Agent, p2: &Agent) -> Agent {
    let speed = (p1.speed() + p2.speed()) / 2.0;
    let accuracy = (p1.accuracy() + p2.accuracy()) / 2.0;
    if p1.is_multi_objective() || p2.is_multi_objective() {
        let e1 = p1.efficiency().unwrap_or(1.0);
        let e2 = p2.efficiency().unwrap_or(1.0);
        Agent::multi_objective(speed, accuracy, (e1 + e2) / 2.0)
    } else {
        Agent::simple(speed, accuracy)
    }
}

/// Multiply each trait by an independently sampled factor from `range`.
///
/// Deliberately unclamped: repeated application can drift traits toward zero
/// or unbounded growth. Use [`mutate_bounded`] to opt in to hard bounds.
pub fn mutate(agent: &Agent, range: FactorRange, rng: &mut impl Rng) -> Agent {
    match agent {
        Agent::Simple(a) => Agent::simple(a.speed * range.sample(rng), a.accuracy * range.sample(rng)),
        Agent::MultiObjective(a) => Agent::multi_objective(
            a.speed * range.sample(rng),
            a.accuracy * range.sample(rng),
            a.efficiency * range.sample(rng),
        ),
    }
}

/// Opt-in bounded variant of [`mutate`]: traits are clamped into
/// `[floor, ceil]` after perturbation.
pub fn mutate_bounded(
    agent: &Agent,
    range: FactorRange,
    floor: f64,
    ceil: f64,
    rng: &mut impl Rng,
) -> Agent {
    match mutate(agent, range, rng) {
        Agent::Simple(a) => Agent::simple(a.speed.clamp(floor, ceil), a.accuracy.clamp(floor, ceil)),
        Agent::MultiObjective(a) => Agent::multi_objective(
            a.speed.clamp(floor, ceil),
            a.accuracy.clamp(floor, ceil),
            a.efficiency.clamp(floor, ceil),
        ),
    }
}

/// Factor range the adaptive policy uses when fitness regressed or stalled.
pub const ADAPTIVE_ESCAPE_RANGE: FactorRange = FactorRange { min: 1.0, max: 1.2 };

/// Hill-climbing with escape: no improvement gets a strictly non-shrinking
/// push from `[1.0, 1.2]`; improvement gets the refining `[0.9, 1.1]`.
pub fn adaptive_mutation(
    agent: &Agent,
    last_fitness: f64,
    current_fitness: f64,
    rng: &mut impl Rng,
) -> Agent {
    let range = if current_fitness <= last_fitness {
        ADAPTIVE_ESCAPE_RANGE
    } else {
        DEFAULT_MUTATION_RANGE
    };
    mutate(agent, range, rng)
}

/// Annealing factor: `1 - min(generation / 100, 0.5)`. Non-increasing in the
/// generation and never below 0.5.
pub fn anneal_factor(generation: u32) -> f64 {
    1.0 - (generation as f64 / 100.0).min(0.5)
}

/// Mutation with a range that narrows as generations accumulate, down to half
/// its original width at generation 50 and beyond.
pub fn annealing_mutation(
    agent: &Agent,
    generation: u32,
    min_factor: f64,
    max_factor: f64,
    rng: &mut impl Rng,
) -> Agent {
    let range = FactorRange::new(min_factor, max_factor).scaled(anneal_factor(generation));
    mutate(agent, range, rng)
}

/// One generation of single-task evolution: clone the top `keep_top`
/// unchanged, breed `offspring` mutated children from round-robin pairs of
/// the top `parents`, then pad with clones of the next-best ranked agents.
///
/// The returned population always has the same size as the input.
pub fn evolve_one_generation(
    population: &[Agent],
    complexity: f64,
    opts: &EvolutionOptions,
    rng: &mut impl Rng,
) -> Vec<Agent> {
    if population.is_empty() {
        return Vec::new();
    }

    let ranked = select_top(population, complexity, population.len());
    let elite_count = opts.keep_top.min(ranked.len());
    let mut next: Vec<Agent> = ranked[..elite_count].to_vec();

    let parent_pool = &ranked[..opts.parents.max(1).min(ranked.len())];
    for i in 0..opts.offspring {
        let p1 = &parent_pool[i % parent_pool.len()];
        let p2 = &parent_pool[(i + 1) % parent_pool.len()];
        let child = mutate(&crossover(p1, p2), DEFAULT_MUTATION_RANGE, rng);
        next.push(child);
    }

    // Floor-division losses and small offspring counts are made up with
    // clones of the next-best ranked agents, cycling if the ranking runs out.
    let mut fill = elite_count;
    while next.len() < population.len() {
        next.push(ranked[fill % ranked.len()]);
        fill += 1;
    }
    next.truncate(population.len());
    next
}
