//! Agent mortality.
//!
//! At the start of every period after the first, each living agent survives
//! with the probability attached to the age it just completed. Agents that
//! reach the maximum age die regardless. Dead slots are respawned as newborns.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::Age;

/// Survival probability for an agent that just completed `age`.
///
/// A single entry applies to every age; ages past the end of the table survive.
pub fn survival_probability(liv_prb: &[f64], age: Age) -> f64 {
    match liv_prb {
        [] => 1.0,
        [p] => *p,
        table => table.get(age).copied().unwrap_or(1.0),
    }
}

/// `1 - survival`, clamped to a valid probability.
pub fn death_probability(survival: f64) -> f64 {
    (1.0 - survival).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MortalityOutcome {
    Survives,
    Dies,
}

/// Roll once against `survival`.
pub fn check_mortality<R: Rng>(rng: &mut R, survival: f64) -> MortalityOutcome {
    let roll: f64 = rng.random();
    if roll < death_probability(survival) {
        MortalityOutcome::Dies
    } else {
        MortalityOutcome::Survives
    }
}

/// Decide who dies this period.
///
/// One roll is taken per slot in slot order, so the outcome for a slot does not
/// depend on how many other agents are alive.
pub fn who_dies(
    t_cycle: &[Age],
    t_age: &[usize],
    cycle_len: usize,
    liv_prb: &[f64],
    max_age: Option<usize>,
    seed: u64,
) -> Vec<bool> {
    let cycle_len = cycle_len.max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    t_cycle
        .iter()
        .zip(t_age)
        .map(|(&t, &age)| {
            let completed = (t + cycle_len - 1) % cycle_len;
            let survival = survival_probability(liv_prb, completed);
            let outcome = check_mortality(&mut rng, survival);
            outcome == MortalityOutcome::Dies || max_age.is_some_and(|max| age >= max)
        })
        .collect()
}
