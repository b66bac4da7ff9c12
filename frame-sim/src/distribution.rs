//! Sampling primitives used by shock frames and birth providers.
//!
//! Every draw takes an explicit seed. Seeds come from a [`SeedStream`] owned by
//! the simulation, so a run is reproducible from its root seed as long as the
//! order of draw calls does not change.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as _, LogNormal};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, FrameResult};
use crate::types::{Age, Slot, ValueKind, Values};

/// Deterministic source of per-call seeds.
#[derive(Debug, Clone)]
pub struct SeedStream {
    rng: StdRng,
}

impl SeedStream {
    pub fn new(root: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(root),
        }
    }

    pub fn next_seed(&mut self) -> u64 {
        self.rng.random()
    }

    /// Seed for one member of a keyed family, e.g. one agent slot. Depends
    /// only on `base` and `key`.
    pub fn keyed(base: u64, key: u64) -> u64 {
        StdRng::seed_from_u64(base ^ key.wrapping_mul(0x9E37_79B9_7F4A_7C15)).random()
    }
}

// === DISTRIBUTIONS ===

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    /// `exp(N(mu, sigma))`.
    Lognormal { mu: f64, sigma: f64 },
    /// Lognormal with mean one: `mu = -sigma^2 / 2`.
    MeanOneLognormal { sigma: f64 },
    /// `true` with probability `p`.
    Bernoulli { p: f64 },
    Uniform { bot: f64, top: f64 },
    /// Always `value`.
    Degenerate { value: f64 },
}

impl Distribution {
    /// Lognormal parameterized by the mean and standard deviation of the
    /// lognormal variable itself rather than of its logarithm.
    pub fn lognormal_from_mean_std(mean: f64, std: f64) -> FrameResult<Self> {
        if mean.is_nan() || mean <= 0.0 {
            return Err(FrameError::invalid("mean", format!("must be positive, got {mean}")));
        }
        if std.is_nan() || std < 0.0 {
            return Err(FrameError::invalid("std", format!("must be non-negative, got {std}")));
        }
        let ratio = 1.0 + std * std / (mean * mean);
        Ok(Distribution::Lognormal {
            mu: (mean / ratio.sqrt()).ln(),
            sigma: ratio.ln().sqrt(),
        })
    }

    pub fn validate(&self) -> FrameResult<()> {
        match *self {
            Distribution::Lognormal { mu, sigma } => {
                if !mu.is_finite() {
                    return Err(FrameError::invalid("mu", format!("must be finite, got {mu}")));
                }
                check_sigma(sigma)
            }
            Distribution::MeanOneLognormal { sigma } => check_sigma(sigma),
            Distribution::Bernoulli { p } => {
                if (0.0..=1.0).contains(&p) {
                    Ok(())
                } else {
                    Err(FrameError::invalid("p", format!("must lie in [0, 1], got {p}")))
                }
            }
            Distribution::Uniform { bot, top } => {
                if bot.is_finite() && top.is_finite() && bot <= top {
                    Ok(())
                } else {
                    Err(FrameError::invalid("bot", format!("need finite bot <= top, got [{bot}, {top}]")))
                }
            }
            Distribution::Degenerate { value } => {
                if value.is_finite() {
                    Ok(())
                } else {
                    Err(FrameError::invalid("value", "must be finite"))
                }
            }
        }
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            Distribution::Bernoulli { .. } => ValueKind::Flag,
            _ => ValueKind::Real,
        }
    }

    /// Draw `n` values from a generator seeded with `seed`.
    pub fn draw(&self, n: usize, seed: u64) -> FrameResult<Values> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let values = match *self {
            Distribution::Lognormal { mu, sigma } => Values::Real(lognormal(mu, sigma, n, &mut rng)?),
            Distribution::MeanOneLognormal { sigma } => {
                Values::Real(lognormal(-0.5 * sigma * sigma, sigma, n, &mut rng)?)
            }
            Distribution::Bernoulli { p } => {
                Values::Flag((0..n).map(|_| rng.random::<f64>() < p).collect())
            }
            Distribution::Uniform { bot, top } => Values::Real(
                (0..n)
                    .map(|_| bot + (top - bot) * rng.random::<f64>())
                    .collect(),
            ),
            Distribution::Degenerate { value } => Values::Real(vec![value; n]),
        };
        Ok(values)
    }
}

fn check_sigma(sigma: f64) -> FrameResult<()> {
    if sigma >= 0.0 && sigma.is_finite() {
        Ok(())
    } else {
        Err(FrameError::invalid("sigma", format!("must be finite and non-negative, got {sigma}")))
    }
}

fn lognormal(mu: f64, sigma: f64, n: usize, rng: &mut StdRng) -> FrameResult<Vec<f64>> {
    if sigma == 0.0 {
        return Ok(vec![mu.exp(); n]);
    }
    let dist = LogNormal::new(mu, sigma).map_err(|e| FrameError::invalid("sigma", e.to_string()))?;
    Ok((0..n).map(|_| dist.sample(rng)).collect())
}

// === AGE-INDEXED DISTRIBUTIONS ===

/// A distribution whose parameters vary with the agent's age.
///
/// Holds either one entry per age or a single entry shared by every age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDistribution {
    by_age: Vec<Distribution>,
}

impl IndexDistribution {
    pub fn new(by_age: Vec<Distribution>) -> FrameResult<Self> {
        let Some(first) = by_age.first() else {
            return Err(FrameError::invalid("by_age", "needs at least one distribution"));
        };
        let kind = first.value_kind();
        for dist in &by_age {
            dist.validate()?;
            if dist.value_kind() != kind {
                return Err(FrameError::invalid("by_age", "mixes flag and real distributions"));
            }
        }
        Ok(Self { by_age })
    }

    pub fn constant(dist: Distribution) -> FrameResult<Self> {
        Self::new(vec![dist])
    }

    pub fn lognormal_from_mean_std(means: &[f64], stds: &[f64]) -> FrameResult<Self> {
        if means.len() != stds.len() {
            return Err(FrameError::invalid(
                "std",
                format!("{} means but {} standard deviations", means.len(), stds.len()),
            ));
        }
        let by_age = means
            .iter()
            .zip(stds)
            .map(|(&mean, &std)| Distribution::lognormal_from_mean_std(mean, std))
            .collect::<FrameResult<Vec<_>>>()?;
        Self::new(by_age)
    }

    pub fn bernoulli(ps: &[f64]) -> FrameResult<Self> {
        Self::new(ps.iter().map(|&p| Distribution::Bernoulli { p }).collect())
    }

    pub fn mean_one_lognormal(sigmas: &[f64]) -> FrameResult<Self> {
        Self::new(
            sigmas
                .iter()
                .map(|&sigma| Distribution::MeanOneLognormal { sigma })
                .collect(),
        )
    }

    pub fn value_kind(&self) -> ValueKind {
        self.by_age
            .first()
            .map_or(ValueKind::Real, Distribution::value_kind)
    }

    /// Concrete distribution for `age`.
    pub fn at_age(&self, age: Age) -> FrameResult<&Distribution> {
        if self.by_age.len() == 1 {
            return Ok(&self.by_age[0]);
        }
        self.by_age.get(age).ok_or_else(|| {
            FrameError::invalid(
                "age",
                format!("no distribution for age {age} ({} configured)", self.by_age.len()),
            )
        })
    }

    /// One draw per entry of `conditions`, each from the distribution of that
    /// entry's age.
    ///
    /// Ages are visited in ascending order and each gets its own seed derived
    /// from `seed`, so the result depends only on the multiset of positions
    /// per age, not on how agents are ordered.
    pub fn draw(&self, conditions: &[Age], seed: u64) -> FrameResult<Values> {
        let mut cohorts: BTreeMap<Age, Vec<Slot>> = BTreeMap::new();
        for (slot, &age) in conditions.iter().enumerate() {
            cohorts.entry(age).or_default().push(slot);
        }

        let mut seeds = SeedStream::new(seed);
        let mut out = Values::filled(self.value_kind(), conditions.len());
        for (age, slots) in cohorts {
            let draws = self.at_age(age)?.draw(slots.len(), seeds.next_seed())?;
            out.scatter(&slots, &draws)
                .map_err(|actual| FrameError::TypeMismatch {
                    variable: format!("draw at age {age}"),
                    expected: out.kind(),
                    actual,
                })?;
        }
        Ok(out)
    }
}
