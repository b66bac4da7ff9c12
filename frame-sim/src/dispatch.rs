// Cohort dispatch: split the population by age and branch, evaluate a
// per-age function on each piece, and scatter the results back by slot.

use std::collections::BTreeSet;

use crate::error::{FrameError, FrameResult};
use crate::types::{Age, Slot};

/// Slots sharing one age, split by the adjust flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cohort {
    pub age: Age,
    pub adjust: Vec<Slot>,
    pub fixed: Vec<Slot>,
}

impl Cohort {
    pub fn len(&self) -> usize {
        self.adjust.len() + self.fixed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjust.is_empty() && self.fixed.is_empty()
    }
}

/// Distinct ages, ascending.
pub fn ages_present(ages: &[Age]) -> Vec<Age> {
    ages.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

pub fn cohort_slots(ages: &[Age], age: Age) -> Vec<Slot> {
    ages.iter()
        .enumerate()
        .filter_map(|(slot, &a)| (a == age).then_some(slot))
        .collect()
}

/// Partition every slot into exactly one (age, branch) cell.
pub fn split_cohorts(ages: &[Age], adjust: &[bool]) -> FrameResult<Vec<Cohort>> {
    if ages.len() != adjust.len() {
        return Err(FrameError::ShapeMismatch {
            frame: "<dispatch>".to_string(),
            variable: "Adjust".to_string(),
            expected: ages.len(),
            actual: adjust.len(),
        });
    }
    Ok(ages_present(ages)
        .into_iter()
        .map(|age| {
            let (adjusting, fixed): (Vec<Slot>, Vec<Slot>) = cohort_slots(ages, age)
                .into_iter()
                .partition(|&slot| adjust[slot]);
            Cohort {
                age,
                adjust: adjusting,
                fixed,
            }
        })
        .collect())
}

pub fn gather<T: Copy>(values: &[T], slots: &[Slot]) -> Vec<T> {
    slots.iter().map(|&slot| values[slot]).collect()
}

/// Write `src[i]` to `target[slots[i]]`, failing if a branch function
/// returned the wrong number of values.
pub fn scatter_checked<T: Copy>(
    target: &mut [T],
    slots: &[Slot],
    src: &[T],
    frame: &str,
    variable: &str,
) -> FrameResult<()> {
    if src.len() != slots.len() {
        return Err(FrameError::ShapeMismatch {
            frame: frame.to_string(),
            variable: variable.to_string(),
            expected: slots.len(),
            actual: src.len(),
        });
    }
    for (&slot, &value) in slots.iter().zip(src) {
        target[slot] = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_by_age_then_branch() {
        let ages = [1, 0, 1, 0, 2];
        let adjust = [true, false, false, true, true];
        let cohorts = split_cohorts(&ages, &adjust).expect("same length");

        assert_eq!(cohorts.len(), 3);
        assert_eq!(cohorts[0], Cohort { age: 0, adjust: vec![3], fixed: vec![1] });
        assert_eq!(cohorts[1], Cohort { age: 1, adjust: vec![0], fixed: vec![2] });
        assert_eq!(cohorts[2], Cohort { age: 2, adjust: vec![4], fixed: vec![] });
        assert_eq!(cohorts.iter().map(Cohort::len).sum::<usize>(), ages.len());
    }

    #[test]
    fn test_scatter_rejects_wrong_length() {
        let mut out = vec![0.0; 3];
        let err = scatter_checked(&mut out, &[0, 2], &[1.0], "Share", "Share");
        assert!(matches!(
            err,
            Err(FrameError::ShapeMismatch { expected: 2, actual: 1, .. })
        ));

        scatter_checked(&mut out, &[0, 2], &[1.0, 3.0], "Share", "Share").expect("fits");
        assert_eq!(out, vec![1.0, 0.0, 3.0]);
        assert_eq!(gather(&out, &[2, 0]), vec![3.0, 1.0]);
    }

    #[test]
    fn test_empty_population() {
        assert!(split_cohorts(&[], &[]).expect("empty").is_empty());
        assert!(split_cohorts(&[0], &[]).is_err());
    }
}
