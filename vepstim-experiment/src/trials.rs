use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;
use vepstim_core::{Conditions, TrialInfo};

use crate::config::TrialOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Sequential,
    /// Condition rows are shuffled anew each repetition from one seeded
    /// generator.
    Randomized(u64),
}

impl Order {
    /// Random order without a configured seed draws one here, once.
    pub fn resolve(order: TrialOrder, seed: Option<u64>) -> Self {
        match order {
            TrialOrder::Sequential => Order::Sequential,
            TrialOrder::Random => {
                let seed = seed.unwrap_or_else(rand::random);
                info!(seed, "randomized trial order");
                Order::Randomized(seed)
            }
        }
    }
}

/// Lazy, finite, single-use sequence of trials: every condition row once per
/// repetition, `repetitions` times.
#[derive(Debug)]
pub struct TrialIterator {
    repetitions: usize,
    conditions: Vec<Conditions>,
    rng: Option<StdRng>,
    order: Vec<usize>,
    rep: usize,
    pos: usize,
    n: usize,
}

impl TrialIterator {
    /// An empty condition list behaves as a single row with no parameters.
    pub fn new(repetitions: usize, conditions: Vec<Conditions>, order: Order) -> Self {
        let conditions = if conditions.is_empty() {
            vec![Conditions::new()]
        } else {
            conditions
        };
        let rng = match order {
            Order::Sequential => None,
            Order::Randomized(seed) => Some(StdRng::seed_from_u64(seed)),
        };
        let mut it = Self {
            repetitions,
            order: (0..conditions.len()).collect(),
            conditions,
            rng,
            rep: 0,
            pos: 0,
            n: 0,
        };
        it.shuffle();
        it
    }

    pub fn total(&self) -> usize {
        self.repetitions * self.conditions.len()
    }

    pub fn remaining(&self) -> usize {
        self.total() - self.n
    }

    fn shuffle(&mut self) {
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
    }
}

impl Iterator for TrialIterator {
    type Item = TrialInfo;

    fn next(&mut self) -> Option<TrialInfo> {
        if self.rep >= self.repetitions {
            return None;
        }
        let index = self.order[self.pos];
        let info = TrialInfo {
            rep: self.rep,
            trial_in_rep: self.pos,
            n: self.n,
            index,
            conditions: self.conditions[index].clone(),
        };
        self.n += 1;
        self.pos += 1;
        if self.pos == self.order.len() {
            self.pos = 0;
            self.rep += 1;
            self.shuffle();
        }
        Some(info)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.remaining();
        (left, Some(left))
    }
}

impl ExactSizeIterator for TrialIterator {}

#[cfg(test)]
mod tests {
    use super::*;
    use vepstim_core::ConditionValue;

    fn rows(n: i64) -> Vec<Conditions> {
        (0..n)
            .map(|i| {
                let mut c = Conditions::new();
                c.insert("ori".into(), ConditionValue::Int(i * 45));
                c
            })
            .collect()
    }

    #[test]
    fn empty_list_runs_one_trial_per_repetition() {
        let trials: Vec<_> = TrialIterator::new(75, Vec::new(), Order::Sequential).collect();
        assert_eq!(trials.len(), 75);
        assert_eq!(trials[74].rep, 74);
        assert_eq!(trials[74].n, 74);
        assert!(trials[0].conditions.is_empty());
    }

    #[test]
    fn sequential_keeps_row_order() {
        let idx: Vec<_> = TrialIterator::new(2, rows(3), Order::Sequential)
            .map(|t| t.index)
            .collect();
        assert_eq!(idx, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn randomized_is_a_permutation_per_repetition() {
        let trials: Vec<_> = TrialIterator::new(4, rows(5), Order::Randomized(7)).collect();
        for rep in trials.chunks(5) {
            let mut idx: Vec<_> = rep.iter().map(|t| t.index).collect();
            idx.sort();
            assert_eq!(idx, vec![0, 1, 2, 3, 4]);
        }
        assert_eq!(trials[6].get("ori"), Some(&ConditionValue::Int(trials[6].index as i64 * 45)));
    }

    #[test]
    fn same_seed_same_sequence() {
        let a: Vec<_> = TrialIterator::new(3, rows(6), Order::Randomized(11))
            .map(|t| t.index)
            .collect();
        let b: Vec<_> = TrialIterator::new(3, rows(6), Order::Randomized(11))
            .map(|t| t.index)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn resolve_keeps_configured_seed() {
        assert_eq!(Order::resolve(TrialOrder::Random, Some(9)), Order::Randomized(9));
        assert_eq!(Order::resolve(TrialOrder::Sequential, Some(9)), Order::Sequential);
        assert!(matches!(Order::resolve(TrialOrder::Random, None), Order::Randomized(_)));
    }

    #[test]
    fn iterator_is_consumed() {
        let mut it = TrialIterator::new(1, rows(2), Order::Sequential);
        assert_eq!(it.len(), 2);
        it.next();
        it.next();
        assert_eq!(it.next(), None);
        assert_eq!(it.next(), None);
        assert_eq!(it.remaining(), 0);
    }
}
