//! Weighted queue selection.
//!
//! Each poll picks the first queue at random with probability proportional to
//! its weight; the remaining queues follow by descending weight so that an
//! empty pick falls through instead of idling.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::domain::QueueName;
use crate::error::TaskerError;

#[derive(Debug, Clone)]
pub struct WeightedQueues {
    /// Sorted by weight descending, then name.
    queues: Vec<(QueueName, u32)>,
    dist: WeightedIndex<u32>,
}

impl WeightedQueues {
    pub fn new<I>(weights: I) -> Result<Self, TaskerError>
    where
        I: IntoIterator<Item = (QueueName, u32)>,
    {
        let mut queues: Vec<(QueueName, u32)> = weights.into_iter().collect();
        queues.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        if queues.is_empty() {
            return Err(TaskerError::Validation("no queues configured".to_string()));
        }
        let dist = WeightedIndex::new(queues.iter().map(|(_, w)| *w))
            .map_err(|e| TaskerError::Validation(format!("queue weights: {e}")))?;
        Ok(Self { queues, dist })
    }

    /// Queue order for one lease attempt.
    pub fn pick_order<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<QueueName> {
        let first = self.dist.sample(rng);
        let mut order = Vec::with_capacity(self.queues.len());
        order.push(self.queues[first].0.clone());
        order.extend(
            self.queues
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != first)
                .map(|(_, (q, _))| q.clone()),
        );
        order
    }

    pub fn order(&self) -> Vec<QueueName> {
        self.pick_order(&mut rand::thread_rng())
    }

    /// Queue names, heaviest first.
    pub fn names(&self) -> impl Iterator<Item = &QueueName> {
        self.queues.iter().map(|(q, _)| q)
    }

    pub fn weight_of(&self, queue: &QueueName) -> Option<u32> {
        self.queues.iter().find(|(q, _)| q == queue).map(|(_, w)| *w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn standard() -> WeightedQueues {
        WeightedQueues::new([
            (QueueName::new("critical"), 6),
            (QueueName::new("default"), 3),
            (QueueName::new("low"), 1),
        ])
        .unwrap()
    }

    #[test]
    fn first_pick_converges_to_weight_ratio() {
        let queues = standard();
        let mut rng = StdRng::seed_from_u64(7);
        let rounds = 100_000;

        let mut firsts: HashMap<QueueName, u32> = HashMap::new();
        for _ in 0..rounds {
            let order = queues.pick_order(&mut rng);
            *firsts.entry(order[0].clone()).or_default() += 1;
        }

        for (name, expected) in [("critical", 0.6), ("default", 0.3), ("low", 0.1)] {
            let share = f64::from(firsts[&QueueName::new(name)]) / f64::from(rounds);
            assert!(
                (share - expected).abs() < 0.01,
                "{name}: got {share}, want {expected}"
            );
        }
    }

    #[test]
    fn every_queue_appears_once_with_rest_by_weight() {
        let queues = standard();
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..100 {
            let order = queues.pick_order(&mut rng);
            assert_eq!(order.len(), 3);
            let rest: Vec<u32> = order[1..]
                .iter()
                .map(|q| queues.weight_of(q).unwrap())
                .collect();
            assert!(rest.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn names_are_heaviest_first() {
        let queues = WeightedQueues::new([
            (QueueName::new("low"), 1),
            (QueueName::new("critical"), 6),
            (QueueName::new("default"), 3),
        ])
        .unwrap();

        let names: Vec<&str> = queues.names().map(|q| q.as_str()).collect();
        assert_eq!(names, vec!["critical", "default", "low"]);
    }

    #[test]
    fn zero_weight_queue_is_only_a_fallback() {
        let queues = WeightedQueues::new([
            (QueueName::new("default"), 1),
            (QueueName::new("backfill"), 0),
        ])
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..50 {
            let order = queues.pick_order(&mut rng);
            assert_eq!(order, vec![QueueName::new("default"), QueueName::new("backfill")]);
        }
    }

    #[test]
    fn all_zero_or_empty_is_rejected() {
        assert!(WeightedQueues::new(Vec::new()).is_err());
        assert!(WeightedQueues::new([(QueueName::new("a"), 0)]).is_err());
    }
}
