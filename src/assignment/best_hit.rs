//src/assignment/best_hit.rs

use super::AssignmentAlgorithm;
use crate::active_matches::ActiveMatches;
use crate::error::{BinningError, Result};
use crate::types::Read;

/// Assigns the class of the single best scoring active match.
/// Equal scores go to the match with the smaller uid, so the result does not
/// depend on match order.
#[derive(Debug, Clone)]
pub struct BestHit {
    classification_index: usize,
}

impl BestHit {
    pub fn new(classification_index: usize) -> Self {
        Self { classification_index }
    }
}

impl AssignmentAlgorithm for BestHit {
    fn compute_id(&mut self, active: &ActiveMatches, read: &Read) -> i32 {
        let mut best: Option<(f32, u64, i32)> = None;
        for m in active.matches(read) {
            let id = m.class_id(self.classification_index);
            if id <= 0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((score, uid, _)) => m.bit_score > score || (m.bit_score == score && m.uid < uid),
            };
            if better {
                best = Some((m.bit_score, m.uid, id));
            }
        }
        best.map(|(_, _, id)| id).unwrap_or(0)
    }

    fn lca(&self, _id1: i32, _id2: i32) -> Result<i32> {
        Err(BinningError::UnsupportedOperation {
            algorithm: self.name(),
            operation: "lca",
        })
    }

    fn name(&self) -> &'static str {
        "best hit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Match;

    #[test]
    fn picks_highest_score() {
        let read = Read::new(
            1,
            100,
            vec![
                Match::new(1, vec![562], 90.0, 1, 80),
                Match::new(2, vec![9606], 100.0, 1, 80),
                Match::new(3, vec![2], 95.0, 1, 80),
            ],
        );
        let mut algo = BestHit::new(0);
        assert_eq!(algo.compute_id(&ActiveMatches::all(3), &read), 9606);
    }

    #[test]
    fn tie_goes_to_smaller_uid_in_any_order() {
        let a = Match::new(7, vec![562], 100.0, 1, 80);
        let b = Match::new(3, vec![1386], 100.0, 1, 80);
        let c = Match::new(5, vec![9606], 60.0, 1, 80);
        let orders = [
            vec![a.clone(), b.clone(), c.clone()],
            vec![c.clone(), b.clone(), a.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        ];
        let mut algo = BestHit::new(0);
        for matches in orders {
            let read = Read::new(1, 100, matches);
            assert_eq!(algo.compute_id(&ActiveMatches::all(3), &read), 1386);
        }
    }

    #[test]
    fn only_active_matches_count() {
        let read = Read::new(
            1,
            100,
            vec![Match::new(1, vec![562], 90.0, 1, 80), Match::new(2, vec![9606], 100.0, 1, 80)],
        );
        let mut active = ActiveMatches::with_len(2);
        active.set(0, true);
        let mut algo = BestHit::new(0);
        assert_eq!(algo.compute_id(&active, &read), 562);
        assert_eq!(algo.compute_id(&ActiveMatches::with_len(2), &read), 0);
    }

    #[test]
    fn lca_is_unsupported() {
        let algo = BestHit::new(0);
        assert!(matches!(
            algo.lca(562, 2),
            Err(BinningError::UnsupportedOperation { operation: "lca", .. })
        ));
    }
}
