//src/assignment/lca.rs

use ahash::AHashMap;
use std::sync::Arc;

use super::{cover_lca, AssignmentAlgorithm, PercentIdentityByRank};
use crate::active_matches::ActiveMatches;
use crate::error::{BinningError, Result};
use crate::taxdb::ClassificationTreeService;
use crate::types::Read;

/// Naive lowest common ancestor.
///
/// Every active match votes once for its class. The result is the deepest
/// node whose clade holds at least `coverage_percent` of the votes; at 100%
/// that is the classic LCA of all hit classes. An optional identity table
/// pushes the call up to a rank the best identity can support.
pub struct NaiveLca {
    tree: Arc<dyn ClassificationTreeService>,
    classification_index: usize,
    coverage_percent: f32,
    identity_by_rank: Option<PercentIdentityByRank>,
    votes: Vec<(i32, f64)>,
    tally: AHashMap<i32, f64>,
}

impl NaiveLca {
    pub fn new(
        tree: Arc<dyn ClassificationTreeService>,
        classification_index: usize,
        coverage_percent: f32,
        identity_by_rank: Option<PercentIdentityByRank>,
    ) -> Result<Self> {
        if !(coverage_percent > 0.0 && coverage_percent <= 100.0) {
            return Err(BinningError::config(format!(
                "LCA coverage percent must be in (0, 100], got {}",
                coverage_percent
            )));
        }
        Ok(Self {
            tree,
            classification_index,
            coverage_percent,
            identity_by_rank,
            votes: Vec::new(),
            tally: AHashMap::new(),
        })
    }
}

impl AssignmentAlgorithm for NaiveLca {
    fn compute_id(&mut self, active: &ActiveMatches, read: &Read) -> i32 {
        self.votes.clear();
        let mut best_identity = 0.0f32;
        for m in active.matches(read) {
            let id = m.class_id(self.classification_index);
            if id > 0 {
                self.votes.push((id, 1.0));
                best_identity = best_identity.max(m.percent_identity);
            }
        }
        let id = cover_lca(self.tree.as_ref(), &self.votes, self.coverage_percent, &mut self.tally);
        match &self.identity_by_rank {
            Some(filter) if id > 0 => filter.apply(self.tree.as_ref(), id, best_identity),
            _ => id,
        }
    }

    fn lca(&self, id1: i32, id2: i32) -> Result<i32> {
        Ok(self.tree.lca(id1, id2))
    }

    fn name(&self) -> &'static str {
        "naive LCA"
    }
}
