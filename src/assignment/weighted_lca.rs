//src/assignment/weighted_lca.rs

use ahash::AHashMap;
use std::sync::Arc;

use super::{cover_lca, AssignmentAlgorithm, PercentIdentityByRank};
use crate::active_matches::ActiveMatches;
use crate::error::{BinningError, Result};
use crate::taxdb::ClassificationTreeService;
use crate::types::Read;

/// Score weighted LCA.
///
/// Like the naive LCA, but each match votes with its bit score and only
/// `percent` of the total score has to be covered (80% by default). A few weak
/// matches to an unrelated clade therefore do not drag the call to the root.
pub struct WeightedLca {
    tree: Arc<dyn ClassificationTreeService>,
    classification_index: usize,
    percent: f32,
    identity_by_rank: Option<PercentIdentityByRank>,
    votes: Vec<(i32, f64)>,
    tally: AHashMap<i32, f64>,
}

impl WeightedLca {
    pub fn new(
        tree: Arc<dyn ClassificationTreeService>,
        classification_index: usize,
        percent: f32,
        identity_by_rank: Option<PercentIdentityByRank>,
    ) -> Result<Self> {
        if !(percent > 0.0 && percent <= 100.0) {
            return Err(BinningError::config(format!(
                "weighted LCA percent must be in (0, 100], got {}",
                percent
            )));
        }
        Ok(Self {
            tree,
            classification_index,
            percent,
            identity_by_rank,
            votes: Vec::new(),
            tally: AHashMap::new(),
        })
    }
}

impl AssignmentAlgorithm for WeightedLca {
    fn compute_id(&mut self, active: &ActiveMatches, read: &Read) -> i32 {
        self.votes.clear();
        let mut best_identity = 0.0f32;
        for m in active.matches(read) {
            let id = m.class_id(self.classification_index);
            if id > 0 {
                self.votes.push((id, m.bit_score as f64));
                best_identity = best_identity.max(m.percent_identity);
            }
        }
        let id = cover_lca(self.tree.as_ref(), &self.votes, self.percent, &mut self.tally);
        match &self.identity_by_rank {
            Some(filter) if id > 0 => filter.apply(self.tree.as_ref(), id, best_identity),
            _ => id,
        }
    }

    fn lca(&self, id1: i32, id2: i32) -> Result<i32> {
        Ok(self.tree.lca(id1, id2))
    }

    fn name(&self) -> &'static str {
        "weighted LCA"
    }
}
