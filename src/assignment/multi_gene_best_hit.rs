//src/assignment/multi_gene_best_hit.rs

use ahash::AHashSet;

use super::{write_additional, AssignmentAlgorithm};
use crate::active_matches::ActiveMatches;
use crate::error::{BinningError, Result};
use crate::interval_tree::{IntervalTree, Ranked};
use crate::types::Read;

#[derive(Debug, Clone, Copy)]
struct Hit {
    score: f32,
    uid: u64,
    class_id: i32,
}

impl Ranked for Hit {
    fn score(&self) -> f32 {
        self.score
    }
    fn uid(&self) -> u64 {
        self.uid
    }
}

/// Best hit per locus, for long reads that may carry several genes.
///
/// Matches are split by strand, each strand is pruned of dominated
/// alignments, and the survivors of both strands are merged. Walking them in
/// read order, the first survivor gives the primary id and every later one
/// adds its class (once) as an additional id.
pub struct MultiGeneBestHit {
    classification_index: usize,
    min_overlap: i32,
    forward: IntervalTree<Hit>,
    reverse: IntervalTree<Hit>,
    all: IntervalTree<Hit>,
    seen: AHashSet<i32>,
    additional: Vec<i32>,
}

impl MultiGeneBestHit {
    pub fn new(classification_index: usize, min_overlap: i32) -> Result<Self> {
        if min_overlap < 0 {
            return Err(BinningError::config(format!(
                "min overlap must not be negative, got {}",
                min_overlap
            )));
        }
        Ok(Self {
            classification_index,
            min_overlap,
            forward: IntervalTree::new(),
            reverse: IntervalTree::new(),
            all: IntervalTree::new(),
            seen: AHashSet::new(),
            additional: Vec::new(),
        })
    }

    pub fn min_overlap(&self) -> i32 {
        self.min_overlap
    }

    /// Number of surviving alignments of the last computed read.
    pub fn segment_count(&self) -> usize {
        self.all.len()
    }
}

impl AssignmentAlgorithm for MultiGeneBestHit {
    fn compute_id(&mut self, active: &ActiveMatches, read: &Read) -> i32 {
        self.forward.clear();
        self.reverse.clear();
        self.all.clear();
        self.seen.clear();
        self.additional.clear();

        for m in active.matches(read) {
            let class_id = m.class_id(self.classification_index);
            if class_id <= 0 {
                continue;
            }
            let hit = Hit {
                score: m.bit_score,
                uid: m.uid,
                class_id,
            };
            if m.is_reverse() {
                self.reverse.insert(m.query_end, m.query_start, hit);
            } else {
                self.forward.insert(m.query_start, m.query_end, hit);
            }
        }

        self.forward.remove_dominated();
        self.reverse.remove_dominated();
        self.all.extend_from(&self.forward);
        self.all.extend_from(&self.reverse);
        self.all.index();

        let mut primary = 0;
        for iv in self.all.iter() {
            let id = iv.payload.class_id;
            if !self.seen.insert(id) {
                continue;
            }
            if primary == 0 {
                primary = id;
            } else {
                self.additional.push(id);
            }
        }
        primary
    }

    fn lca(&self, _id1: i32, _id2: i32) -> Result<i32> {
        Err(BinningError::UnsupportedOperation {
            algorithm: self.name(),
            operation: "lca",
        })
    }

    fn additional_class_ids(&self, index: usize, number_of_classifications: usize, out: &mut Vec<Vec<i32>>) -> usize {
        write_additional(&self.additional, index, number_of_classifications, out)
    }

    fn name(&self) -> &'static str {
        "multi-gene best hit"
    }
}
