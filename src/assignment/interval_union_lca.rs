//src/assignment/interval_union_lca.rs

use ahash::AHashMap;
use std::sync::Arc;

use super::{cover_lca, write_additional, AssignmentAlgorithm};
use crate::active_matches::ActiveMatches;
use crate::error::{BinningError, Result};
use crate::interval_tree::{IntervalTree, Ranked};
use crate::taxdb::ClassificationTreeService;
use crate::types::Read;

#[derive(Debug, Clone, Copy)]
struct Span {
    score: f32,
    uid: u64,
    index: usize,
}

impl Ranked for Span {
    fn score(&self) -> f32 {
        self.score
    }
    fn uid(&self) -> u64 {
        self.uid
    }
}

/// LCA for long reads.
///
/// The active matches are laid out on the read, split by strand and pruned of
/// dominated alignments. The survivors are grouped into clusters of
/// overlapping alignments. Each cluster gets its own LCA, where a match votes
/// with its aligned length. The read is assigned the LCA of the cluster ids;
/// when the read has two or more clusters, the cluster ids that differ from
/// the read id are reported as additional ids.
pub struct IntervalUnionLca {
    tree: Arc<dyn ClassificationTreeService>,
    classification_index: usize,
    coverage_percent: f32,
    forward: IntervalTree<Span>,
    reverse: IntervalTree<Span>,
    spans: IntervalTree<Span>,
    votes: Vec<(i32, f64)>,
    tally: AHashMap<i32, f64>,
    cluster_ids: Vec<i32>,
    additional: Vec<i32>,
}

impl IntervalUnionLca {
    pub fn new(tree: Arc<dyn ClassificationTreeService>, classification_index: usize, coverage_percent: f32) -> Result<Self> {
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
            forward: IntervalTree::new(),
            reverse: IntervalTree::new(),
            spans: IntervalTree::new(),
            votes: Vec::new(),
            tally: AHashMap::new(),
            cluster_ids: Vec::new(),
            additional: Vec::new(),
        })
    }

    /// Cluster ids of the last computed read, in read order.
    pub fn cluster_ids(&self) -> &[i32] {
        &self.cluster_ids
    }

    fn close_cluster(&mut self) {
        if self.votes.is_empty() {
            return;
        }
        let id = cover_lca(self.tree.as_ref(), &self.votes, self.coverage_percent, &mut self.tally);
        if id > 0 {
            self.cluster_ids.push(id);
        }
        self.votes.clear();
    }
}

impl AssignmentAlgorithm for IntervalUnionLca {
    fn compute_id(&mut self, active: &ActiveMatches, read: &Read) -> i32 {
        self.forward.clear();
        self.reverse.clear();
        self.spans.clear();
        self.votes.clear();
        self.cluster_ids.clear();
        self.additional.clear();

        for i in active.iter() {
            let Some(m) = read.matches.get(i) else { continue };
            let id = m.class_id(self.classification_index);
            if id > 0 && self.tree.is_known(id) {
                let (start, end) = m.query_span();
                let span = Span {
                    score: m.bit_score,
                    uid: m.uid,
                    index: i,
                };
                if m.is_reverse() {
                    self.reverse.insert(start, end, span);
                } else {
                    self.forward.insert(start, end, span);
                }
            }
        }
        self.forward.remove_dominated();
        self.reverse.remove_dominated();
        self.spans.extend_from(&self.forward);
        self.spans.extend_from(&self.reverse);
        if self.spans.is_empty() {
            return 0;
        }
        self.spans.index();

        let mut cluster_end = i32::MIN;
        let entries: Vec<(i32, i32, usize)> = self.spans.iter().map(|iv| (iv.start, iv.end, iv.payload.index)).collect();
        for (start, end, index) in entries {
            if start > cluster_end {
                self.close_cluster();
                cluster_end = end;
            } else {
                cluster_end = cluster_end.max(end);
            }
            let m = &read.matches[index];
            self.votes
                .push((m.class_id(self.classification_index), m.aligned_length() as f64));
        }
        self.close_cluster();

        let read_id = self
            .cluster_ids
            .iter()
            .fold(0, |acc, &id| self.tree.lca(acc, id));

        if self.cluster_ids.len() >= 2 {
            for &id in &self.cluster_ids {
                if id != read_id && !self.additional.contains(&id) {
                    self.additional.push(id);
                }
            }
        }
        log::debug!(
            "read {}: {} clusters, ids {:?} -> {}",
            read.uid,
            self.cluster_ids.len(),
            self.cluster_ids,
            read_id
        );
        read_id
    }

    fn lca(&self, id1: i32, id2: i32) -> Result<i32> {
        Ok(self.tree.lca(id1, id2))
    }

    fn additional_class_ids(&self, index: usize, number_of_classifications: usize, out: &mut Vec<Vec<i32>>) -> usize {
        write_additional(&self.additional, index, number_of_classifications, out)
    }

    fn name(&self) -> &'static str {
        "interval-union LCA"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxdb::tests::small_taxonomy;
    use crate::types::Match;

    fn algo() -> IntervalUnionLca {
        IntervalUnionLca::new(Arc::new(small_taxonomy()), 0, 100.0).unwrap()
    }

    #[test]
    fn one_cluster_no_extras() {
        let read = Read::new(
            1,
            3000,
            vec![Match::new(1, vec![1386], 500.0, 1, 600), Match::new(2, vec![91061], 480.0, 400, 1000)],
        );
        let mut lca = algo();
        assert_eq!(lca.compute_id(&ActiveMatches::all(2), &read), 91061);
        let mut rows = Vec::new();
        assert_eq!(lca.additional_class_ids(0, 2, &mut rows), 0);
        assert!(rows.is_empty());
    }

    #[test]
    fn separate_clusters_are_resolved_separately() {
        // two genes: one Bacillus, one E. coli, reverse strand on the second
        let read = Read::new(
            1,
            5000,
            vec![
                Match::new(1, vec![1386], 500.0, 1, 900),
                Match::new(2, vec![1386], 450.0, 50, 880),
                Match::new(3, vec![562], 700.0, 3000, 2000),
            ],
        );
        let mut lca = algo();
        assert_eq!(lca.compute_id(&ActiveMatches::all(3), &read), 2);
        assert_eq!(lca.cluster_ids(), &[1386, 562]);

        let mut rows = Vec::new();
        assert_eq!(lca.additional_class_ids(1, 2, &mut rows), 2);
        assert_eq!(rows, vec![vec![0, 1386], vec![0, 562]]);
    }

    #[test]
    fn dominated_hit_does_not_widen_the_cluster() {
        let read = Read::new(
            1,
            3000,
            vec![
                Match::new(1, vec![1386], 500.0, 1, 900),
                Match::new(2, vec![9606], 120.0, 100, 800),
            ],
        );
        let mut lca = algo();
        assert_eq!(lca.compute_id(&ActiveMatches::all(2), &read), 1386);
        assert_eq!(lca.cluster_ids(), &[1386]);
    }

    #[test]
    fn strands_are_pruned_separately() {
        // the weaker reverse hit overlaps the forward one but is not compared with it
        let read = Read::new(
            1,
            3000,
            vec![
                Match::new(1, vec![1386], 500.0, 1, 900),
                Match::new(2, vec![91061], 120.0, 800, 100),
            ],
        );
        let mut lca = algo();
        assert_eq!(lca.compute_id(&ActiveMatches::all(2), &read), 91061);
    }

    #[test]
    fn scratch_is_cleared_between_reads() {
        let two_genes = Read::new(
            1,
            5000,
            vec![Match::new(1, vec![1386], 500.0, 1, 900), Match::new(2, vec![562], 700.0, 2000, 3000)],
        );
        let one_gene = Read::new(2, 5000, vec![Match::new(1, vec![9606], 500.0, 1, 900)]);
        let mut lca = algo();
        lca.compute_id(&ActiveMatches::all(2), &two_genes);
        assert_eq!(lca.compute_id(&ActiveMatches::all(1), &one_gene), 9606);
        let mut rows = Vec::new();
        assert_eq!(lca.additional_class_ids(0, 1, &mut rows), 0);
        assert_eq!(lca.compute_id(&ActiveMatches::with_len(1), &one_gene), 0);
    }
}
