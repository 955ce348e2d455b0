//src/assignment/mod.rs

//! Assignment algorithms: turn a read's active matches into one class id
//! (plus, for long reads, extra ids for additional genes).
//!
//! One instance is created per classification and reused for every read of a
//! run. Instances keep scratch buffers between calls; every `compute_id`
//! resets them first, so nothing leaks from one read into the next.

pub mod best_hit;
pub mod interval_union_lca;
pub mod lca;
pub mod multi_gene_best_hit;
pub mod weighted_lca;

use ahash::AHashMap;
use std::sync::Arc;

use crate::active_matches::ActiveMatches;
use crate::error::{BinningError, Result};
use crate::taxdb::ClassificationTreeService;
use crate::types::Read;

pub use best_hit::BestHit;
pub use interval_union_lca::IntervalUnionLca;
pub use lca::NaiveLca;
pub use multi_gene_best_hit::MultiGeneBestHit;
pub use weighted_lca::WeightedLca;

pub trait AssignmentAlgorithm: Send {
    /// Class id for the read, 0 if nothing can be assigned.
    fn compute_id(&mut self, active: &ActiveMatches, read: &Read) -> i32;

    /// Deepest common ancestor of two ids. Only algorithms that reconcile
    /// independent calls (the LCA family) support this.
    fn lca(&self, id1: i32, id2: i32) -> Result<i32>;

    /// Extra ids found by the last `compute_id`, written into column `index`
    /// of `out` (one row per extra segment, `number_of_classifications`
    /// columns, missing rows are appended zero-filled). Returns how many.
    fn additional_class_ids(&self, _index: usize, _number_of_classifications: usize, _out: &mut Vec<Vec<i32>>) -> usize {
        0
    }

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentMode {
    BestHit,
    NaiveLca,
    WeightedLca,
    /// Interval-union LCA for long reads.
    LongReadLca,
    MultiGeneBestHit,
}

impl AssignmentMode {
    /// Modes whose ids can be reconciled with `lca` (mate pairs, coverage gate).
    pub fn uses_lca(self) -> bool {
        matches!(self, Self::NaiveLca | Self::WeightedLca | Self::LongReadLca)
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "besthit" | "best-hit" => Ok(Self::BestHit),
            "naive" | "lca" => Ok(Self::NaiveLca),
            "weighted" => Ok(Self::WeightedLca),
            "longreads" | "long-reads" => Ok(Self::LongReadLca),
            "multigene" | "multi-gene" => Ok(Self::MultiGeneBestHit),
            other => Err(BinningError::config(format!("unknown assignment mode '{}'", other))),
        }
    }
}

/// Minimum percent identity required to place a read at a given rank.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentIdentityByRank {
    thresholds: Vec<(String, f32)>,
}

impl Default for PercentIdentityByRank {
    fn default() -> Self {
        Self {
            thresholds: vec![
                ("species".to_string(), 99.0),
                ("genus".to_string(), 97.0),
                ("family".to_string(), 95.0),
                ("order".to_string(), 90.0),
                ("class".to_string(), 85.0),
                ("phylum".to_string(), 80.0),
            ],
        }
    }
}

impl PercentIdentityByRank {
    pub fn new(thresholds: Vec<(String, f32)>) -> Result<Self> {
        if let Some((rank, pct)) = thresholds.iter().find(|(_, p)| !(0.0..=100.0).contains(p)) {
            return Err(BinningError::config(format!(
                "identity threshold for rank '{}' out of range: {}",
                rank, pct
            )));
        }
        Ok(Self { thresholds })
    }

    /// Parses `rank=pct` pairs separated by commas, or `default` for the
    /// built-in table.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("default") {
            return Ok(Self::default());
        }
        let mut thresholds = Vec::new();
        for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (rank, pct) = pair
                .split_once('=')
                .ok_or_else(|| BinningError::config(format!("expected RANK=PERCENT, got '{}'", pair)))?;
            let pct: f32 = pct
                .trim()
                .parse()
                .map_err(|_| BinningError::config(format!("bad identity percent '{}'", pct)))?;
            thresholds.push((rank.trim().to_ascii_lowercase(), pct));
        }
        Self::new(thresholds)
    }

    fn threshold(&self, rank: &str) -> Option<f32> {
        self.thresholds.iter().find(|(r, _)| r == rank).map(|&(_, p)| p)
    }

    /// Moves `id` up until the best identity satisfies the rank's threshold.
    pub fn apply(&self, tree: &dyn ClassificationTreeService, mut id: i32, best_identity: f32) -> i32 {
        while id > 0 {
            match tree.rank(id).and_then(|r| self.threshold(r)) {
                Some(min) if best_identity < min => match tree.parent(id) {
                    Some(p) => id = p,
                    None => break,
                },
                _ => break,
            }
        }
        id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmParams {
    /// Percent of active matches the naive (and long-read) LCA must cover.
    pub lca_coverage_percent: f32,
    /// Percent of total score the weighted LCA must cover.
    pub weighted_lca_percent: f32,
    /// Kept for multi-gene best hit, not used by its dominance rule.
    pub min_overlap: i32,
    pub identity_by_rank: Option<PercentIdentityByRank>,
}

impl Default for AlgorithmParams {
    fn default() -> Self {
        Self {
            lca_coverage_percent: 100.0,
            weighted_lca_percent: 80.0,
            min_overlap: 18,
            identity_by_rank: None,
        }
    }
}

impl AlgorithmParams {
    pub fn validate(&self) -> Result<()> {
        for (what, pct) in [
            ("LCA coverage percent", self.lca_coverage_percent),
            ("weighted LCA percent", self.weighted_lca_percent),
        ] {
            if !(pct > 0.0 && pct <= 100.0) {
                return Err(BinningError::config(format!("{} must be in (0, 100], got {}", what, pct)));
            }
        }
        if self.min_overlap < 0 {
            return Err(BinningError::config(format!(
                "min overlap must not be negative, got {}",
                self.min_overlap
            )));
        }
        Ok(())
    }
}

/// Builds the algorithm for one classification.
pub fn create_algorithm(
    mode: AssignmentMode,
    params: &AlgorithmParams,
    tree: Arc<dyn ClassificationTreeService>,
    classification_index: usize,
) -> Result<Box<dyn AssignmentAlgorithm>> {
    params.validate()?;
    let algorithm: Box<dyn AssignmentAlgorithm> = match mode {
        AssignmentMode::BestHit => Box::new(BestHit::new(classification_index)),
        AssignmentMode::NaiveLca => Box::new(NaiveLca::new(
            tree,
            classification_index,
            params.lca_coverage_percent,
            params.identity_by_rank.clone(),
        )?),
        AssignmentMode::WeightedLca => Box::new(WeightedLca::new(
            tree,
            classification_index,
            params.weighted_lca_percent,
            params.identity_by_rank.clone(),
        )?),
        AssignmentMode::LongReadLca => Box::new(IntervalUnionLca::new(
            tree,
            classification_index,
            params.lca_coverage_percent,
        )?),
        AssignmentMode::MultiGeneBestHit => Box::new(MultiGeneBestHit::new(classification_index, params.min_overlap)?),
    };
    log::debug!("Classification {} uses {}", classification_index, algorithm.name());
    Ok(algorithm)
}

/// Deepest node that collects at least `percent` of the vote weight.
///
/// Each `(id, weight)` vote counts for the id and all its ancestors. With
/// 100 percent this is the plain LCA of all voted ids. Ids that are not
/// positive or not in the tree are ignored; returns 0 if none remain.
/// Between equally deep candidates the heavier one wins, then the smaller id.
pub(crate) fn cover_lca(
    tree: &dyn ClassificationTreeService,
    votes: &[(i32, f64)],
    percent: f32,
    tally: &mut AHashMap<i32, f64>,
) -> i32 {
    tally.clear();
    let mut first = 0;
    let mut single = true;
    let mut total = 0.0f64;
    let mut weightless = true;
    for &(id, w) in votes {
        if id <= 0 || !tree.is_known(id) {
            continue;
        }
        if first == 0 {
            first = id;
        } else if id != first {
            single = false;
        }
        if w > 0.0 {
            weightless = false;
        }
    }
    if first == 0 {
        return 0;
    }
    if single {
        return first;
    }
    for &(id, w) in votes {
        if id <= 0 || !tree.is_known(id) {
            continue;
        }
        // all zero weights degrade to a plain count vote
        let w = if weightless { 1.0 } else { w.max(0.0) };
        total += w;
        for node in tree.path_to_root(id) {
            *tally.entry(node).or_insert(0.0) += w;
        }
    }
    let threshold = (percent as f64 / 100.0) * total;
    let slack = 1e-9 * total;
    let mut best: Option<(usize, f64, i32)> = None;
    for (&node, &weight) in tally.iter() {
        if weight + slack < threshold {
            continue;
        }
        let depth = tree.depth(node).unwrap_or(0);
        let better = match best {
            None => true,
            Some((bd, bw, bid)) => {
                depth > bd || (depth == bd && (weight > bw || (weight == bw && node < bid)))
            }
        };
        if better {
            best = Some((depth, weight, node));
        }
    }
    best.map(|(_, _, id)| id).unwrap_or_else(|| tree.root())
}

/// Writes `ids` into column `index` of `out`, one row per id.
pub(crate) fn write_additional(ids: &[i32], index: usize, number_of_classifications: usize, out: &mut Vec<Vec<i32>>) -> usize {
    for (row, &id) in ids.iter().enumerate() {
        if out.len() <= row {
            out.push(vec![0; number_of_classifications]);
        }
        if let Some(cell) = out[row].get_mut(index) {
            *cell = id;
        }
    }
    ids.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxdb::tests::small_taxonomy;

    #[test]
    fn cover_lca_at_full_percent_is_plain_lca() {
        let tree = small_taxonomy();
        let mut tally = AHashMap::new();
        let votes = [(1386, 1.0), (562, 1.0)];
        assert_eq!(cover_lca(&tree, &votes, 100.0, &mut tally), 2);
        assert_eq!(cover_lca(&tree, &[(562, 1.0), (562, 3.0)], 100.0, &mut tally), 562);
        assert_eq!(cover_lca(&tree, &[(0, 1.0), (-2, 1.0)], 100.0, &mut tally), 0);
    }

    #[test]
    fn cover_lca_ignores_minority_below_percent() {
        let tree = small_taxonomy();
        let mut tally = AHashMap::new();
        let votes = [(1386, 40.0), (1386, 45.0), (9606, 10.0)];
        assert_eq!(cover_lca(&tree, &votes, 80.0, &mut tally), 1386);
        assert_eq!(cover_lca(&tree, &votes, 100.0, &mut tally), 1);
    }

    #[test]
    fn identity_filter_climbs_ranks() {
        let tree = small_taxonomy();
        let filter = PercentIdentityByRank::default();
        assert_eq!(filter.apply(&tree, 562, 99.5), 562);
        // 562 is a species, 1224 a phylum needing 80%
        assert_eq!(filter.apply(&tree, 562, 90.0), 1224);
        assert_eq!(filter.apply(&tree, 562, 50.0), 2);
    }

    #[test]
    fn identity_table_from_text() {
        assert_eq!(PercentIdentityByRank::parse("default").unwrap(), PercentIdentityByRank::default());
        let filter = PercentIdentityByRank::parse("Species=98, phylum=70").unwrap();
        let tree = small_taxonomy();
        assert_eq!(filter.apply(&tree, 562, 98.5), 562);
        assert_eq!(filter.apply(&tree, 562, 75.0), 1224);
        assert!(PercentIdentityByRank::parse("genus").is_err());
        assert!(PercentIdentityByRank::parse("genus=120").is_err());
    }

    #[test]
    fn factory_rejects_bad_params() {
        let tree: Arc<dyn ClassificationTreeService> = Arc::new(small_taxonomy());
        let params = AlgorithmParams {
            min_overlap: -1,
            ..Default::default()
        };
        assert!(matches!(
            create_algorithm(AssignmentMode::MultiGeneBestHit, &params, tree.clone(), 0),
            Err(BinningError::Config { .. })
        ));
        let params = AlgorithmParams {
            weighted_lca_percent: 0.0,
            ..Default::default()
        };
        assert!(create_algorithm(AssignmentMode::WeightedLca, &params, tree, 0).is_err());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(AssignmentMode::parse("weighted").unwrap(), AssignmentMode::WeightedLca);
        assert_eq!(AssignmentMode::parse("multi-gene").unwrap(), AssignmentMode::MultiGeneBestHit);
        assert!(AssignmentMode::parse("majority").is_err());
        assert!(AssignmentMode::LongReadLca.uses_lca());
        assert!(!AssignmentMode::BestHit.uses_lca());
    }
}
