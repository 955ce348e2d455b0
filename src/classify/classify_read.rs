//src/classify/classify_read.rs

use std::sync::Arc;

use super::PipelineConfig;
use crate::active_matches::{compute_active, is_read_covered, ActiveMatchParams};
use crate::assignment::{create_algorithm, AssignmentAlgorithm, AssignmentMode};
use crate::contaminants::ContaminantOracle;
use crate::error::Result;
use crate::read_weight::{ReadAssignmentCalculator, ReadAssignmentMode};
use crate::reference_cover::ReferenceCoverFilter;
use crate::source::MateReader;
use crate::taxdb::ClassificationTreeService;
use crate::types::{Read, CONTAMINANTS_ID, LOW_COMPLEXITY_ID, NOHITS_ID, UNASSIGNED_ID};

/// How a read left the per-read state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Classified,
    NoHits,
    TooShort,
    LowComplexity,
    Contaminant,
}

/// Everything the pipeline emits for one read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub read_uid: u64,
    pub weight: f32,
    /// One id per classification, already resolved to a class or a reserved id.
    pub class_ids: Vec<i32>,
    /// Extra rows from multi-gene assignment; 0 means nothing for that column.
    pub extra_rows: Vec<Vec<i32>>,
    pub status: ReadStatus,
    /// Some LCA classification rejected the read for covering too little of it.
    pub failed_coverage: bool,
}

impl ReadOutcome {
    fn uniform(read_uid: u64, weight: f32, n: usize, class_id: i32, status: ReadStatus) -> Self {
        Self {
            read_uid,
            weight,
            class_ids: vec![class_id; n],
            extra_rows: Vec::new(),
            status,
            failed_coverage: false,
        }
    }

    /// Weight carried by each extra row.
    pub fn extra_weight(&self) -> f32 {
        self.weight / (1 + self.extra_rows.len()) as f32
    }

    pub fn is_assigned(&self) -> bool {
        self.class_ids.iter().any(|&id| id > 0)
    }
}

pub(crate) struct ClassificationSlot {
    pub(crate) mode: AssignmentMode,
    pub(crate) tree: Arc<dyn ClassificationTreeService>,
    pub(crate) algorithm: Box<dyn AssignmentAlgorithm>,
}

/// Runs one read through gating, per-classification assignment, mate
/// reconciliation, contaminant gating and sentinel resolution.
///
/// Algorithm instances are owned here and reused from read to read.
pub struct ReadClassifier {
    slots: Vec<ClassificationSlot>,
    active_params: ActiveMatchParams,
    weights: ReadAssignmentCalculator,
    min_read_length: u32,
    min_complexity: f32,
    min_percent_read_to_cover: f32,
    use_union_coverage: bool,
    long_reads: bool,
    paired_reads: bool,
    taxonomy_index: Option<usize>,
    contaminants: Option<Arc<dyn ContaminantOracle>>,
    cover_filter: Option<ReferenceCoverFilter>,
}

impl ReadClassifier {
    /// `trees` must line up with `config.classifications`.
    pub fn new(config: &PipelineConfig, trees: &[Arc<dyn ClassificationTreeService>]) -> Result<Self> {
        let mut slots = Vec::with_capacity(config.classifications.len());
        for (index, (classification, tree)) in config.classifications.iter().zip(trees).enumerate() {
            let algorithm = create_algorithm(classification.mode, &config.algorithm, tree.clone(), index)?;
            slots.push(ClassificationSlot {
                mode: classification.mode,
                tree: tree.clone(),
                algorithm,
            });
        }
        let active_params = if config.long_reads {
            config.active.without_top_percent()
        } else {
            config.active
        };
        Ok(Self {
            slots,
            active_params,
            weights: ReadAssignmentCalculator::new(config.read_assignment_mode),
            min_read_length: config.min_read_length,
            min_complexity: config.min_complexity,
            min_percent_read_to_cover: config.min_percent_read_to_cover,
            use_union_coverage: config.long_reads
                || config.read_assignment_mode == ReadAssignmentMode::AlignedBases,
            long_reads: config.long_reads,
            paired_reads: config.paired_reads,
            taxonomy_index: config.taxonomy_index(),
            contaminants: None,
            cover_filter: None,
        })
    }

    pub fn set_contaminants(&mut self, oracle: Option<Arc<dyn ContaminantOracle>>) {
        self.contaminants = oracle;
    }

    pub fn set_cover_filter(&mut self, filter: Option<ReferenceCoverFilter>) {
        self.cover_filter = filter;
    }

    pub fn number_of_classifications(&self) -> usize {
        self.slots.len()
    }

    pub fn classify<'m>(&mut self, mut read: Read, mates: Option<&mut (dyn MateReader + 'm)>) -> Result<ReadOutcome> {
        read.validate()?;
        let n = self.slots.len();
        let weight = self.weights.assign(&mut read);

        let low_complexity = self.min_complexity > 0.0
            && read.complexity.map_or(false, |c| c < self.min_complexity);
        if low_complexity {
            return Ok(ReadOutcome::uniform(read.uid, weight, n, LOW_COMPLEXITY_ID, ReadStatus::LowComplexity));
        }
        if self.min_read_length > 0 && read.length < self.min_read_length {
            return Ok(ReadOutcome::uniform(read.uid, weight, n, UNASSIGNED_ID, ReadStatus::TooShort));
        }
        if !read.has_any_matches() {
            return Ok(ReadOutcome::uniform(read.uid, weight, n, NOHITS_ID, ReadStatus::NoHits));
        }

        let mate = match read.mate_uid {
            Some(mate_uid) if self.paired_reads && self.slots.iter().any(|s| s.mode.uses_lca()) => {
                fetch_mate(mates, mate_uid)?
            }
            _ => None,
        };

        let mut class_ids = vec![0; n];
        let mut extra_rows: Vec<Vec<i32>> = Vec::new();
        let mut failed_coverage = false;
        let mut contaminant = false;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let active = compute_active(&read, index, &self.active_params, self.cover_filter.as_ref());
            let is_taxonomy = self.taxonomy_index == Some(index);

            if is_taxonomy && !self.long_reads {
                if let Some(oracle) = &self.contaminants {
                    contaminant |= oracle.is_contaminant_short_read(&read, &active, index);
                }
            }
            let mut id = 0;
            if !active.is_empty() {
                if slot.mode.uses_lca()
                    && !is_read_covered(&read, &active, self.min_percent_read_to_cover, self.use_union_coverage)
                {
                    log::debug!("Read {} covers too little for classification {}", read.uid, index);
                    failed_coverage = true;
                    continue;
                }
                id = slot.algorithm.compute_id(&active, &read);
                // extra ids belong to the read itself, collect them before the mate reuses the scratch state
                slot.algorithm.additional_class_ids(index, n, &mut extra_rows);
            }

            if slot.mode.uses_lca() {
                if let Some(mate) = &mate {
                    let mate_active = compute_active(mate, index, &self.active_params, self.cover_filter.as_ref());
                    if !mate_active.is_empty()
                        && is_read_covered(mate, &mate_active, self.min_percent_read_to_cover, self.use_union_coverage)
                    {
                        let mate_id = slot.algorithm.compute_id(&mate_active, mate);
                        id = reconcile_mates(slot.algorithm.as_ref(), id, mate_id)?;
                    }
                }
            }
            class_ids[index] = id;

            if is_taxonomy && self.long_reads {
                if let Some(oracle) = &self.contaminants {
                    contaminant |= id > 0 && oracle.is_contaminant_long_read(id);
                }
            }
        }

        if contaminant {
            return Ok(ReadOutcome::uniform(read.uid, weight, n, CONTAMINANTS_ID, ReadStatus::Contaminant));
        }

        for (id, slot) in class_ids.iter_mut().zip(&self.slots) {
            if *id <= 0 || !slot.tree.is_known(*id) {
                *id = UNASSIGNED_ID;
            }
        }
        for row in &mut extra_rows {
            for (id, slot) in row.iter_mut().zip(&self.slots) {
                if *id > 0 && !slot.tree.is_known(*id) {
                    *id = 0;
                }
            }
        }
        extra_rows.retain(|row| row.iter().any(|&id| id != 0));

        Ok(ReadOutcome {
            read_uid: read.uid,
            weight,
            class_ids,
            extra_rows,
            status: ReadStatus::Classified,
            failed_coverage,
        })
    }
}

fn fetch_mate<'m>(mates: Option<&mut (dyn MateReader + 'm)>, mate_uid: u64) -> Result<Option<Read>> {
    let Some(reader) = mates else {
        return Ok(None);
    };
    if !reader.seek(mate_uid)? {
        log::debug!("Mate {} not found", mate_uid);
        return Ok(None);
    }
    let mate = reader.read_one()?;
    if let Some(mate) = &mate {
        mate.validate()?;
    }
    Ok(mate)
}

/// Combines a read's id with its mate's.
///
/// The mate wins when the read has no id, or when the mate lies in the read's
/// subtree (the mate is at least as specific). Otherwise the read keeps its id.
fn reconcile_mates(algorithm: &dyn AssignmentAlgorithm, read_id: i32, mate_id: i32) -> Result<i32> {
    if mate_id <= 0 {
        return Ok(read_id);
    }
    if read_id <= 0 {
        return Ok(mate_id);
    }
    let both = algorithm.lca(read_id, mate_id)?;
    Ok(if both == read_id { mate_id } else { read_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::BestHit;
    use crate::classify::ClassificationConfig;
    use crate::contaminants::ContaminantManager;
    use crate::source::{InMemoryReadSource, ReadSource};
    use crate::taxdb::tests::small_taxonomy;
    use crate::types::Match;

    fn taxonomy() -> Arc<dyn ClassificationTreeService> {
        Arc::new(small_taxonomy())
    }

    fn config(mode: AssignmentMode) -> PipelineConfig {
        PipelineConfig {
            classifications: vec![ClassificationConfig::new("Taxonomy", mode)],
            ..PipelineConfig::default()
        }
    }

    fn classifier(config: &PipelineConfig) -> ReadClassifier {
        ReadClassifier::new(config, &[taxonomy()]).unwrap()
    }

    fn m(uid: u64, tax: i32, score: f32) -> Match {
        Match::new(uid, vec![tax], score, 1, 150)
    }

    #[test]
    fn gates_come_before_matches() {
        let mut cfg = config(AssignmentMode::NaiveLca);
        cfg.min_read_length = 100;
        cfg.min_complexity = 0.3;
        let mut c = classifier(&cfg);

        let short = Read::new(1, 50, vec![m(1, 562, 100.0)]);
        let out = c.classify(short, None).unwrap();
        assert_eq!(out.status, ReadStatus::TooShort);
        assert_eq!(out.class_ids, vec![UNASSIGNED_ID]);

        // low complexity beats too short
        let both = Read::new(2, 50, vec![m(1, 562, 100.0)]).with_complexity(0.1);
        assert_eq!(c.classify(both, None).unwrap().class_ids, vec![LOW_COMPLEXITY_ID]);

        let no_hits = Read::new(3, 150, Vec::new());
        assert_eq!(c.classify(no_hits, None).unwrap().class_ids, vec![NOHITS_ID]);
    }

    #[test]
    fn inactive_and_unknown_ids_become_unassigned() {
        let mut c = classifier(&config(AssignmentMode::BestHit));
        let weak = Read::new(1, 150, vec![m(1, 562, 10.0)]);
        assert_eq!(c.classify(weak, None).unwrap().class_ids, vec![UNASSIGNED_ID]);
        let unknown = Read::new(2, 150, vec![m(1, 424242, 100.0)]);
        assert_eq!(c.classify(unknown, None).unwrap().class_ids, vec![UNASSIGNED_ID]);
    }

    #[test]
    fn coverage_gate_only_for_lca_modes() {
        let mut cfg = config(AssignmentMode::NaiveLca);
        cfg.min_percent_read_to_cover = 80.0;
        let read = Read::new(1, 1000, vec![m(1, 562, 100.0)]);
        let out = classifier(&cfg).classify(read.clone(), None).unwrap();
        assert!(out.failed_coverage);
        assert_eq!(out.class_ids, vec![UNASSIGNED_ID]);

        cfg.classifications[0].mode = AssignmentMode::BestHit;
        let out = classifier(&cfg).classify(read, None).unwrap();
        assert!(!out.failed_coverage);
        assert_eq!(out.class_ids, vec![562]);
    }

    #[test]
    fn mate_refines_and_fills_in() {
        let mut cfg = config(AssignmentMode::NaiveLca);
        cfg.paired_reads = true;
        let mut c = classifier(&cfg);
        let reads = InMemoryReadSource::new(vec![
            Read::new(1, 150, vec![m(1, 2, 100.0)]).with_mate(2),
            Read::new(2, 150, vec![m(2, 1239, 100.0)]).with_mate(1),
            Read::new(3, 150, vec![m(3, 10, 1.0)]).with_mate(4),
            Read::new(4, 150, vec![m(4, 562, 100.0)]).with_mate(3),
            Read::new(5, 150, vec![m(5, 1239, 100.0)]).with_mate(6),
            Read::new(6, 150, vec![m(6, 562, 100.0)]).with_mate(5),
        ]);
        let mut mates = reads.mate_reader().unwrap();
        let mut classify = |i: usize| {
            let read = reads.reads()[i].clone();
            c.classify(read, mates.as_deref_mut()).unwrap().class_ids[0]
        };
        // mate lies below the read
        assert_eq!(classify(0), 1239);
        // read has nothing active, mate fills in
        assert_eq!(classify(2), 562);
        // disjoint subtrees, read keeps its id
        assert_eq!(classify(4), 1239);
    }

    #[test]
    fn mate_failing_coverage_is_ignored() {
        let mut cfg = config(AssignmentMode::NaiveLca);
        cfg.paired_reads = true;
        cfg.min_percent_read_to_cover = 80.0;
        let mut c = classifier(&cfg);
        let reads = InMemoryReadSource::new(vec![
            Read::new(1, 150, vec![m(1, 2, 100.0)]).with_mate(2),
            Read::new(2, 150, vec![Match::new(2, vec![1239], 100.0, 1, 10)]).with_mate(1),
        ]);
        let mut mates = reads.mate_reader().unwrap();

        let out = c.classify(reads.reads()[0].clone(), mates.as_deref_mut()).unwrap();
        assert_eq!(out.class_ids, vec![2]);
        assert!(!out.failed_coverage);

        let out = c.classify(reads.reads()[1].clone(), mates.as_deref_mut()).unwrap();
        assert!(out.failed_coverage);
        assert_eq!(out.class_ids, vec![UNASSIGNED_ID]);
    }

    #[test]
    fn broken_mate_is_a_data_error() {
        let mut cfg = config(AssignmentMode::NaiveLca);
        cfg.paired_reads = true;
        let mut c = classifier(&cfg);
        let reads = InMemoryReadSource::new(vec![
            Read::new(1, 150, vec![m(1, 2, 100.0)]).with_mate(2),
            Read::new(2, 150, vec![m(2, 1239, f32::NAN)]).with_mate(1),
        ]);
        let mut mates = reads.mate_reader().unwrap();
        let result = c.classify(reads.reads()[0].clone(), mates.as_deref_mut());
        assert!(matches!(result, Err(crate::error::BinningError::Data { read_uid: 2, .. })));
    }

    #[test]
    fn filtered_out_matches_are_not_no_hits() {
        let mut c = classifier(&config(AssignmentMode::NaiveLca));
        let mut read = Read::new(1, 150, Vec::new());
        read.matches_before_filter = Some(1);
        let out = c.classify(read, None).unwrap();
        assert_eq!(out.status, ReadStatus::Classified);
        assert_eq!(out.class_ids, vec![UNASSIGNED_ID]);
    }

    #[test]
    fn best_hit_cannot_reconcile() {
        let algo = BestHit::new(0);
        assert!(reconcile_mates(&algo, 562, 1239).is_err());
        assert_eq!(reconcile_mates(&algo, 0, 1239).unwrap(), 1239);
        assert_eq!(reconcile_mates(&algo, 562, 0).unwrap(), 562);
    }

    #[test]
    fn contaminant_short_read_sticks_everywhere() {
        let tree = taxonomy();
        let mut cfg = config(AssignmentMode::NaiveLca);
        cfg.classifications.push(ClassificationConfig::new("SEED", AssignmentMode::BestHit));
        let mut c = ReadClassifier::new(&cfg, &[tree.clone(), tree.clone()]).unwrap();
        c.set_contaminants(Some(Arc::new(ContaminantManager::new(tree, [9606]))));
        let read = Read::new(
            1,
            150,
            vec![
                Match::new(1, vec![562, 562], 100.0, 1, 150),
                Match::new(2, vec![9606, 9606], 95.0, 1, 150),
            ],
        );
        let out = c.classify(read, None).unwrap();
        assert_eq!(out.status, ReadStatus::Contaminant);
        assert_eq!(out.class_ids, vec![CONTAMINANTS_ID, CONTAMINANTS_ID]);
    }

    #[test]
    fn contaminant_long_read_judged_by_assigned_taxon() {
        let tree = taxonomy();
        let mut cfg = config(AssignmentMode::LongReadLca);
        cfg.long_reads = true;
        let mut c = ReadClassifier::new(&cfg, &[tree.clone()]).unwrap();
        c.set_contaminants(Some(Arc::new(ContaminantManager::new(tree, [9606]))));
        let read = Read::new(
            1,
            2000,
            vec![
                Match::new(1, vec![562], 300.0, 1, 800),
                Match::new(2, vec![9606], 100.0, 1000, 1800),
            ],
        );
        // the LCA of both loci is the root, which is not a contaminant
        let out = c.classify(read, None).unwrap();
        assert_ne!(out.status, ReadStatus::Contaminant);
    }

    #[test]
    fn bad_read_is_a_data_error() {
        let mut c = classifier(&config(AssignmentMode::BestHit));
        let read = Read::new(1, 150, vec![m(1, 562, f32::NAN)]);
        assert!(matches!(c.classify(read, None), Err(crate::error::BinningError::Data { .. })));
    }
}
