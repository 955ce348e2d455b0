//src/classify/mod.rs

//! Streaming classification of reads across all classifications.

pub mod accumulator;
pub mod classify_read;
pub mod min_support;

use indicatif::ProgressBar;
use rayon::prelude::*;
use std::sync::Arc;

pub use accumulator::{ClassCount, ClassCounts, InMemorySink, UpdateAccumulator, UpdateSink};
pub use classify_read::{ReadClassifier, ReadOutcome, ReadStatus};
pub use min_support::{support_threshold, MinSupportFilter, ReassignmentMap};

use crate::active_matches::ActiveMatchParams;
use crate::assignment::{AlgorithmParams, AssignmentMode};
use crate::contaminants::ContaminantOracle;
use crate::error::{BinningError, Result};
use crate::read_weight::ReadAssignmentMode;
use crate::reference_cover::ReferenceCoverFilter;
use crate::source::{CancellationToken, MateReader, ReadIterator, ReadQuery, ReadSource};
use crate::taxdb::ClassificationTreeService;

/// One classification to bin into. `name` selects the tree service.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationConfig {
    pub name: String,
    pub mode: AssignmentMode,
}

impl ClassificationConfig {
    pub fn new<S: Into<String>>(name: S, mode: AssignmentMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub classifications: Vec<ClassificationConfig>,
    pub active: ActiveMatchParams,
    pub algorithm: AlgorithmParams,
    /// Reads shorter than this are not classified; 0 disables.
    pub min_read_length: u32,
    /// Reads below this complexity are binned as low complexity; 0 disables.
    pub min_complexity: f32,
    pub min_percent_read_to_cover: f32,
    pub min_percent_reference_to_cover: f32,
    pub read_assignment_mode: ReadAssignmentMode,
    pub long_reads: bool,
    pub paired_reads: bool,
    pub min_support: u64,
    /// When positive, overrides `min_support` with a share of the assigned weight.
    pub min_support_percent: f32,
    /// Which classification is the taxonomy. Defaults to the one named "Taxonomy".
    pub taxonomy_index: Option<usize>,
    /// Keep every emitted tuple in the accumulator.
    pub keep_assignments: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifications: vec![ClassificationConfig::new("Taxonomy", AssignmentMode::NaiveLca)],
            active: ActiveMatchParams::default(),
            algorithm: AlgorithmParams::default(),
            min_read_length: 0,
            min_complexity: 0.0,
            min_percent_read_to_cover: 0.0,
            min_percent_reference_to_cover: 0.0,
            read_assignment_mode: ReadAssignmentMode::ReadCount,
            long_reads: false,
            paired_reads: false,
            min_support: 0,
            min_support_percent: 0.0,
            taxonomy_index: None,
            keep_assignments: true,
        }
    }
}

impl PipelineConfig {
    pub fn taxonomy_index(&self) -> Option<usize> {
        self.taxonomy_index.or_else(|| {
            self.classifications
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case("taxonomy"))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.classifications.is_empty() {
            return Err(BinningError::config("no classifications configured"));
        }
        for (i, c) in self.classifications.iter().enumerate() {
            if self.classifications[..i].iter().any(|other| other.name == c.name) {
                return Err(BinningError::config(format!("classification '{}' listed twice", c.name)));
            }
        }
        self.active.validate()?;
        self.algorithm.validate()?;
        for (what, pct) in [
            ("min percent read to cover", self.min_percent_read_to_cover),
            ("min percent reference to cover", self.min_percent_reference_to_cover),
            ("min support percent", self.min_support_percent),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(BinningError::config(format!("{} must be in 0..=100, got {}", what, pct)));
            }
        }
        if !(self.min_complexity >= 0.0 && self.min_complexity <= 1.0) {
            return Err(BinningError::config(format!(
                "min complexity must be in 0..=1, got {}",
                self.min_complexity
            )));
        }
        if let Some(index) = self.taxonomy_index {
            if index >= self.classifications.len() {
                return Err(BinningError::config(format!(
                    "taxonomy index {} out of range for {} classifications",
                    index,
                    self.classifications.len()
                )));
            }
        }
        Ok(())
    }
}

/// Counters for one run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunStats {
    pub reads: u64,
    pub with_hits: u64,
    pub assigned: u64,
    pub too_short: u64,
    pub low_complexity: u64,
    pub contaminants: u64,
    pub failed_coverage: u64,
    pub errors: u64,
    pub extra_tuples: u64,
    pub total_weight: f64,
    pub reassigned_classes: usize,
}

impl RunStats {
    fn record(&mut self, outcome: &ReadOutcome) {
        self.reads += 1;
        self.total_weight += outcome.weight as f64;
        self.extra_tuples += outcome.extra_rows.len() as u64;
        match outcome.status {
            ReadStatus::TooShort => self.too_short += 1,
            ReadStatus::LowComplexity => self.low_complexity += 1,
            ReadStatus::Contaminant => {
                self.with_hits += 1;
                self.contaminants += 1;
            }
            ReadStatus::Classified => self.with_hits += 1,
            ReadStatus::NoHits => {}
        }
        if outcome.failed_coverage {
            self.failed_coverage += 1;
        }
        if outcome.is_assigned() {
            self.assigned += 1;
        }
    }
}

/// Bins every read of a source and hands the totals to a sink.
pub struct ClassificationPipeline {
    config: PipelineConfig,
    trees: Vec<Arc<dyn ClassificationTreeService>>,
    classifier: ReadClassifier,
    cancel: CancellationToken,
    progress: ProgressBar,
}

impl ClassificationPipeline {
    /// Each configured classification is matched by name against `trees`.
    pub fn new(config: PipelineConfig, trees: &[Arc<dyn ClassificationTreeService>]) -> Result<Self> {
        config.validate()?;
        let mut selected = Vec::with_capacity(config.classifications.len());
        for c in &config.classifications {
            let tree = trees
                .iter()
                .find(|t| t.name() == c.name)
                .ok_or_else(|| BinningError::config(format!("no classification tree named '{}'", c.name)))?;
            selected.push(tree.clone());
        }
        let classifier = ReadClassifier::new(&config, &selected)?;
        Ok(Self {
            config,
            trees: selected,
            classifier,
            cancel: CancellationToken::new(),
            progress: ProgressBar::hidden(),
        })
    }

    pub fn with_contaminants(mut self, oracle: Arc<dyn ContaminantOracle>) -> Self {
        self.classifier.set_contaminants(Some(oracle));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn read_query(&self) -> ReadQuery {
        ReadQuery {
            min_score: self.config.active.min_score,
            max_expected: self.config.active.max_expected,
            want_sequence: false,
            want_matches: true,
        }
    }

    /// Makes one pass over `source`. Per-read data errors are logged and
    /// skipped. On cancellation both streams are closed, nothing reaches the
    /// sink and `BinningError::Cancelled` is returned.
    pub fn run<S: ReadSource + ?Sized>(&mut self, source: &S, sink: &mut dyn UpdateSink) -> Result<RunStats> {
        let query = self.read_query();

        if self.config.min_percent_reference_to_cover > 0.0 {
            let mut filter = ReferenceCoverFilter::new(self.config.min_percent_reference_to_cover)?;
            filter.compute(source, &query, &self.cancel)?;
            self.classifier.set_cover_filter(Some(filter));
        }

        let names = self.config.classifications.iter().map(|c| c.name.clone()).collect();
        let mut accumulator = UpdateAccumulator::new(names, self.config.keep_assignments);
        let mut stats = RunStats::default();

        let mut reads = source.iterator(&query)?;
        let mut mates = if self.config.paired_reads {
            source.mate_reader()?
        } else {
            None
        };
        if self.config.paired_reads && mates.is_none() {
            log::warn!("Paired reads requested but the source has no mates");
        }
        if let Some(max) = reads.maximum() {
            self.progress.set_length(max);
        }

        while let Some(item) = reads.next() {
            if self.cancel.is_cancelled() {
                close_streams(reads.as_mut(), mates.as_deref_mut());
                self.progress.abandon();
                log::info!("Run cancelled after {} reads", stats.reads);
                return Err(BinningError::Cancelled);
            }
            self.progress.inc(1);

            let outcome = match item {
                Ok(read) => self.classifier.classify(read, mates.as_deref_mut()),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(outcome) => {
                    stats.record(&outcome);
                    emit(&mut accumulator, &outcome);
                }
                Err(e @ (BinningError::Data { .. } | BinningError::Parse { .. })) => {
                    log::warn!("Skipping read: {}", e);
                    stats.errors += 1;
                }
                Err(e) => {
                    close_streams(reads.as_mut(), mates.as_deref_mut());
                    return Err(e);
                }
            }
        }
        reads.close()?;
        if let Some(mates) = mates.as_mut() {
            mates.close()?;
        }
        self.progress.finish_and_clear();

        let reassignments = self.apply_min_support(&mut accumulator);
        for (index, map) in reassignments.iter().enumerate() {
            accumulator.apply_reassignments(index, map);
        }
        stats.reassigned_classes = reassignments.iter().map(|m| m.len()).sum();

        log::info!(
            "Binned {} reads: {} with hits, {} assigned, {} too short, {} low complexity, {} contaminants, {} failed coverage, {} skipped",
            stats.reads,
            stats.with_hits,
            stats.assigned,
            stats.too_short,
            stats.low_complexity,
            stats.contaminants,
            stats.failed_coverage,
            stats.errors
        );
        if stats.extra_tuples > 0 {
            log::info!("{} additional assignments from multi-gene reads", stats.extra_tuples);
        }

        sink.consume(accumulator, reassignments)?;
        Ok(stats)
    }

    fn apply_min_support(&self, accumulator: &mut UpdateAccumulator) -> Vec<ReassignmentMap> {
        let n = accumulator.number_of_classifications();
        if self.config.min_support == 0 && self.config.min_support_percent <= 0.0 {
            return vec![ReassignmentMap::new(); n];
        }
        let base = accumulator.assigned_weight(self.config.taxonomy_index().unwrap_or(0));
        let threshold = support_threshold(self.config.min_support, self.config.min_support_percent, base);
        log::info!("Applying min support {} to {} classifications", threshold, n);

        accumulator
            .counts_mut()
            .par_iter_mut()
            .zip(self.trees.par_iter())
            .map(|(counts, tree)| MinSupportFilter::new(tree.as_ref(), threshold).apply(counts))
            .collect()
    }
}

fn emit(accumulator: &mut UpdateAccumulator, outcome: &ReadOutcome) {
    accumulator.add(outcome.read_uid, outcome.weight, &outcome.class_ids, false);
    if outcome.extra_rows.is_empty() {
        return;
    }
    let weight = outcome.extra_weight();
    for row in &outcome.extra_rows {
        accumulator.add(outcome.read_uid, weight, row, true);
    }
}

fn close_streams<'a, 'b>(reads: &mut (dyn ReadIterator + 'a), mates: Option<&mut (dyn MateReader + 'b)>) {
    if let Err(e) = reads.close() {
        log::warn!("Failed to close read iterator: {}", e);
    }
    if let Some(mates) = mates {
        if let Err(e) = mates.close() {
            log::warn!("Failed to close mate reader: {}", e);
        }
    }
}
