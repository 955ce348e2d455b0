// src/lib.rs
pub mod active_matches;
pub mod assignment;
pub mod classify;
pub mod contaminants;
pub mod error;
pub mod interval_tree;
pub mod match_file;
pub mod read_weight;
pub mod reference_cover;
pub mod report;
pub mod source;
pub mod taxdb;
pub mod types;

use ahash::AHashMap;
use indicatif::ProgressBar;
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use crate::error::{BinningError, Result};

use crate::classify::{ClassificationPipeline, InMemorySink, PipelineConfig, ReassignmentMap, RunStats, UpdateAccumulator};
use crate::contaminants::ContaminantManager;
use crate::match_file::open_match_file;
use crate::report::{build_class_report, format_report};
use crate::source::CancellationToken;
use crate::taxdb::{ClassificationTree, ClassificationTreeService};
use crate::types::ClassReportRow;

/// Result of binning one match file. Text outputs are generated on demand.
pub struct BinningResults {
    pub accumulator: UpdateAccumulator,
    /// Per classification: classes folded away by the min-support filter.
    pub reassignments: Vec<ReassignmentMap>,
    pub stats: RunStats,
    /// Read uid -> read name, for the per-read output.
    pub read_names: AHashMap<u64, String>,
    /// One report per classification, if requested.
    pub report_rows: Option<Vec<Vec<ClassReportRow>>>,
}

impl BinningResults {
    /// One line per tuple: `A` for a read's primary assignment, `X` for the
    /// additional rows of multi-gene reads.
    pub fn get_assignment_output(&self) -> String {
        let mut output = String::new();
        output.push_str("#kind\tread\tweight");
        for name in self.accumulator.classification_names() {
            output.push('\t');
            output.push_str(name);
        }
        output.push('\n');

        for tuple in self.accumulator.assignments() {
            let name = self
                .read_names
                .get(&tuple.read_uid)
                .cloned()
                .unwrap_or_else(|| tuple.read_uid.to_string());
            let ids: Vec<String> = tuple.class_ids.iter().map(|id| id.to_string()).collect();
            // writing into a String cannot fail
            let _ = writeln!(
                output,
                "{}\t{}\t{:.2}\t{}",
                if tuple.extra { 'X' } else { 'A' },
                name,
                tuple.weight,
                ids.join("\t")
            );
        }
        output
    }

    /// Report text for one classification.
    pub fn get_report(&self, classification: &str) -> Option<String> {
        let index = self.accumulator.index_of(classification)?;
        self.report_rows
            .as_ref()
            .and_then(|reports| reports.get(index))
            .map(|rows| format_report(rows))
    }
}

/// Bins the reads of one match file.
///
/// `taxdb_paths` names the taxDB file of every classification in `config`;
/// contaminant ids refer to the taxonomy classification.
pub fn bin_matches_file<P: AsRef<Path>>(
    matches_path: P,
    taxdb_paths: &[(String, PathBuf)],
    config: PipelineConfig,
    contaminant_ids: &[i32],
    generate_report: bool,
    progress: Option<ProgressBar>,
    cancel: Option<CancellationToken>,
) -> Result<BinningResults> {
    // 1. Load classification trees
    let mut trees: Vec<Arc<dyn ClassificationTreeService>> = Vec::with_capacity(taxdb_paths.len());
    for (name, path) in taxdb_paths {
        let tree = ClassificationTree::from_taxdb(name, path)?;
        log::info!("Loaded {} classes for '{}'", tree.len(), name);
        trees.push(Arc::new(tree));
    }

    // 2. Load reads
    let source = open_match_file(matches_path)?;
    let read_names = source.reads().iter().map(|r| (r.uid, r.name.clone())).collect();

    // 3. Set up the pipeline
    let taxonomy_index = config.taxonomy_index();
    let mut pipeline = ClassificationPipeline::new(config, &trees)?;
    if !contaminant_ids.is_empty() {
        let taxonomy = taxonomy_index
            .and_then(|i| pipeline.config().classifications.get(i))
            .and_then(|c| trees.iter().find(|t| t.name() == c.name))
            .ok_or_else(|| BinningError::config("contaminants given but no taxonomy classification"))?;
        let manager = ContaminantManager::new(taxonomy.clone(), contaminant_ids.iter().copied());
        pipeline = pipeline.with_contaminants(Arc::new(manager));
    }
    if let Some(progress) = progress {
        pipeline = pipeline.with_progress(progress);
    }
    if let Some(cancel) = cancel {
        pipeline = pipeline.with_cancellation(cancel);
    }

    // 4. Run
    let mut sink = InMemorySink::default();
    let stats = pipeline.run(&source, &mut sink)?;
    let accumulator = sink
        .accumulator
        .ok_or_else(|| BinningError::config("pipeline finished without a result"))?;

    // 5. Reports
    let report_rows = if generate_report {
        let rows = pipeline
            .config()
            .classifications
            .iter()
            .enumerate()
            .map(|(index, c)| {
                trees
                    .iter()
                    .find(|t| t.name() == c.name)
                    .map(|tree| build_class_report(tree.as_ref(), accumulator.counts(index)))
                    .unwrap_or_default()
            })
            .collect();
        Some(rows)
    } else {
        None
    };

    Ok(BinningResults {
        accumulator,
        reassignments: sink.reassignments,
        stats,
        read_names,
        report_rows,
    })
}
