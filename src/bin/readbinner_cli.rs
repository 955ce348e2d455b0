use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use readbinner::assignment::{AlgorithmParams, AssignmentMode, PercentIdentityByRank};
use readbinner::active_matches::ActiveMatchParams;
use readbinner::bin_matches_file;
use readbinner::classify::{ClassificationConfig, PipelineConfig};
use readbinner::read_weight::ReadAssignmentMode;
use readbinner::BinningError;

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Bin reads into taxonomic and functional classes from precomputed alignments.
#[derive(Parser, Debug)]
#[command(name = "readbinner", version, about)]
struct Args {
    /// Tab-separated match file (optionally .gz)
    matches: PathBuf,

    /// taxDB file of the taxonomy
    #[arg(long)]
    taxdb: PathBuf,

    /// Taxonomy assignment: naive, weighted, longreads or besthit
    #[arg(long, default_value = "naive")]
    taxonomy_mode: String,

    /// Functional classification as NAME=TAXDB_PATH; repeatable
    #[arg(long = "function", value_name = "NAME=PATH")]
    functions: Vec<String>,

    /// Functional assignment: besthit, multigene, naive, weighted or longreads
    #[arg(long, default_value = "besthit")]
    function_mode: String,

    #[arg(long, default_value_t = 50.0)]
    min_score: f32,

    #[arg(long, default_value_t = 10.0)]
    top_percent: f32,

    #[arg(long, default_value_t = 0.01)]
    max_expected: f64,

    #[arg(long, default_value_t = 0.0)]
    min_percent_identity: f32,

    /// Percent of matches the naive LCA must cover
    #[arg(long, default_value_t = 100.0)]
    lca_percent: f32,

    /// Percent of total score the weighted LCA must cover
    #[arg(long, default_value_t = 80.0)]
    weighted_lca_percent: f32,

    #[arg(long, default_value_t = 18)]
    min_overlap: i32,

    /// Cap LCA calls by best identity, as RANK=PCT pairs; no value uses the built-in table
    #[arg(long, value_name = "RANK=PCT,...", num_args = 0..=1, default_missing_value = "default")]
    identity_by_rank: Option<String>,

    #[arg(long, default_value_t = 0)]
    min_read_length: u32,

    #[arg(long, default_value_t = 0.0)]
    min_complexity: f32,

    #[arg(long, default_value_t = 0.0)]
    min_percent_read_to_cover: f32,

    #[arg(long, default_value_t = 0.0)]
    min_percent_reference_to_cover: f32,

    /// readCount, readMagnitude, readLength or alignedBases
    #[arg(long, default_value = "readCount")]
    read_assignment_mode: String,

    #[arg(long)]
    long_reads: bool,

    #[arg(long)]
    paired: bool,

    #[arg(long, default_value_t = 0)]
    min_support: u64,

    #[arg(long, default_value_t = 0.0)]
    min_support_percent: f32,

    /// Contaminant taxon ids, comma separated
    #[arg(long, value_delimiter = ',')]
    contaminants: Vec<i32>,

    /// Directory for the output files
    #[arg(long, short, default_value = ".")]
    output_dir: PathBuf,

    /// Also write one report per classification
    #[arg(long)]
    report: bool,
}

fn spinner(color: &str, message: &'static str) -> Result<ProgressBar, Box<dyn Error>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(TICKS)
            .template(&format!("{{spinner:.{}}} {{msg}}", color))?,
    );
    spinner.set_message(message);
    Ok(spinner)
}

fn pipeline_config(args: &Args) -> Result<(PipelineConfig, Vec<(String, PathBuf)>), BinningError> {
    let mut classifications = vec![ClassificationConfig::new(
        "Taxonomy",
        AssignmentMode::parse(&args.taxonomy_mode)?,
    )];
    let mut taxdb_paths = vec![("Taxonomy".to_string(), args.taxdb.clone())];

    let function_mode = AssignmentMode::parse(&args.function_mode)?;
    for spec in &args.functions {
        let (name, path) = spec
            .split_once('=')
            .ok_or_else(|| BinningError::config(format!("expected NAME=PATH, got '{}'", spec)))?;
        classifications.push(ClassificationConfig::new(name, function_mode));
        taxdb_paths.push((name.to_string(), PathBuf::from(path)));
    }

    let config = PipelineConfig {
        classifications,
        active: ActiveMatchParams {
            min_score: args.min_score,
            top_percent: args.top_percent,
            max_expected: args.max_expected,
            min_percent_identity: args.min_percent_identity,
        },
        algorithm: AlgorithmParams {
            lca_coverage_percent: args.lca_percent,
            weighted_lca_percent: args.weighted_lca_percent,
            min_overlap: args.min_overlap,
            identity_by_rank: args
                .identity_by_rank
                .as_deref()
                .map(PercentIdentityByRank::parse)
                .transpose()?,
        },
        min_read_length: args.min_read_length,
        min_complexity: args.min_complexity,
        min_percent_read_to_cover: args.min_percent_read_to_cover,
        min_percent_reference_to_cover: args.min_percent_reference_to_cover,
        read_assignment_mode: ReadAssignmentMode::parse(&args.read_assignment_mode)?,
        long_reads: args.long_reads,
        paired_reads: args.paired,
        min_support: args.min_support,
        min_support_percent: args.min_support_percent,
        taxonomy_index: Some(0),
        keep_assignments: true,
    };
    config.validate()?;
    Ok((config, taxdb_paths))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();
    let (config, taxdb_paths) = pipeline_config(&args)?;

    // 1. Bin the reads, with a progress bar ticked per read
    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")?
            .tick_strings(TICKS),
    );
    progress.set_message("Binning reads...");

    let results = bin_matches_file(
        &args.matches,
        &taxdb_paths,
        config,
        &args.contaminants,
        args.report,
        Some(progress),
        None,
    )?;
    eprintln!(
        "Binned {} reads ({} assigned, {} with hits).",
        results.stats.reads, results.stats.assigned, results.stats.with_hits
    );

    // 2. Write outputs
    let spinner = spinner("yellow", "Writing output files...")?;
    fs::create_dir_all(&args.output_dir)?;
    fs::write(args.output_dir.join("assignments.txt"), results.get_assignment_output())?;
    if args.report {
        for name in results.accumulator.classification_names() {
            if let Some(report_text) = results.get_report(name) {
                fs::write(args.output_dir.join(format!("{}_report.txt", name.to_lowercase())), report_text)?;
            }
        }
    }
    spinner.finish_with_message("Done.");
    Ok(())
}
