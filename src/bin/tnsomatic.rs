//! Tumor/normal somatic SNV and indel caller

use clap::Parser;
use env_logger::Env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tnsomatic_rs::{
    chrom_depth::ChromDepthTable,
    config::{validate_inputs, IndelCandidacyConfig, SampleInputs, SomaticFilterConfig},
    context::load_reference,
    evidence::{merge_by_chrom, EvidenceReader},
    output::{write_callable_regions_to_path, write_calls_to_path},
    processor::{process_chromosomes, CallerResources, ProcessorStats},
    scoring::{LogisticScoringModel, ScoringModel},
    utils::{get_num_cpus, validate_file_readable, Timer},
    Sample, SomaticCallerConfig, SomaticError, SomaticResult,
};

#[derive(Parser)]
#[command(name = "tnsomatic")]
#[command(about = "tnsomatic - Tumor/normal somatic SNV and indel scoring")]
#[command(long_about = "
tnsomatic scores somatic SNVs and short indels from paired tumor and normal
read evidence and writes one call record per reported site.

Evidence files are tab-separated (optionally gzipped) with one event per line:
  BASE    chrom pos ref base qscore strand tier1 tier2 [read_pos read_len]
  SPANDEL chrom pos ref
  INDEL   chrom tier key ref_lnp indel_lnp [alt_key alt_lnp]...

Each call is scored under a joint tumor/normal allele frequency model and
reported with a phred-scaled somatic quality (QSS/QSI). Calls are then
filtered on depth, basecall noise, spanning deletions, repeat context and
reference-normal quality, or on an empirical score when a scoring model is
provided.

A chromosome depth table (chrom<TAB>expected_depth) enables the DP filter.
")]
struct Args {
    /// Normal sample evidence file
    #[arg(long, value_name = "FILE")]
    normal_evidence: Option<PathBuf>,

    /// Tumor sample evidence file
    #[arg(long, value_name = "FILE")]
    tumor_evidence: Option<PathBuf>,

    /// Reference FASTA used for indel sequence context
    #[arg(long, value_name = "FILE")]
    reference: Option<PathBuf>,

    /// Path to the output call records
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Write callable regions in BED format to this file
    #[arg(long, value_name = "FILE")]
    callable_regions: Option<PathBuf>,

    /// Expected depth per chromosome, enables the high depth filter
    #[arg(long, value_name = "FILE")]
    chrom_depth_file: Option<PathBuf>,

    /// Empirical variant scoring models
    #[arg(long, value_name = "FILE")]
    variant_scoring_models_file: Option<PathBuf>,

    /// Prior probability of a somatic SNV at a site
    #[arg(long, default_value_t = 1e-6)]
    somatic_snv_rate: f64,

    /// Prior probability of a somatic indel at a site
    #[arg(long, default_value_t = 1e-6)]
    somatic_indel_rate: f64,

    /// Rate of site errors shared by tumor and normal
    #[arg(long, default_value_t = 1e-4)]
    shared_site_error_rate: f64,

    /// Shared indel error rate as a multiple of the indel error probability
    #[arg(long, default_value_t = 1.4)]
    shared_indel_error_factor: f64,

    /// Fraction of shared site errors confined to one strand
    #[arg(long, default_value_t = 0.5)]
    shared_site_error_strand_bias_fraction: f64,

    /// Expected tumor contamination of the normal at SNV sites
    #[arg(long)]
    site_somatic_normal_noise_rate: Option<f64>,

    /// Expected tumor contamination of the normal at indel sites
    #[arg(long)]
    indel_somatic_normal_noise_rate: Option<f64>,

    /// Germline SNV heterozygosity
    #[arg(long, default_value_t = 1e-3)]
    germline_snv_theta: f64,

    /// Germline indel heterozygosity
    #[arg(long, default_value_t = 1e-4)]
    germline_indel_theta: f64,

    /// Upper bound of reported quality scores
    #[arg(long, default_value_t = 200)]
    max_quality_score: u32,

    /// Minimum quality of a reported call
    #[arg(long, default_value_t = 1)]
    min_reported_quality: u32,

    /// Minimum QSS or NQSS of a callable position
    #[arg(long, default_value_t = 15)]
    callable_min_quality: u32,

    /// Minimum supporting reads for an indel candidate
    #[arg(long)]
    min_candidate_indel_reads: Option<u32>,

    /// Minimum supporting read fraction for an indel candidate
    #[arg(long)]
    min_small_candidate_indel_read_frac: Option<f64>,

    /// Tumor override of the minimum supporting reads
    #[arg(long)]
    tumor_min_candidate_indel_reads: Option<u32>,

    /// Tumor override of the minimum supporting read fraction
    #[arg(long)]
    tumor_min_small_candidate_indel_read_frac: Option<f64>,

    /// Normal depth limit as a multiple of the expected chromosome depth
    #[arg(long, default_value_t = 3.0)]
    max_depth_factor: f64,

    /// Maximum fraction of filtered basecalls at an SNV site
    #[arg(long, default_value_t = 0.4)]
    snv_max_filtered_basecall_frac: f64,

    /// Maximum fraction of spanning deletions at an SNV site
    #[arg(long, default_value_t = 0.75)]
    snv_max_spanning_deletion_frac: f64,

    /// Minimum QSS_ref of an SNV
    #[arg(long, default_value_t = 15)]
    snv_min_qss_ref: u32,

    /// Maximum reference repeat count of an indel
    #[arg(long, default_value_t = 8)]
    indel_max_ref_repeat: u32,

    /// Maximum interrupted homopolymer length around an indel
    #[arg(long, default_value_t = 14)]
    indel_max_int_hpol_length: u32,

    /// Maximum fraction of filtered basecalls in the window around an indel
    #[arg(long, default_value_t = 0.3)]
    indel_max_window_filtered_basecall_frac: f64,

    /// Minimum QSI_ref of an indel
    #[arg(long, default_value_t = 30)]
    sindel_quality_lower_bound: u32,

    /// Do not score indels against overlapping alternate indels
    #[arg(long)]
    no_alt_indel: bool,

    /// Score each site with the lower of its tier 1 and tier 2 quality
    #[arg(long)]
    tier2_min_quality: bool,

    /// Do not write header lines
    #[arg(long)]
    skip_header: bool,

    /// Number of processes to use for parallel processing
    #[arg(long, default_value_t = get_num_cpus())]
    num_processes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output files if they exist
    #[arg(short, long)]
    force: bool,
}

impl Args {
    fn caller_config(&self) -> SomaticCallerConfig {
        SomaticCallerConfig {
            somatic_snv_rate: self.somatic_snv_rate,
            somatic_indel_rate: self.somatic_indel_rate,
            shared_site_error_rate: self.shared_site_error_rate,
            shared_indel_error_factor: self.shared_indel_error_factor,
            shared_site_error_strand_bias_fraction: self.shared_site_error_strand_bias_fraction,
            site_somatic_normal_noise_rate: self.site_somatic_normal_noise_rate,
            indel_somatic_normal_noise_rate: self.indel_somatic_normal_noise_rate,
            germline_snv_theta: self.germline_snv_theta,
            germline_indel_theta: self.germline_indel_theta,
            max_quality_score: self.max_quality_score,
            min_reported_quality: self.min_reported_quality,
            callable_min_quality: self.callable_min_quality,
            is_use_alt_indel: !self.no_alt_indel,
            is_tier2_min_quality: self.tier2_min_quality,
            candidacy: IndelCandidacyConfig {
                min_candidate_indel_reads: self.min_candidate_indel_reads,
                min_small_candidate_indel_read_frac: self.min_small_candidate_indel_read_frac,
                tumor_min_candidate_indel_reads: self.tumor_min_candidate_indel_reads,
                tumor_min_small_candidate_indel_read_frac: self.tumor_min_small_candidate_indel_read_frac,
            },
            filters: SomaticFilterConfig {
                chrom_depth_file: self.chrom_depth_file.clone(),
                max_depth_factor: self.max_depth_factor,
                skip_header: self.skip_header,
                snv_max_filtered_basecall_frac: self.snv_max_filtered_basecall_frac,
                snv_max_spanning_deletion_frac: self.snv_max_spanning_deletion_frac,
                snv_min_qss_ref: self.snv_min_qss_ref,
                indel_max_ref_repeat: self.indel_max_ref_repeat,
                indel_max_int_hpol_length: self.indel_max_int_hpol_length,
                indel_max_window_filtered_basecall_frac: self.indel_max_window_filtered_basecall_frac,
                sindel_quality_lower_bound: self.sindel_quality_lower_bound,
            },
            scoring_models_file: self.variant_scoring_models_file.clone(),
        }
    }
}

fn check_output(path: &Path, force: bool) -> SomaticResult<()> {
    if path.exists() && !force {
        return Err(SomaticError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Output file {:?} already exists. Use --force to overwrite.", path),
        )));
    }
    Ok(())
}

fn log_stats(stats: &ProcessorStats, n_pass: usize) {
    log::info!("Call summary:");
    log::info!("  Sites scored: {}", stats.n_sites);
    log::info!("  SNV calls: {}", stats.n_snv_calls);
    log::info!(
        "  Indels seen: {} ({} candidates, {} calls)",
        stats.n_indels_seen,
        stats.n_indel_candidates,
        stats.n_indel_calls
    );
    log::info!("  Passing filters: {}", n_pass);
}

fn run() -> SomaticResult<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting tnsomatic");
    log::info!("Normal evidence: {:?}", args.normal_evidence);
    log::info!("Tumor evidence: {:?}", args.tumor_evidence);
    log::info!("Output: {:?}", args.output);
    log::info!("Number of processes: {}", args.num_processes);

    let inputs = SampleInputs {
        normal: args.normal_evidence.clone(),
        tumor: args.tumor_evidence.clone(),
    };
    validate_inputs(&inputs)?;

    check_output(&args.output, args.force)?;
    if let Some(path) = &args.callable_regions {
        check_output(path, args.force)?;
    }

    let config = args.caller_config().validated()?;
    let mut resources = CallerResources::new(config);

    if let Some(path) = &resources.config.filters.chrom_depth_file {
        validate_file_readable(path)?;
        resources.depth_table = Some(ChromDepthTable::from_path(path)?);
    }
    if let Some(path) = &resources.config.scoring_models_file {
        validate_file_readable(path)?;
        let model: Arc<dyn ScoringModel> = Arc::new(LogisticScoringModel::from_path(path)?);
        resources.scoring = Some(model);
    }
    if let Some(path) = &args.reference {
        validate_file_readable(path)?;
        let _timer = Timer::new("Loading reference");
        resources.reference = load_reference(path)?;
    }

    let mut readers = Vec::new();
    for sample in [Sample::Normal, Sample::Tumor] {
        if let Some(path) = inputs.path(sample) {
            readers.push(EvidenceReader::from_path(path, sample)?);
        }
    }
    let mut chromosomes = merge_by_chrom(readers)?;

    let outputs = {
        let _timer = Timer::new("Scoring somatic variants");
        process_chromosomes(&mut chromosomes, &resources, args.num_processes)?
    };
    log::info!("Read {} evidence events on {} chromosomes", chromosomes.n_events(), outputs.len());
    if outputs.is_empty() {
        log::warn!("No evidence found in the input files");
    }

    let mut calls = Vec::new();
    let mut regions = Vec::new();
    let mut stats = ProcessorStats::default();
    for output in outputs {
        stats.n_sites += output.stats.n_sites;
        stats.n_snv_calls += output.stats.n_snv_calls;
        stats.n_indels_seen += output.stats.n_indels_seen;
        stats.n_indel_candidates += output.stats.n_indel_candidates;
        stats.n_indel_calls += output.stats.n_indel_calls;
        calls.extend(output.calls);
        regions.extend(output.callable);
    }
    log_stats(&stats, calls.iter().filter(|c| c.is_pass()).count());

    let _timer = Timer::new("Writing output");
    write_calls_to_path(&args.output, &calls, args.skip_header)?;
    log::info!("Wrote {} calls to {:?}", calls.len(), args.output);

    if let Some(path) = &args.callable_regions {
        write_callable_regions_to_path(path, &regions)?;
        log::info!("Wrote {} callable regions to {:?}", regions.len(), path);
    }

    log::info!("Analysis completed successfully");
    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: SomaticError) -> ! {
    match error {
        SomaticError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
        }
        SomaticError::MissingInput(msg) => {
            eprintln!("Error: Missing input: {}", msg);
            eprintln!("Provide --normal-evidence and --tumor-evidence.");
        }
        SomaticError::Configuration(violations) => {
            eprintln!("Error: Invalid configuration:");
            for violation in violations.iter() {
                eprintln!("  {}", violation);
            }
        }
        SomaticError::InvalidEvidence(msg) => {
            eprintln!("Error: Invalid evidence: {}", msg);
            eprintln!("Please check that your evidence files are properly formatted.");
        }
        SomaticError::NotFound { sample, pos } => {
            eprintln!("Error: No {} reads observed at position {}", sample, pos);
        }
        SomaticError::ScoringModel(msg) => {
            eprintln!("Error: Invalid scoring model: {}", msg);
            eprintln!("Please check --variant-scoring-models-file.");
        }
        SomaticError::Reference(msg) => {
            eprintln!("Error: Reference error: {}", msg);
            eprintln!("Please check that the reference is a valid FASTA file.");
        }
        SomaticError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        SomaticError::Csv(ref e) => {
            eprintln!("Error: Data processing error: {}", e);
            eprintln!("Please check that your input tables are tab-separated.");
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
