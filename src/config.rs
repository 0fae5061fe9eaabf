//! Configuration for somatic scoring and filtration, with validation

use crate::{Sample, SomaticError, SomaticResult};
use std::fmt;
use std::path::PathBuf;

/// Indel candidacy thresholds. `None` disables the corresponding test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndelCandidacyConfig {
    pub min_candidate_indel_reads: Option<u32>,
    pub min_small_candidate_indel_read_frac: Option<f64>,
    pub tumor_min_candidate_indel_reads: Option<u32>,
    pub tumor_min_small_candidate_indel_read_frac: Option<f64>,
}

impl IndelCandidacyConfig {
    pub fn min_reads(&self, sample: Sample) -> Option<u32> {
        match sample {
            Sample::Tumor => self
                .tumor_min_candidate_indel_reads
                .or(self.min_candidate_indel_reads),
            Sample::Normal => self.min_candidate_indel_reads,
        }
    }

    pub fn min_small_read_frac(&self, sample: Sample) -> Option<f64> {
        match sample {
            Sample::Tumor => self
                .tumor_min_small_candidate_indel_read_frac
                .or(self.min_small_candidate_indel_read_frac),
            Sample::Normal => self.min_small_candidate_indel_read_frac,
        }
    }
}

/// Somatic call filter thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct SomaticFilterConfig {
    pub chrom_depth_file: Option<PathBuf>,
    pub max_depth_factor: f64,
    /// Only affects writer headers, never filter logic
    pub skip_header: bool,
    pub snv_max_filtered_basecall_frac: f64,
    pub snv_max_spanning_deletion_frac: f64,
    pub snv_min_qss_ref: u32,
    pub indel_max_ref_repeat: u32,
    pub indel_max_int_hpol_length: u32,
    pub indel_max_window_filtered_basecall_frac: f64,
    pub sindel_quality_lower_bound: u32,
}

impl Default for SomaticFilterConfig {
    fn default() -> Self {
        Self {
            chrom_depth_file: None,
            max_depth_factor: 3.0,
            skip_header: false,
            snv_max_filtered_basecall_frac: 0.4,
            snv_max_spanning_deletion_frac: 0.75,
            snv_min_qss_ref: 15,
            indel_max_ref_repeat: 8,
            indel_max_int_hpol_length: 14,
            indel_max_window_filtered_basecall_frac: 0.3,
            sindel_quality_lower_bound: 30,
        }
    }
}

/// Full configuration of the somatic caller core.
///
/// Assembled once by a front-end, validated with [`validate`], then shared
/// read-only by every scoring call.
#[derive(Debug, Clone, PartialEq)]
pub struct SomaticCallerConfig {
    pub somatic_snv_rate: f64,
    pub somatic_indel_rate: f64,
    pub shared_site_error_rate: f64,
    pub shared_indel_error_factor: f64,
    pub shared_site_error_strand_bias_fraction: f64,
    pub site_somatic_normal_noise_rate: Option<f64>,
    pub indel_somatic_normal_noise_rate: Option<f64>,
    pub germline_snv_theta: f64,
    pub germline_indel_theta: f64,
    pub max_quality_score: u32,
    pub min_reported_quality: u32,
    pub callable_min_quality: u32,
    pub is_use_alt_indel: bool,
    pub is_tier2_min_quality: bool,
    pub candidacy: IndelCandidacyConfig,
    pub filters: SomaticFilterConfig,
    pub scoring_models_file: Option<PathBuf>,
}

impl Default for SomaticCallerConfig {
    fn default() -> Self {
        Self {
            somatic_snv_rate: 1e-6,
            somatic_indel_rate: 1e-6,
            shared_site_error_rate: 1e-4,
            shared_indel_error_factor: 1.4,
            shared_site_error_strand_bias_fraction: 0.5,
            site_somatic_normal_noise_rate: None,
            indel_somatic_normal_noise_rate: None,
            germline_snv_theta: 1e-3,
            germline_indel_theta: 1e-4,
            max_quality_score: 200,
            min_reported_quality: 1,
            callable_min_quality: 15,
            is_use_alt_indel: true,
            is_tier2_min_quality: false,
            candidacy: IndelCandidacyConfig::default(),
            filters: SomaticFilterConfig::default(),
            scoring_models_file: None,
        }
    }
}

impl SomaticCallerConfig {
    /// Consume the configuration, returning it only if it validates
    pub fn validated(self) -> SomaticResult<Self> {
        validate(&self).map_err(SomaticError::Configuration)?;
        Ok(self)
    }
}

/// A single out-of-range configuration parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigViolation {
    pub parameter: &'static str,
    pub value: String,
    pub valid_range: &'static str,
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} is outside the valid range {}",
            self.parameter, self.value, self.valid_range
        )
    }
}

/// Every violation found in one configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigViolations(pub Vec<ConfigViolation>);

impl ConfigViolations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigViolation> {
        self.0.iter()
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.0.iter().any(|v| v.parameter == parameter)
    }

    fn check_probability(&mut self, parameter: &'static str, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            self.push(parameter, value, "[0, 1]");
        }
    }

    fn check_optional_probability(&mut self, parameter: &'static str, value: Option<f64>) {
        if let Some(value) = value {
            self.check_probability(parameter, value);
        }
    }

    fn check_non_negative(&mut self, parameter: &'static str, value: f64) {
        if !(value >= 0.0 && value.is_finite()) {
            self.push(parameter, value, "[0, inf)");
        }
    }

    fn push(&mut self, parameter: &'static str, value: impl fmt::Display, valid_range: &'static str) {
        self.0.push(ConfigViolation {
            parameter,
            value: value.to_string(),
            valid_range,
        });
    }
}

impl fmt::Display for ConfigViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        f.write_str(&messages.join("; "))
    }
}

/// Check every parameter of `config`, collecting all violations
pub fn validate(config: &SomaticCallerConfig) -> Result<(), ConfigViolations> {
    let mut violations = ConfigViolations::default();

    violations.check_probability("somatic-snv-rate", config.somatic_snv_rate);
    violations.check_probability("somatic-indel-rate", config.somatic_indel_rate);
    violations.check_probability("shared-site-error-rate", config.shared_site_error_rate);
    violations.check_probability(
        "shared-site-error-strand-bias-fraction",
        config.shared_site_error_strand_bias_fraction,
    );
    violations.check_optional_probability(
        "site-somatic-normal-noise-rate",
        config.site_somatic_normal_noise_rate,
    );
    violations.check_optional_probability(
        "indel-somatic-normal-noise-rate",
        config.indel_somatic_normal_noise_rate,
    );
    violations.check_non_negative("shared-indel-error-factor", config.shared_indel_error_factor);

    // ref prior is 1 - 1.5 * theta
    for (parameter, theta) in [
        ("germline-snv-theta", config.germline_snv_theta),
        ("germline-indel-theta", config.germline_indel_theta),
    ] {
        if !(0.0..=0.5).contains(&theta) {
            violations.push(parameter, theta, "[0, 0.5]");
        }
    }

    if config.max_quality_score == 0 {
        violations.push("max-quality-score", config.max_quality_score, "[1, inf)");
    }

    let candidacy = &config.candidacy;
    violations.check_optional_probability(
        "min-small-candidate-indel-read-frac",
        candidacy.min_small_candidate_indel_read_frac,
    );
    violations.check_optional_probability(
        "tumor-min-small-candidate-indel-read-frac",
        candidacy.tumor_min_small_candidate_indel_read_frac,
    );

    let filters = &config.filters;
    violations.check_non_negative("max-depth-factor", filters.max_depth_factor);
    violations.check_probability(
        "snv-max-filtered-basecall-frac",
        filters.snv_max_filtered_basecall_frac,
    );
    violations.check_probability(
        "snv-max-spanning-deletion-frac",
        filters.snv_max_spanning_deletion_frac,
    );
    violations.check_probability(
        "indel-max-window-filtered-basecall-frac",
        filters.indel_max_window_filtered_basecall_frac,
    );

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Per-sample evidence inputs required before a run can start
#[derive(Debug, Clone, Default)]
pub struct SampleInputs {
    pub normal: Option<PathBuf>,
    pub tumor: Option<PathBuf>,
}

impl SampleInputs {
    pub fn path(&self, sample: Sample) -> Option<&PathBuf> {
        match sample {
            Sample::Normal => self.normal.as_ref(),
            Sample::Tumor => self.tumor.as_ref(),
        }
    }
}

/// Fail with `MissingInput` if either sample's evidence is unspecified
pub fn validate_inputs(inputs: &SampleInputs) -> SomaticResult<()> {
    for sample in Sample::ALL {
        if inputs.path(sample).is_none() {
            return Err(SomaticError::MissingInput(format!(
                "must specify an evidence file for the {} sample",
                sample.label().to_lowercase()
            )));
        }
    }
    Ok(())
}
