//! Deterministic filters turning scored sites and indels into PASS or a set
//! of filter labels
//!
//! Every check is an independent predicate; a call collects the union of all
//! triggered filters so the order of evaluation never matters.

use crate::config::{SomaticCallerConfig, SomaticFilterConfig};
use crate::pileup::SitePileup;
use crate::scoring::EmpiricalScore;
use crate::sindel::IndelScore;
use crate::snv::SiteScore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SomaticFilter {
    HighDepth,
    BasecallNoise,
    SpanningDeletion,
    QssRef,
    Repeat,
    InterruptedHomopolymer,
    QsiRef,
    LowEvs,
}

impl SomaticFilter {
    pub fn label(self) -> &'static str {
        match self {
            SomaticFilter::HighDepth => "DP",
            SomaticFilter::BasecallNoise => "BCNoise",
            SomaticFilter::SpanningDeletion => "SpanDel",
            SomaticFilter::QssRef => "QSS_ref",
            SomaticFilter::Repeat => "Repeat",
            SomaticFilter::InterruptedHomopolymer => "iHpol",
            SomaticFilter::QsiRef => "QSI_ref",
            SomaticFilter::LowEvs => "LowEVS",
        }
    }
}

impl fmt::Display for SomaticFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Set of triggered filters; empty means PASS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterFlags(BTreeSet<SomaticFilter>);

impl FilterFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filter: SomaticFilter) {
        self.0.insert(filter);
    }

    pub fn contains(&self, filter: SomaticFilter) -> bool {
        self.0.contains(&filter)
    }

    pub fn is_pass(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SomaticFilter> + '_ {
        self.0.iter().copied()
    }
}

impl Extend<SomaticFilter> for FilterFlags {
    fn extend<I: IntoIterator<Item = SomaticFilter>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl fmt::Display for FilterFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pass() {
            return write!(f, "PASS");
        }
        let labels: Vec<&str> = self.iter().map(SomaticFilter::label).collect();
        write!(f, "{}", labels.join(";"))
    }
}

/// Site evidence the SNV filters need beyond the score itself
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnvFilterInputs {
    /// Tier-1 depth of the normal sample
    pub normal_depth: u32,
    /// Filtered basecall fraction, normal then tumor
    pub filtered_fraction: [f64; 2],
    /// Spanning deletion fraction, normal then tumor
    pub spanning_deletion_fraction: [f64; 2],
    pub empirical: Option<EmpiricalScore>,
}

impl SnvFilterInputs {
    pub fn from_pileups(normal: &SitePileup, tumor: &SitePileup) -> Self {
        Self {
            normal_depth: normal.depth(crate::Tier::One),
            filtered_fraction: [normal.filtered_fraction(), tumor.filtered_fraction()],
            spanning_deletion_fraction: [
                normal.spanning_deletion_fraction(),
                tumor.spanning_deletion_fraction(),
            ],
            empirical: None,
        }
    }
}

/// Indel evidence the indel filters need beyond the score itself
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndelFilterInputs {
    pub normal_depth: u32,
    /// Filtered basecall fraction in the window around the indel, normal then tumor
    pub window_filtered_fraction: [f64; 2],
    pub empirical: Option<EmpiricalScore>,
}

fn max_of(values: [f64; 2]) -> f64 {
    values[0].max(values[1])
}

fn exceeds_depth(depth: u32, max_depth: Option<f64>) -> bool {
    max_depth.map_or(false, |max| depth as f64 > max)
}

fn empirical_filter(empirical: &Option<EmpiricalScore>) -> Option<SomaticFilter> {
    match empirical {
        Some(evs) if !evs.passes() => Some(SomaticFilter::LowEvs),
        _ => None,
    }
}

pub type SnvFilterCheck = fn(&SiteScore, &SnvFilterInputs, &SomaticFilterConfig, Option<f64>) -> Option<SomaticFilter>;
pub type IndelFilterCheck =
    fn(&IndelScore, &IndelFilterInputs, &SomaticFilterConfig, Option<f64>) -> Option<SomaticFilter>;

fn check_snv_depth(_: &SiteScore, inputs: &SnvFilterInputs, _: &SomaticFilterConfig, max_depth: Option<f64>) -> Option<SomaticFilter> {
    exceeds_depth(inputs.normal_depth, max_depth).then_some(SomaticFilter::HighDepth)
}

fn check_snv_basecall_noise(
    _: &SiteScore,
    inputs: &SnvFilterInputs,
    config: &SomaticFilterConfig,
    _: Option<f64>,
) -> Option<SomaticFilter> {
    (max_of(inputs.filtered_fraction) > config.snv_max_filtered_basecall_frac).then_some(SomaticFilter::BasecallNoise)
}

fn check_snv_spanning_deletion(
    _: &SiteScore,
    inputs: &SnvFilterInputs,
    config: &SomaticFilterConfig,
    _: Option<f64>,
) -> Option<SomaticFilter> {
    (max_of(inputs.spanning_deletion_fraction) > config.snv_max_spanning_deletion_frac)
        .then_some(SomaticFilter::SpanningDeletion)
}

fn check_qss_ref(
    score: &SiteScore,
    inputs: &SnvFilterInputs,
    config: &SomaticFilterConfig,
    _: Option<f64>,
) -> Option<SomaticFilter> {
    (inputs.empirical.is_none() && score.qss_ref < config.snv_min_qss_ref).then_some(SomaticFilter::QssRef)
}

fn check_snv_empirical(_: &SiteScore, inputs: &SnvFilterInputs, _: &SomaticFilterConfig, _: Option<f64>) -> Option<SomaticFilter> {
    empirical_filter(&inputs.empirical)
}

fn check_indel_depth(
    _: &IndelScore,
    inputs: &IndelFilterInputs,
    _: &SomaticFilterConfig,
    max_depth: Option<f64>,
) -> Option<SomaticFilter> {
    exceeds_depth(inputs.normal_depth, max_depth).then_some(SomaticFilter::HighDepth)
}

fn check_repeat(score: &IndelScore, _: &IndelFilterInputs, config: &SomaticFilterConfig, _: Option<f64>) -> Option<SomaticFilter> {
    (score.context.is_repeat_unit() && score.context.ref_repeat_count > config.indel_max_ref_repeat)
        .then_some(SomaticFilter::Repeat)
}

fn check_interrupted_hpol(
    score: &IndelScore,
    _: &IndelFilterInputs,
    config: &SomaticFilterConfig,
    _: Option<f64>,
) -> Option<SomaticFilter> {
    (score.context.interrupted_hpol_len > config.indel_max_int_hpol_length)
        .then_some(SomaticFilter::InterruptedHomopolymer)
}

fn check_window_basecall_noise(
    _: &IndelScore,
    inputs: &IndelFilterInputs,
    config: &SomaticFilterConfig,
    _: Option<f64>,
) -> Option<SomaticFilter> {
    (max_of(inputs.window_filtered_fraction) > config.indel_max_window_filtered_basecall_frac)
        .then_some(SomaticFilter::BasecallNoise)
}

fn check_qsi_ref(
    score: &IndelScore,
    inputs: &IndelFilterInputs,
    config: &SomaticFilterConfig,
    _: Option<f64>,
) -> Option<SomaticFilter> {
    (inputs.empirical.is_none() && score.qsi_ref < config.sindel_quality_lower_bound).then_some(SomaticFilter::QsiRef)
}

fn check_indel_empirical(
    _: &IndelScore,
    inputs: &IndelFilterInputs,
    _: &SomaticFilterConfig,
    _: Option<f64>,
) -> Option<SomaticFilter> {
    empirical_filter(&inputs.empirical)
}

pub const SNV_FILTER_CHECKS: [SnvFilterCheck; 5] = [
    check_snv_depth,
    check_snv_basecall_noise,
    check_snv_spanning_deletion,
    check_qss_ref,
    check_snv_empirical,
];

pub const INDEL_FILTER_CHECKS: [IndelFilterCheck; 6] = [
    check_indel_depth,
    check_repeat,
    check_interrupted_hpol,
    check_window_basecall_noise,
    check_qsi_ref,
    check_indel_empirical,
];

/// Evaluate every SNV filter. `max_depth` is the chromosome depth cap, if a
/// depth table is configured.
pub fn apply_snv_filters(
    score: &SiteScore,
    inputs: &SnvFilterInputs,
    config: &SomaticCallerConfig,
    max_depth: Option<f64>,
) -> FilterFlags {
    let mut flags = FilterFlags::new();
    flags.extend(
        SNV_FILTER_CHECKS
            .iter()
            .filter_map(|check| check(score, inputs, &config.filters, max_depth)),
    );
    flags
}

pub fn apply_indel_filters(
    score: &IndelScore,
    inputs: &IndelFilterInputs,
    config: &SomaticCallerConfig,
    max_depth: Option<f64>,
) -> FilterFlags {
    let mut flags = FilterFlags::new();
    flags.extend(
        INDEL_FILTER_CHECKS
            .iter()
            .filter_map(|check| check(score, inputs, &config.filters, max_depth)),
    );
    flags
}
