//! Somatic indel scoring from per-read haplotype likelihoods

use crate::config::SomaticCallerConfig;
use crate::context::IndelContext;
use crate::indel::{IndelEvidence, IndelKey, IndelSampleEvidence, ReadPathScores};
use crate::noise::NoiseModel;
use crate::posterior::{grid_freq, Genotype, GridPriors, SampleLikelihoods, SomaticPosterior, GRID_SIZE};
use crate::{Sample, SampleTiers, Tier};
use bio::stats::LogProb;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;

/// Per-sample read support reported with each indel
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndelSampleSummary {
    pub depth_tier1: u32,
    pub depth_tier2: u32,
    pub n_alt: u32,
    pub n_ref: u32,
    pub n_ambiguous: u32,
}

impl IndelSampleSummary {
    fn new(evidence: &IndelSampleEvidence, tier: Tier) -> Self {
        let used = evidence.get(tier);
        Self {
            depth_tier1: evidence.tier1.n_total(),
            depth_tier2: evidence.tier2.n_total(),
            n_alt: used.n_alt,
            n_ref: used.n_ref,
            n_ambiguous: used.n_ambiguous,
        }
    }
}

/// Somatic score of one indel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndelScore {
    pub key: IndelKey,
    pub qsi: u32,
    pub qsi_ref: u32,
    pub normal_genotype: Genotype,
    pub somatic_probability: f64,
    pub tier: Option<Tier>,
    /// Competing indel the reference path was extended with
    pub alt_indel: Option<IndelKey>,
    pub context: IndelContext,
    pub normal: IndelSampleSummary,
    pub tumor: IndelSampleSummary,
}

impl IndelScore {
    fn zero(key: &IndelKey, normal: &IndelSampleEvidence, tumor: &IndelSampleEvidence, context: &IndelContext) -> Self {
        Self {
            key: key.clone(),
            qsi: 0,
            qsi_ref: 0,
            normal_genotype: Genotype::Ref,
            somatic_probability: 0.0,
            tier: None,
            alt_indel: None,
            context: context.clone(),
            normal: IndelSampleSummary::new(normal, Tier::One),
            tumor: IndelSampleSummary::new(tumor, Tier::One),
        }
    }

    pub fn summary(&self, sample: Sample) -> &IndelSampleSummary {
        match sample {
            Sample::Normal => &self.normal,
            Sample::Tumor => &self.tumor,
        }
    }
}

/// Competing indel that best explains the reads as non-reference.
///
/// Each key is scored by the total log-likelihood of all reads when the
/// reference path may be replaced by that key's path. Ties keep the key
/// seen first.
fn select_alt_indel(reads: &[&ReadPathScores]) -> Option<IndelKey> {
    let mut order: Vec<&IndelKey> = Vec::new();
    let mut gain: HashMap<&IndelKey, f64> = HashMap::new();
    for read in reads {
        for (key, lnp) in &read.alt_indels {
            let entry = gain.entry(key).or_insert_with(|| {
                order.push(key);
                0.0
            });
            *entry += (lnp - read.ref_lnp).max(0.0);
        }
    }
    let mut best: Option<(&IndelKey, f64)> = None;
    for key in order {
        let g = gain[key];
        if g > 0.0 && best.map_or(true, |(_, b)| g > b) {
            best = Some((key, g));
        }
    }
    best.map(|(key, _)| key.clone())
}

fn effective_ref_lnp(read: &ReadPathScores, alt_indel: Option<&IndelKey>) -> f64 {
    let alt_lnp = alt_indel.and_then(|alt| {
        read.alt_indels
            .iter()
            .find(|(key, _)| key == alt)
            .map(|(_, lnp)| *lnp)
    });
    match alt_lnp {
        Some(lnp) => read.ref_lnp.max(lnp),
        None => read.ref_lnp,
    }
}

fn ln_mix(w_a: f64, ln_a: f64, w_b: f64, ln_b: f64) -> f64 {
    let m = ln_a.max(ln_b);
    if m == f64::NEG_INFINITY {
        return m;
    }
    m + (w_a * (ln_a - m).exp() + w_b * (ln_b - m).exp()).ln()
}

fn sample_likelihoods(
    evidence: &IndelEvidence,
    alt_indel: Option<&IndelKey>,
    indel_error: f64,
    ref_error: f64,
) -> SampleLikelihoods {
    let mut both = vec![0.0; GRID_SIZE];
    for read in &evidence.reads {
        let ref_lnp = effective_ref_lnp(read, alt_indel);
        let ln_given_indel = ln_mix(1.0 - ref_error, read.indel_lnp, ref_error, ref_lnp);
        let ln_given_ref = ln_mix(1.0 - indel_error, ref_lnp, indel_error, read.indel_lnp);
        for (i, total) in both.iter_mut().enumerate() {
            let f = grid_freq(i);
            *total += ln_mix(f, ln_given_indel, 1.0 - f, ln_given_ref);
        }
    }
    SampleLikelihoods::unstranded(both.into_iter().map(LogProb).collect())
}

fn posterior_at_tiers(
    normal: &IndelSampleEvidence,
    tumor: &IndelSampleEvidence,
    tiers: SampleTiers,
    alt_indel: Option<&IndelKey>,
    context: &IndelContext,
    config: &SomaticCallerConfig,
    noise: &NoiseModel,
) -> SomaticPosterior {
    let (indel_error, ref_error) = noise.indel_error_probs(context);
    let normal_lhood = sample_likelihoods(normal.get(tiers.normal), alt_indel, indel_error, ref_error);
    let tumor_lhood = sample_likelihoods(tumor.get(tiers.tumor), alt_indel, indel_error, ref_error);
    let priors = GridPriors {
        somatic_rate: config.somatic_indel_rate,
        germline_theta: config.germline_indel_theta,
        shared_error_rate: noise.shared_indel_error_rate(indel_error),
        strand_bias_fraction: noise.strand_bias_fraction(),
        normal_noise: noise.expected_indel_noise(Sample::Normal, indel_error),
    };
    SomaticPosterior::compute(&normal_lhood, &tumor_lhood, &priors)
}

/// Score the somatic hypothesis for one candidate indel.
///
/// Breakpoints and indels without reads in either sample score zero.
pub fn score_indel(
    key: &IndelKey,
    normal: &IndelSampleEvidence,
    tumor: &IndelSampleEvidence,
    context: &IndelContext,
    config: &SomaticCallerConfig,
    noise: &NoiseModel,
) -> IndelScore {
    if key.is_breakpoint() {
        return IndelScore::zero(key, normal, tumor, context);
    }
    let tiers = match SampleTiers::select(normal, tumor) {
        Some(tiers) => tiers,
        None => {
            debug!("No reads intersect indel {}, scoring zero", key);
            return IndelScore::zero(key, normal, tumor, context);
        }
    };
    if tiers.reported() == Tier::Two {
        debug!("Indel {} scored with tier-2 fallback {:?}", key, tiers);
    }

    let alt_indel = if config.is_use_alt_indel {
        let reads: Vec<&ReadPathScores> = normal
            .get(tiers.normal)
            .reads
            .iter()
            .chain(tumor.get(tiers.tumor).reads.iter())
            .collect();
        select_alt_indel(&reads)
    } else {
        None
    };
    if let Some(alt) = &alt_indel {
        debug!("Indel {} scored against competing indel {}", key, alt);
    }

    let max_q = config.max_quality_score;
    let posterior = posterior_at_tiers(normal, tumor, tiers, alt_indel.as_ref(), context, config, noise);
    let mut qsi = posterior.qss(max_q);
    let mut qsi_ref = posterior.qss_ref(max_q);
    let mut reported_tier = tiers.reported();

    if config.is_tier2_min_quality && reported_tier == Tier::One {
        let tier2_only = SampleTiers::uniform(Tier::Two);
        let tier2 = posterior_at_tiers(normal, tumor, tier2_only, alt_indel.as_ref(), context, config, noise);
        let qsi2 = tier2.qss(max_q);
        if qsi2 < qsi {
            qsi = qsi2;
            reported_tier = Tier::Two;
        }
        qsi_ref = qsi_ref.min(tier2.qss_ref(max_q));
    }

    IndelScore {
        key: key.clone(),
        qsi,
        qsi_ref,
        normal_genotype: posterior.normal_genotype(),
        somatic_probability: posterior.somatic_probability(),
        tier: Some(reported_tier),
        alt_indel,
        context: context.clone(),
        normal: IndelSampleSummary::new(normal, tiers.normal),
        tumor: IndelSampleSummary::new(tumor, tiers.tumor),
    }
}
