//! Somatic SNV scoring of one position from the normal and tumor pileups

use crate::config::SomaticCallerConfig;
use crate::noise::NoiseModel;
use crate::pileup::{Base, BaseCall, SitePileup};
use crate::posterior::{grid_freq, Genotype, GridPriors, SampleLikelihoods, SomaticPosterior, GRID_SIZE};
use crate::{Sample, SampleTiers, Tier};
use bio::stats::LogProb;
use log::debug;
use serde::Serialize;

/// Per-sample support summary reported with each site
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleSiteSummary {
    pub depth_tier1: u32,
    pub depth_tier2: u32,
    pub ref_count: u32,
    pub alt_count: u32,
    /// Alt-supporting calls on the forward and reverse strands
    pub alt_strand_counts: [u32; 2],
    pub n_filtered: u32,
    pub n_spanning_deletions: u32,
}

impl SampleSiteSummary {
    fn new(pileup: &SitePileup, tier: Tier, alt: Option<Base>) -> Self {
        let counts = pileup.base_counts(tier);
        let (alt_count, alt_strand_counts) = match alt {
            Some(base) => (counts[base.index()], pileup.strand_counts(tier, base)),
            None => (0, [0, 0]),
        };
        Self {
            depth_tier1: pileup.depth(Tier::One),
            depth_tier2: pileup.depth(Tier::Two),
            ref_count: counts[pileup.ref_base.index()],
            alt_count,
            alt_strand_counts,
            n_filtered: pileup.n_filtered(),
            n_spanning_deletions: pileup.n_spanning_deletions,
        }
    }
}

/// Somatic SNV score of one site
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteScore {
    pub ref_base: Base,
    pub alt_base: Option<Base>,
    pub qss: u32,
    pub qss_ref: u32,
    /// Confidence that no somatic SNV at >= 10% tumor frequency is present
    pub nqss: u32,
    pub normal_genotype: Genotype,
    pub somatic_probability: f64,
    /// Tier the reported score came from; `None` when no evidence was usable
    pub tier: Option<Tier>,
    pub normal: SampleSiteSummary,
    pub tumor: SampleSiteSummary,
}

impl SiteScore {
    fn zero(normal: &SitePileup, tumor: &SitePileup) -> Self {
        Self {
            ref_base: tumor.ref_base,
            alt_base: None,
            qss: 0,
            qss_ref: 0,
            nqss: 0,
            normal_genotype: Genotype::Ref,
            somatic_probability: 0.0,
            tier: None,
            normal: SampleSiteSummary::new(normal, Tier::One, None),
            tumor: SampleSiteSummary::new(tumor, Tier::One, None),
        }
    }

    pub fn summary(&self, sample: Sample) -> &SampleSiteSummary {
        match sample {
            Sample::Normal => &self.normal,
            Sample::Tumor => &self.tumor,
        }
    }
}

/// Most frequent non-reference base in the tumor, then the normal.
/// Ties go to the earlier base in A, C, G, T order.
fn select_alt_base(normal: &SitePileup, tumor: &SitePileup, tiers: SampleTiers) -> Base {
    let ref_base = tumor.ref_base;
    let mut best: Option<(Base, u32)> = None;
    for (pileup, tier) in [(tumor, tiers.tumor), (normal, tiers.normal)] {
        let counts = pileup.base_counts(tier);
        for base in Base::KNOWN.iter().copied().filter(|&b| b != ref_base) {
            let count = counts[base.index()];
            if count > 0 && best.map_or(true, |(_, c)| count > c) {
                best = Some((base, count));
            }
        }
        if best.is_some() {
            break;
        }
    }
    match best {
        Some((base, _)) => base,
        // without alt observations every alt base gives the same likelihood
        None => Base::KNOWN
            .iter()
            .copied()
            .find(|&b| b != ref_base)
            .unwrap_or(Base::C),
    }
}

fn call_lhood(f: f64, p_alt: f64, p_ref: f64) -> f64 {
    (f * p_alt + (1.0 - f) * p_ref).ln()
}

/// Per-read allele likelihoods `(P(obs | alt), P(obs | ref))`
fn allele_probs(call: &BaseCall, ref_base: Base, alt_base: Base, noise: &NoiseModel) -> (f64, f64) {
    let e = noise.error_probability(call);
    let mismatch = e / 3.0;
    if call.base == alt_base {
        (1.0 - e, mismatch)
    } else if call.base == ref_base {
        (mismatch, 1.0 - e)
    } else {
        (mismatch, mismatch)
    }
}

fn sample_likelihoods(calls: &[BaseCall], ref_base: Base, alt_base: Base, noise: &NoiseModel) -> SampleLikelihoods {
    let mut both = vec![0.0; GRID_SIZE];
    let mut stranded = [vec![0.0; GRID_SIZE], vec![0.0; GRID_SIZE]];
    for call in calls.iter().filter(|c| c.base.is_known()) {
        let (p_alt, p_ref) = allele_probs(call, ref_base, alt_base, noise);
        let strand = call.strand.index();
        for i in 0..GRID_SIZE {
            let lhood = call_lhood(grid_freq(i), p_alt, p_ref);
            both[i] += lhood;
            stranded[strand][i] += lhood;
            stranded[1 - strand][i] += p_ref.ln();
        }
    }
    let to_log = |v: Vec<f64>| v.into_iter().map(LogProb).collect::<Vec<_>>();
    let [forward, reverse] = stranded;
    SampleLikelihoods {
        both: to_log(both),
        single_strand: Some([to_log(forward), to_log(reverse)]),
    }
}

fn posterior_at_tiers(
    normal: &SitePileup,
    tumor: &SitePileup,
    tiers: SampleTiers,
    alt_base: Base,
    config: &SomaticCallerConfig,
    noise: &NoiseModel,
) -> SomaticPosterior {
    let ref_base = tumor.ref_base;
    let normal_lhood = sample_likelihoods(normal.calls.get(tiers.normal), ref_base, alt_base, noise);
    let tumor_lhood = sample_likelihoods(tumor.calls.get(tiers.tumor), ref_base, alt_base, noise);
    let priors = GridPriors {
        somatic_rate: config.somatic_snv_rate,
        germline_theta: config.germline_snv_theta,
        shared_error_rate: noise.shared_site_error_rate(),
        strand_bias_fraction: noise.strand_bias_fraction(),
        normal_noise: noise.expected_site_noise(Sample::Normal),
    };
    SomaticPosterior::compute(&normal_lhood, &tumor_lhood, &priors)
}

/// Score the somatic SNV hypothesis at one site.
///
/// Each sample contributes its tier-1 calls, or its tier-2 calls when it has
/// no tier-1 calls. A site with no usable evidence scores zero.
pub fn score_site(
    normal: &SitePileup,
    tumor: &SitePileup,
    config: &SomaticCallerConfig,
    noise: &NoiseModel,
) -> SiteScore {
    if !tumor.ref_base.is_known() {
        debug!("Skipping site with unknown reference base");
        return SiteScore::zero(normal, tumor);
    }
    let tiers = match SampleTiers::select(&normal.calls, &tumor.calls) {
        Some(tiers) => tiers,
        None => {
            debug!("No tier-1 or tier-2 calls at site, scoring zero");
            return SiteScore::zero(normal, tumor);
        }
    };
    if tiers.reported() == Tier::Two {
        debug!("Site scored with tier-2 fallback {:?}", tiers);
    }

    let max_q = config.max_quality_score;
    let alt_base = select_alt_base(normal, tumor, tiers);
    let posterior = posterior_at_tiers(normal, tumor, tiers, alt_base, config, noise);
    let mut qss = posterior.qss(max_q);
    let mut qss_ref = posterior.qss_ref(max_q);
    let mut reported_tier = tiers.reported();

    if config.is_tier2_min_quality && reported_tier == Tier::One {
        let tier2 = posterior_at_tiers(normal, tumor, SampleTiers::uniform(Tier::Two), alt_base, config, noise);
        let qss2 = tier2.qss(max_q);
        if qss2 < qss {
            qss = qss2;
            reported_tier = Tier::Two;
        }
        qss_ref = qss_ref.min(tier2.qss_ref(max_q));
    }

    let has_alt = normal.base_counts(tiers.normal)[alt_base.index()] + tumor.base_counts(tiers.tumor)[alt_base.index()] > 0;
    SiteScore {
        ref_base: tumor.ref_base,
        alt_base: if has_alt { Some(alt_base) } else { None },
        qss,
        qss_ref,
        nqss: posterior.nqss(max_q),
        normal_genotype: posterior.normal_genotype(),
        somatic_probability: posterior.somatic_probability(),
        tier: Some(reported_tier),
        normal: SampleSiteSummary::new(normal, tiers.normal, Some(alt_base)),
        tumor: SampleSiteSummary::new(tumor, tiers.tumor, Some(alt_base)),
    }
}
