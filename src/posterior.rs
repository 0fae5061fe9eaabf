//! Joint tumor/normal allele-frequency grid posterior and phred conversion.
//!
//! Each sample's evidence is summarized as log-likelihoods over a grid of
//! allele frequencies. Non-somatic states give both samples the same
//! frequency: a germline genotype, or a shared site-specific error (possibly
//! single-stranded). Somatic states pair a germline normal genotype with a
//! different tumor frequency, letting a fraction of the normal look like the
//! tumor to absorb contamination noise.

use bio::stats::{LogProb, PHREDProb};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;

/// Number of allele-frequency grid points, including 0 and 1
pub const GRID_SIZE: usize = 21;

/// Tumor allele frequency at which callable regions are assessed
pub const CALLABLE_MIN_FREQ: f64 = 0.1;

pub fn grid_freq(index: usize) -> f64 {
    index as f64 / (GRID_SIZE - 1) as f64
}

/// Germline genotype of the normal sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Genotype {
    Ref,
    Het,
    Hom,
}

impl Genotype {
    pub const ALL: [Genotype; 3] = [Genotype::Ref, Genotype::Het, Genotype::Hom];

    pub fn grid_index(self) -> usize {
        match self {
            Genotype::Ref => 0,
            Genotype::Het => (GRID_SIZE - 1) / 2,
            Genotype::Hom => GRID_SIZE - 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Genotype::Ref => "ref",
            Genotype::Het => "het",
            Genotype::Hom => "hom",
        }
    }

    fn prior(self, theta: f64) -> f64 {
        match self {
            Genotype::Ref => 1.0 - 1.5 * theta,
            Genotype::Het => theta,
            Genotype::Hom => theta / 2.0,
        }
    }
}

/// Log-likelihood of one sample's evidence at each grid frequency
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLikelihoods {
    /// Frequency applied on both strands
    pub both: Vec<LogProb>,
    /// Frequency on the forward (index 0) or reverse (index 1) strand only
    pub single_strand: Option<[Vec<LogProb>; 2]>,
}

impl SampleLikelihoods {
    /// Likelihoods with no strand resolution
    pub fn unstranded(both: Vec<LogProb>) -> Self {
        Self {
            both,
            single_strand: None,
        }
    }

    /// Likelihoods of a sample without evidence
    pub fn flat() -> Self {
        Self::unstranded(vec![LogProb::ln_one(); GRID_SIZE])
    }
}

/// Prior parameters of the grid model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPriors {
    pub somatic_rate: f64,
    pub germline_theta: f64,
    pub shared_error_rate: f64,
    pub strand_bias_fraction: f64,
    pub normal_noise: f64,
}

fn ln(p: f64) -> LogProb {
    LogProb(p.ln())
}

/// Posterior mass of the somatic and non-somatic state groups
#[derive(Debug, Clone, PartialEq)]
pub struct SomaticPosterior {
    ln_total: LogProb,
    ln_nonsomatic: LogProb,
    ln_somatic_ref: LogProb,
    ln_somatic_nonref: LogProb,
    ln_callable_error: LogProb,
    ln_normal_genotype: [LogProb; 3],
}

impl SomaticPosterior {
    pub fn compute(normal: &SampleLikelihoods, tumor: &SampleLikelihoods, priors: &GridPriors) -> Self {
        let n_nonzero = (GRID_SIZE - 1) as f64;
        // non-somatic terms carry no somatic-rate factor until the end
        let mut nonsomatic = Vec::with_capacity(4 * GRID_SIZE);
        let mut nonsomatic_genotype: [Vec<LogProb>; 3] = Default::default();
        let mut somatic_ref = Vec::with_capacity(GRID_SIZE);
        let mut somatic_nonref = Vec::with_capacity(2 * GRID_SIZE);
        let mut somatic_genotype: [Vec<LogProb>; 3] = Default::default();
        let mut callable = Vec::with_capacity(3 * GRID_SIZE);

        for (gi, genotype) in Genotype::ALL.iter().enumerate() {
            let g = genotype.grid_index();
            let term = ln(genotype.prior(priors.germline_theta) * (1.0 - priors.shared_error_rate))
                + normal.both[g]
                + tumor.both[g];
            nonsomatic.push(term);
            nonsomatic_genotype[gi].push(term);
        }

        // shared errors hit both samples at the same frequency
        let stranded = match (&normal.single_strand, &tumor.single_strand) {
            (Some(n), Some(t)) => Some((n, t)),
            _ => None,
        };
        let ln_error_prior = ln(priors.shared_error_rate / n_nonzero);
        for i in 1..GRID_SIZE {
            let mut terms = Vec::with_capacity(3);
            match stranded {
                Some((n, t)) => {
                    terms.push(ln_error_prior + ln(1.0 - priors.strand_bias_fraction) + normal.both[i] + tumor.both[i]);
                    for strand in 0..2 {
                        terms.push(
                            ln_error_prior + ln(priors.strand_bias_fraction / 2.0) + n[strand][i] + t[strand][i],
                        );
                    }
                }
                None => terms.push(ln_error_prior + normal.both[i] + tumor.both[i]),
            }
            for term in terms {
                nonsomatic.push(term);
                nonsomatic_genotype[0].push(term);
            }
        }

        let ln_noise = ln(priors.normal_noise);
        let ln_clean = ln(1.0 - priors.normal_noise);
        let is_callable_freq = |i: usize| grid_freq(i) >= CALLABLE_MIN_FREQ - 1e-9;
        for (gi, genotype) in Genotype::ALL.iter().enumerate() {
            let g = genotype.grid_index();
            let ln_genotype_prior = ln(genotype.prior(priors.germline_theta));
            let ln_prior = ln(priors.somatic_rate / n_nonzero) + ln_genotype_prior;
            let n_callable = (0..GRID_SIZE).filter(|&i| i != g && is_callable_freq(i)).count() as f64;
            for i in (0..GRID_SIZE).filter(|&i| i != g) {
                let ln_normal = (ln_clean + normal.both[g]).ln_add_exp(ln_noise + normal.both[i]);
                let ln_lhood = ln_normal + tumor.both[i];
                let term = ln_prior + ln_lhood;
                if *genotype == Genotype::Ref {
                    somatic_ref.push(term);
                } else {
                    somatic_nonref.push(term);
                }
                if is_callable_freq(i) {
                    callable.push(ln_genotype_prior + ln(1.0 / n_callable) + ln_lhood);
                }
                somatic_genotype[gi].push(term);
            }
        }

        let ln_nonsomatic_lhood = LogProb::ln_sum_exp(&nonsomatic);
        let ln_nonsomatic_prior = ln(1.0 - priors.somatic_rate);
        let ln_nonsomatic = ln_nonsomatic_prior + ln_nonsomatic_lhood;
        let ln_somatic_ref = LogProb::ln_sum_exp(&somatic_ref);
        let ln_somatic_nonref = LogProb::ln_sum_exp(&somatic_nonref);
        let ln_total = LogProb::ln_sum_exp(&[ln_nonsomatic, ln_somatic_ref, ln_somatic_nonref]);

        let ln_callable_lhood = LogProb::ln_sum_exp(&callable);
        let ln_callable_error = ln_callable_lhood - ln_callable_lhood.ln_add_exp(ln_nonsomatic_lhood);

        let mut ln_normal_genotype = [LogProb::ln_zero(); 3];
        for gi in 0..3 {
            let ln_germline = ln_nonsomatic_prior + LogProb::ln_sum_exp(&nonsomatic_genotype[gi]);
            ln_normal_genotype[gi] = ln_germline.ln_add_exp(LogProb::ln_sum_exp(&somatic_genotype[gi]));
        }

        Self {
            ln_total,
            ln_nonsomatic,
            ln_somatic_ref,
            ln_somatic_nonref,
            ln_callable_error,
            ln_normal_genotype,
        }
    }

    /// Posterior probability of any somatic state
    pub fn somatic_probability(&self) -> f64 {
        let p = f64::exp(*(self.ln_somatic_ref.ln_add_exp(self.ln_somatic_nonref) - self.ln_total));
        if p.is_nan() {
            0.0
        } else {
            p.clamp(0.0, 1.0)
        }
    }

    /// Somatic quality: phred of the non-somatic posterior
    pub fn qss(&self, max_quality: u32) -> u32 {
        quality_from_ln_error(self.ln_nonsomatic - self.ln_total, max_quality)
    }

    /// Quality of "somatic with a reference normal"
    pub fn qss_ref(&self, max_quality: u32) -> u32 {
        let ln_error = self.ln_nonsomatic.ln_add_exp(self.ln_somatic_nonref);
        quality_from_ln_error(ln_error - self.ln_total, max_quality)
    }

    /// Confidence that no somatic variant at tumor frequency
    /// >= [`CALLABLE_MIN_FREQ`] is present, weighing both hypotheses equally
    pub fn nqss(&self, max_quality: u32) -> u32 {
        quality_from_ln_error(self.ln_callable_error, max_quality)
    }

    /// Most probable normal genotype
    pub fn normal_genotype(&self) -> Genotype {
        let mut best = 0;
        for i in 1..3 {
            if self.ln_normal_genotype[i] > self.ln_normal_genotype[best] {
                best = i;
            }
        }
        Genotype::ALL[best]
    }
}

/// Phred quality of an error probability, clipped to `[0, max_quality]`.
/// NaN maps to 0.
pub fn quality_from_ln_error(ln_error: LogProb, max_quality: u32) -> u32 {
    if ln_error.is_nan() {
        return 0;
    }
    if *ln_error == f64::NEG_INFINITY {
        return max_quality;
    }
    let phred = *PHREDProb::from(ln_error);
    if phred.is_nan() || phred <= 0.0 {
        0
    } else {
        phred.round().min(max_quality as f64) as u32
    }
}

/// `-10 * log10(1 - posterior)`, clipped to `[0, max_quality]`
pub fn quality_from_posterior(posterior: f64, max_quality: u32) -> u32 {
    if posterior.is_nan() {
        return 0;
    }
    let error = 1.0 - posterior.clamp(0.0, 1.0);
    quality_from_ln_error(LogProb(error.ln()), max_quality)
}

/// Phred-scaled value as a float, for empirical scoring features
pub fn phred_from_ln(ln_error: LogProb) -> f64 {
    -10.0 * *ln_error / LN_10
}
