//! Noise and error-rate model supplying priors to the likelihood engine

use crate::config::SomaticCallerConfig;
use crate::context::IndelContext;
use crate::pileup::BaseCall;
use crate::Sample;
use bio::stats::{LogProb, PHREDProb, Prob};

/// Indel error rate outside any repeat
const INDEL_ERROR_RATE_MIN: f64 = 1e-4;
/// Indel error rate at and above `INDEL_ERROR_MAX_REPEAT` repeat copies
const INDEL_ERROR_RATE_MAX: f64 = 5e-3;
const INDEL_ERROR_MAX_REPEAT: u32 = 16;
/// Repeat units longer than this do not raise the error rate
const INDEL_ERROR_MAX_UNIT_LEN: usize = 2;

/// Immutable error and noise rates derived from the caller configuration
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseModel {
    shared_site_error_rate: f64,
    shared_indel_error_factor: f64,
    strand_bias_fraction: f64,
    site_normal_noise_rate: Option<f64>,
    indel_normal_noise_rate: Option<f64>,
}

impl NoiseModel {
    pub fn from_config(config: &SomaticCallerConfig) -> Self {
        Self {
            shared_site_error_rate: config.shared_site_error_rate,
            shared_indel_error_factor: config.shared_indel_error_factor,
            strand_bias_fraction: config.shared_site_error_strand_bias_fraction,
            site_normal_noise_rate: config.site_somatic_normal_noise_rate,
            indel_normal_noise_rate: config.indel_somatic_normal_noise_rate,
        }
    }

    pub fn shared_site_error_rate(&self) -> f64 {
        self.shared_site_error_rate
    }

    pub fn strand_bias_fraction(&self) -> f64 {
        self.strand_bias_fraction
    }

    /// Rate of shared tumor/normal indel errors for an indel with the given
    /// context-specific error probability
    pub fn shared_indel_error_rate(&self, indel_error_prob: f64) -> f64 {
        (indel_error_prob * self.shared_indel_error_factor).min(1.0)
    }

    /// Expected somatic-allele noise in `sample` at a site: the explicit
    /// normal noise rate when configured, the shared site error otherwise
    pub fn expected_site_noise(&self, sample: Sample) -> f64 {
        match (sample, self.site_normal_noise_rate) {
            (Sample::Normal, Some(rate)) => rate,
            _ => self.shared_site_error_rate,
        }
    }

    pub fn expected_indel_noise(&self, sample: Sample, indel_error_prob: f64) -> f64 {
        match (sample, self.indel_normal_noise_rate) {
            (Sample::Normal, Some(rate)) => rate,
            _ => self.shared_indel_error_rate(indel_error_prob),
        }
    }

    pub fn error_probability(&self, call: &BaseCall) -> f64 {
        error_probability(call.qscore)
    }

    /// Context-specific (indel, reference) error probabilities: the chance a
    /// reference read shows the indel, and an indel read shows the reference
    pub fn indel_error_probs(&self, context: &IndelContext) -> (f64, f64) {
        if context.repeat_unit_len() > INDEL_ERROR_MAX_UNIT_LEN {
            return (INDEL_ERROR_RATE_MIN, INDEL_ERROR_RATE_MIN);
        }
        (
            repeat_error_rate(context.ref_repeat_count),
            repeat_error_rate(context.indel_repeat_count),
        )
    }
}

/// Base-call error probability of a phred quality score
pub fn error_probability(qscore: u8) -> f64 {
    *Prob::from(PHREDProb(qscore as f64))
}

pub fn ln_error_probability(qscore: u8) -> LogProb {
    LogProb::from(PHREDProb(qscore as f64))
}

/// Log-linear interpolation between the baseline and saturated indel error
fn repeat_error_rate(repeat_count: u32) -> f64 {
    if repeat_count <= 1 {
        return INDEL_ERROR_RATE_MIN;
    }
    let count = repeat_count.min(INDEL_ERROR_MAX_REPEAT);
    let frac = (count - 1) as f64 / (INDEL_ERROR_MAX_REPEAT - 1) as f64;
    let ln_rate = INDEL_ERROR_RATE_MIN.ln() + frac * (INDEL_ERROR_RATE_MAX.ln() - INDEL_ERROR_RATE_MIN.ln());
    ln_rate.exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pileup::Base;
    use crate::Strand;
    use approx::assert_relative_eq;

    #[test]
    fn test_site_noise_fallback() {
        let model = NoiseModel::from_config(&SomaticCallerConfig::default());
        assert_relative_eq!(model.expected_site_noise(Sample::Normal), 1e-4);
        assert_relative_eq!(model.expected_site_noise(Sample::Tumor), 1e-4);

        let config = SomaticCallerConfig {
            site_somatic_normal_noise_rate: Some(0.02),
            ..Default::default()
        };
        let model = NoiseModel::from_config(&config);
        assert_relative_eq!(model.expected_site_noise(Sample::Normal), 0.02);
        assert_relative_eq!(model.expected_site_noise(Sample::Tumor), 1e-4);
    }

    #[test]
    fn test_indel_noise_fallback() {
        let model = NoiseModel::from_config(&SomaticCallerConfig::default());
        assert_relative_eq!(model.expected_indel_noise(Sample::Normal, 1e-4), 1.4e-4);

        let config = SomaticCallerConfig {
            indel_somatic_normal_noise_rate: Some(0.01),
            ..Default::default()
        };
        let model = NoiseModel::from_config(&config);
        assert_relative_eq!(model.expected_indel_noise(Sample::Normal, 1e-4), 0.01);
        assert_relative_eq!(model.expected_indel_noise(Sample::Tumor, 1e-4), 1.4e-4);
    }

    #[test]
    fn test_error_probability_from_quality() {
        let model = NoiseModel::from_config(&SomaticCallerConfig::default());
        let call = BaseCall::new(Base::A, 30, Strand::Forward, true, true);
        assert_relative_eq!(model.error_probability(&call), 0.001, epsilon = 1e-12);
        assert_relative_eq!(error_probability(20), 0.01, epsilon = 1e-12);
        assert_relative_eq!(*ln_error_probability(10), 0.1f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_repeat_error_rate_monotone() {
        assert_relative_eq!(repeat_error_rate(0), INDEL_ERROR_RATE_MIN);
        assert_relative_eq!(repeat_error_rate(16), INDEL_ERROR_RATE_MAX, epsilon = 1e-12);
        assert_relative_eq!(repeat_error_rate(40), INDEL_ERROR_RATE_MAX, epsilon = 1e-12);
        let mut last = 0.0;
        for count in 0..20 {
            let rate = repeat_error_rate(count);
            assert!(rate >= last);
            last = rate;
        }
    }
}
