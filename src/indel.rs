//! Indel candidate identity and per-sample, per-tier read evidence

use crate::config::IndelCandidacyConfig;
use crate::{Sample, SomaticError, SomaticResult, Tier, TierEvidence, TierPair};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Indels up to this length are subject to the small-indel fraction test
pub const MAX_SMALL_CANDIDATE_INDEL_LEN: u32 = 4;

/// Posterior a read's best path needs before it counts as supporting
const MIN_SUPPORTING_PATH_PPROB: f64 = 0.999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndelKind {
    Insertion,
    Deletion,
    BreakpointLeft,
    BreakpointRight,
}

impl IndelKind {
    pub fn label(self) -> &'static str {
        match self {
            IndelKind::Insertion => "INS",
            IndelKind::Deletion => "DEL",
            IndelKind::BreakpointLeft => "BP_LEFT",
            IndelKind::BreakpointRight => "BP_RIGHT",
        }
    }
}

/// Identity of a candidate indel.
///
/// `pos` is the first reference position after the indel's left anchor: the
/// first deleted base, or the base an insertion is placed before. `seq` holds
/// the inserted bases (empty for deletions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndelKey {
    pub pos: u64,
    pub kind: IndelKind,
    pub length: u32,
    pub seq: String,
}

impl IndelKey {
    pub fn deletion(pos: u64, length: u32) -> Self {
        Self {
            pos,
            kind: IndelKind::Deletion,
            length,
            seq: String::new(),
        }
    }

    pub fn insertion(pos: u64, seq: &str) -> Self {
        Self {
            pos,
            kind: IndelKind::Insertion,
            length: seq.len() as u32,
            seq: seq.to_ascii_uppercase(),
        }
    }

    pub fn is_breakpoint(&self) -> bool {
        matches!(self.kind, IndelKind::BreakpointLeft | IndelKind::BreakpointRight)
    }

    pub fn is_small(&self) -> bool {
        self.length <= MAX_SMALL_CANDIDATE_INDEL_LEN
    }

    /// Reference bases removed by the indel
    pub fn deleted_length(&self) -> u64 {
        match self.kind {
            IndelKind::Deletion => self.length as u64,
            _ => 0,
        }
    }

    /// Last reference position touched by the indel
    pub fn right_pos(&self) -> u64 {
        (self.pos + self.deleted_length()).saturating_sub(1).max(self.pos)
    }
}

impl fmt::Display for IndelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.pos, self.kind.label(), self.length)?;
        if !self.seq.is_empty() {
            write!(f, ":{}", self.seq)?;
        }
        Ok(())
    }
}

/// Log-likelihoods of one read under each candidate haplotype
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadPathScores {
    pub ref_lnp: f64,
    pub indel_lnp: f64,
    /// Competing nearby indel representations this read was also aligned to
    pub alt_indels: Vec<(IndelKey, f64)>,
}

impl ReadPathScores {
    pub fn new(ref_lnp: f64, indel_lnp: f64) -> Self {
        Self {
            ref_lnp,
            indel_lnp,
            alt_indels: Vec::new(),
        }
    }

    /// Build from a support direction and the log-likelihood of the allele
    /// the read does not support, relative to the one it does
    pub fn from_support(supports_alt: bool, ln_lhood: f64) -> Self {
        if supports_alt {
            Self::new(ln_lhood, 0.0)
        } else {
            Self::new(0.0, ln_lhood)
        }
    }

    pub fn with_alt_indel(mut self, key: IndelKey, lnp: f64) -> Self {
        self.alt_indels.push((key, lnp));
        self
    }

    fn best_other_lnp(&self) -> f64 {
        self.alt_indels
            .iter()
            .map(|(_, lnp)| *lnp)
            .fold(self.ref_lnp, f64::max)
    }
}

/// Classification of a read against one indel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSupport {
    Indel,
    Other,
    Ambiguous,
}

fn classify(scores: &ReadPathScores) -> ReadSupport {
    let min_ratio = (MIN_SUPPORTING_PATH_PPROB / (1.0 - MIN_SUPPORTING_PATH_PPROB)).ln();
    let diff = scores.indel_lnp - scores.best_other_lnp();
    if diff >= min_ratio {
        ReadSupport::Indel
    } else if diff <= -min_ratio {
        ReadSupport::Other
    } else {
        ReadSupport::Ambiguous
    }
}

/// Evidence for one indel in one sample and tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndelEvidence {
    pub n_alt: u32,
    pub n_ref: u32,
    pub n_ambiguous: u32,
    pub ref_lnp_sum: f64,
    pub indel_lnp_sum: f64,
    pub reads: Vec<ReadPathScores>,
}

impl IndelEvidence {
    pub const EMPTY: IndelEvidence = IndelEvidence {
        n_alt: 0,
        n_ref: 0,
        n_ambiguous: 0,
        ref_lnp_sum: 0.0,
        indel_lnp_sum: 0.0,
        reads: Vec::new(),
    };

    fn add(&mut self, scores: ReadPathScores) {
        match classify(&scores) {
            ReadSupport::Indel => self.n_alt += 1,
            ReadSupport::Other => self.n_ref += 1,
            ReadSupport::Ambiguous => self.n_ambiguous += 1,
        }
        self.ref_lnp_sum += scores.ref_lnp;
        self.indel_lnp_sum += scores.indel_lnp;
        self.reads.push(scores);
    }

    /// All reads intersecting the indel
    pub fn n_total(&self) -> u32 {
        self.n_alt + self.n_ref + self.n_ambiguous
    }

    pub fn alt_fraction(&self) -> f64 {
        match self.n_total() {
            0 => 0.0,
            total => self.n_alt as f64 / total as f64,
        }
    }
}

impl Default for IndelEvidence {
    fn default() -> Self {
        IndelEvidence::EMPTY
    }
}

impl TierEvidence for IndelEvidence {
    fn has_evidence(&self) -> bool {
        !self.reads.is_empty()
    }
}

pub type IndelSampleEvidence = TierPair<IndelEvidence>;

static EMPTY_SAMPLE_EVIDENCE: IndelSampleEvidence = TierPair {
    tier1: IndelEvidence::EMPTY,
    tier2: IndelEvidence::EMPTY,
};

#[derive(Debug, Clone)]
struct IndelRecord {
    order: u64,
    samples: [IndelSampleEvidence; 2],
}

/// A tracker entry removed once its window closed
#[derive(Debug, Clone)]
pub struct RetiredIndel {
    pub key: IndelKey,
    pub order: u64,
    pub normal: IndelSampleEvidence,
    pub tumor: IndelSampleEvidence,
}

impl RetiredIndel {
    /// Same candidacy test the tracker applied while the indel was open
    pub fn is_candidate(&self, config: &IndelCandidacyConfig) -> bool {
        is_indel_candidate(&self.key, [&self.normal, &self.tumor], config)
    }
}

/// Candidate indels and their read evidence, bounded to an active window
#[derive(Debug, Default)]
pub struct IndelEvidenceTracker {
    indels: BTreeMap<IndelKey, IndelRecord>,
    next_order: u64,
}

impl IndelEvidenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_mut(&mut self, key: &IndelKey) -> &mut IndelRecord {
        let next_order = &mut self.next_order;
        self.indels.entry(key.clone()).or_insert_with(|| {
            let order = *next_order;
            *next_order += 1;
            IndelRecord {
                order,
                samples: Default::default(),
            }
        })
    }

    /// Record one read. `ln_lhood` is the log-likelihood of the allele the
    /// read does not support relative to the one it does, so must be <= 0.
    pub fn record_read(
        &mut self,
        key: &IndelKey,
        sample: Sample,
        tier: Tier,
        supports_alt: bool,
        ln_lhood: f64,
    ) -> SomaticResult<()> {
        if ln_lhood.is_nan() || ln_lhood > 0.0 {
            return Err(SomaticError::InvalidEvidence(format!(
                "relative log-likelihood {} for indel {} must be <= 0",
                ln_lhood, key
            )));
        }
        self.record_read_paths(key, sample, tier, ReadPathScores::from_support(supports_alt, ln_lhood))
    }

    /// Record one read with full path scores. A tier-1 read also counts
    /// toward tier 2.
    pub fn record_read_paths(
        &mut self,
        key: &IndelKey,
        sample: Sample,
        tier: Tier,
        scores: ReadPathScores,
    ) -> SomaticResult<()> {
        if scores.ref_lnp.is_nan() || scores.indel_lnp.is_nan() {
            return Err(SomaticError::InvalidEvidence(format!(
                "read path scores for indel {} are not numbers",
                key
            )));
        }
        let evidence = &mut self.record_mut(key).samples[sample.index()];
        if tier == Tier::One {
            evidence.tier1.add(scores.clone());
        }
        evidence.tier2.add(scores);
        Ok(())
    }

    /// Aggregated evidence, empty if the indel was never seen in `sample`
    pub fn get_evidence(&self, key: &IndelKey, sample: Sample) -> &IndelSampleEvidence {
        self.indels
            .get(key)
            .map(|r| &r.samples[sample.index()])
            .unwrap_or(&EMPTY_SAMPLE_EVIDENCE)
    }

    /// Whether any sample's tier-1 evidence passes every candidacy test
    pub fn is_candidate(&self, key: &IndelKey, config: &IndelCandidacyConfig) -> bool {
        match self.indels.get(key) {
            Some(record) => {
                let [normal, tumor] = &record.samples;
                is_indel_candidate(key, [normal, tumor], config)
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.indels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indels.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &IndelKey> {
        self.indels.keys()
    }

    /// Smallest left position among tracked indels
    pub fn min_pos(&self) -> Option<u64> {
        self.indels.keys().next().map(|k| k.pos)
    }

    /// Remove every indel whose window (`right_pos + flank`) ends before `pos`
    pub fn retire_before(&mut self, pos: u64, flank: u64) -> Vec<RetiredIndel> {
        let closed: Vec<IndelKey> = self
            .indels
            .keys()
            .filter(|k| k.right_pos() + flank < pos)
            .cloned()
            .collect();
        self.take_keys(closed)
    }

    /// Remove every tracked indel
    pub fn retire_all(&mut self) -> Vec<RetiredIndel> {
        let keys: Vec<IndelKey> = self.indels.keys().cloned().collect();
        self.take_keys(keys)
    }

    fn take_keys(&mut self, keys: Vec<IndelKey>) -> Vec<RetiredIndel> {
        keys.into_iter()
            .filter_map(|key| {
                self.indels.remove(&key).map(|record| {
                    let [normal, tumor] = record.samples;
                    RetiredIndel {
                        key,
                        order: record.order,
                        normal,
                        tumor,
                    }
                })
            })
            .collect()
    }
}

/// An indel is a candidate when the tier-1 evidence of any sample passes
fn is_indel_candidate(key: &IndelKey, samples: [&IndelSampleEvidence; 2], config: &IndelCandidacyConfig) -> bool {
    Sample::ALL
        .iter()
        .any(|&sample| is_sample_candidate(key, &samples[sample.index()].tier1, sample, config))
}

/// Candidacy of one sample's tier-1 evidence. Unset thresholds always pass;
/// a sample with no intersecting reads never does.
pub fn is_sample_candidate(
    key: &IndelKey,
    evidence: &IndelEvidence,
    sample: Sample,
    config: &IndelCandidacyConfig,
) -> bool {
    let total = evidence.n_total();
    if total == 0 {
        return false;
    }

    let count_ok = config
        .min_reads(sample)
        .map_or(true, |min| evidence.n_alt >= min);

    let frac_ok = !key.is_small()
        || config
            .min_small_read_frac(sample)
            .map_or(true, |min| evidence.alt_fraction() >= min);

    log::debug!(
        "{} candidacy of {}: alt={} total={} count_ok={} frac_ok={}",
        sample,
        key,
        evidence.n_alt,
        total,
        count_ok,
        frac_ok
    );
    count_ok && frac_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tracker: &mut IndelEvidenceTracker, key: &IndelKey, sample: Sample, n_alt: u32, n_ref: u32) {
        for _ in 0..n_alt {
            tracker.record_read(key, sample, Tier::One, true, -20.0).unwrap();
        }
        for _ in 0..n_ref {
            tracker.record_read(key, sample, Tier::One, false, -20.0).unwrap();
        }
    }

    #[test]
    fn test_counts_and_sums() {
        let mut tracker = IndelEvidenceTracker::new();
        let key = IndelKey::deletion(100, 2);
        record(&mut tracker, &key, Sample::Tumor, 3, 2);
        tracker.record_read(&key, Sample::Tumor, Tier::Two, true, -1.0).unwrap();

        let ev = tracker.get_evidence(&key, Sample::Tumor);
        assert_eq!(ev.tier1.n_alt, 3);
        assert_eq!(ev.tier1.n_ref, 2);
        assert_eq!(ev.tier2.n_total(), 6);
        assert_eq!(ev.tier2.n_ambiguous, 1);
        assert!((ev.tier1.ref_lnp_sum - (-60.0)).abs() < 1e-12);
        assert!(ev.tier1.n_alt <= ev.tier1.n_total());
    }

    #[test]
    fn test_missing_evidence_is_zeroed() {
        let tracker = IndelEvidenceTracker::new();
        let ev = tracker.get_evidence(&IndelKey::insertion(5, "A"), Sample::Normal);
        assert_eq!(ev.tier1.n_total(), 0);
        assert!(ev.tier2.reads.is_empty());
    }

    #[test]
    fn test_rejects_positive_relative_likelihood() {
        let mut tracker = IndelEvidenceTracker::new();
        let key = IndelKey::insertion(5, "AC");
        assert!(tracker.record_read(&key, Sample::Tumor, Tier::One, true, 0.5).is_err());
        assert!(tracker.record_read(&key, Sample::Tumor, Tier::One, true, f64::NAN).is_err());
    }

    #[test]
    fn test_candidate_fails_count_test() {
        let mut tracker = IndelEvidenceTracker::new();
        let key = IndelKey::deletion(50, 1);
        record(&mut tracker, &key, Sample::Tumor, 2, 18);

        let config = IndelCandidacyConfig {
            min_candidate_indel_reads: Some(3),
            ..Default::default()
        };
        assert!(!tracker.is_candidate(&key, &config));
        // idempotent
        assert!(!tracker.is_candidate(&key, &config));

        let permissive = IndelCandidacyConfig::default();
        assert!(tracker.is_candidate(&key, &permissive));
    }

    #[test]
    fn test_candidate_small_fraction_test() {
        let mut tracker = IndelEvidenceTracker::new();
        let small = IndelKey::insertion(10, "T");
        let large = IndelKey::deletion(10, 10);
        record(&mut tracker, &small, Sample::Tumor, 3, 97);
        record(&mut tracker, &large, Sample::Tumor, 3, 97);

        let config = IndelCandidacyConfig {
            min_small_candidate_indel_read_frac: Some(0.05),
            ..Default::default()
        };
        assert!(!tracker.is_candidate(&small, &config));
        assert!(tracker.is_candidate(&large, &config));
    }

    #[test]
    fn test_candidate_via_other_sample() {
        let mut tracker = IndelEvidenceTracker::new();
        let key = IndelKey::deletion(70, 3);
        // no tumor reads at all, normal carries the support
        record(&mut tracker, &key, Sample::Normal, 4, 4);

        let config = IndelCandidacyConfig {
            min_candidate_indel_reads: Some(3),
            tumor_min_candidate_indel_reads: Some(10),
            ..Default::default()
        };
        assert!(tracker.is_candidate(&key, &config));
        let tumor_only = IndelCandidacyConfig {
            min_candidate_indel_reads: Some(5),
            ..Default::default()
        };
        assert!(!tracker.is_candidate(&key, &tumor_only));
    }

    #[test]
    fn test_retired_indel_keeps_candidacy() {
        let mut tracker = IndelEvidenceTracker::new();
        let weak = IndelKey::deletion(100, 2);
        let strong = IndelKey::deletion(110, 2);
        record(&mut tracker, &weak, Sample::Tumor, 2, 18);
        record(&mut tracker, &strong, Sample::Normal, 4, 4);
        let config = IndelCandidacyConfig {
            min_candidate_indel_reads: Some(3),
            tumor_min_candidate_indel_reads: Some(10),
            ..Default::default()
        };
        let open: Vec<bool> = [&weak, &strong].iter().map(|k| tracker.is_candidate(k, &config)).collect();
        assert_eq!(open, vec![false, true]);

        let retired: Vec<bool> = tracker.retire_all().iter().map(|r| r.is_candidate(&config)).collect();
        assert_eq!(retired, open);
        assert!(!tracker.is_candidate(&strong, &config));
    }

    #[test]
    fn test_alt_indel_reads_do_not_support() {
        let mut tracker = IndelEvidenceTracker::new();
        let key = IndelKey::deletion(70, 3);
        let competitor = IndelKey::deletion(71, 3);
        let scores = ReadPathScores::new(-30.0, -15.0).with_alt_indel(competitor, 0.0);
        tracker.record_read_paths(&key, Sample::Tumor, Tier::One, scores).unwrap();
        assert_eq!(tracker.get_evidence(&key, Sample::Tumor).tier1.n_ref, 1);
    }

    #[test]
    fn test_retire_before_window() {
        let mut tracker = IndelEvidenceTracker::new();
        let early = IndelKey::deletion(100, 5);
        let late = IndelKey::insertion(200, "GG");
        record(&mut tracker, &early, Sample::Tumor, 1, 0);
        record(&mut tracker, &late, Sample::Tumor, 1, 0);

        assert!(tracker.retire_before(120, 25).is_empty());
        let retired = tracker.retire_before(130, 25);
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].key, early);
        assert_eq!(retired[0].tumor.tier1.n_alt, 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.min_pos(), Some(200));
    }

    #[test]
    fn test_right_pos() {
        assert_eq!(IndelKey::deletion(10, 3).right_pos(), 12);
        assert_eq!(IndelKey::insertion(10, "ACGT").right_pos(), 10);
    }
}
