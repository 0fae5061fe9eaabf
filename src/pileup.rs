//! Per-position base-call accumulation into tier-1 and tier-2 pileups

use crate::{Sample, SomaticError, SomaticResult, Strand, Tier, TierPair};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A called nucleotide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Base {
    A,
    C,
    G,
    T,
    N,
}

impl Base {
    pub const KNOWN: [Base; 4] = [Base::A, Base::C, Base::G, Base::T];

    pub fn from_u8(b: u8) -> Base {
        match b.to_ascii_uppercase() {
            b'A' => Base::A,
            b'C' => Base::C,
            b'G' => Base::G,
            b'T' => Base::T,
            _ => Base::N,
        }
    }

    pub fn from_char(c: char) -> Base {
        if c.is_ascii() {
            Base::from_u8(c as u8)
        } else {
            Base::N
        }
    }

    pub fn index(self) -> usize {
        match self {
            Base::A => 0,
            Base::C => 1,
            Base::G => 2,
            Base::T => 3,
            Base::N => 4,
        }
    }

    pub fn is_known(self) -> bool {
        self != Base::N
    }

    pub fn as_char(self) -> char {
        match self {
            Base::A => 'A',
            Base::C => 'C',
            Base::G => 'G',
            Base::T => 'T',
            Base::N => 'N',
        }
    }
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One read's observation at one position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseCall {
    pub base: Base,
    pub qscore: u8,
    pub strand: Strand,
    pub is_tier1_pass: bool,
    pub is_tier2_pass: bool,
    pub read_pos: Option<u32>,
    pub read_len: Option<u32>,
}

impl BaseCall {
    /// Build a call. Passing the strict tier-1 test implies passing tier 2.
    pub fn new(
        base: Base,
        qscore: u8,
        strand: Strand,
        is_tier1_pass: bool,
        is_tier2_pass: bool,
    ) -> Self {
        Self {
            base,
            qscore,
            strand,
            is_tier1_pass,
            is_tier2_pass: is_tier2_pass || is_tier1_pass,
            read_pos: None,
            read_len: None,
        }
    }

    pub fn with_read_position(mut self, read_pos: u32, read_len: u32) -> Self {
        self.read_pos = Some(read_pos);
        self.read_len = Some(read_len);
        self
    }

    pub fn passes(&self, tier: Tier) -> bool {
        match tier {
            Tier::One => self.is_tier1_pass,
            Tier::Two => self.is_tier2_pass,
        }
    }
}

/// All calls of one sample at one position
#[derive(Debug, Clone, PartialEq)]
pub struct SitePileup {
    pub ref_base: Base,
    pub calls: TierPair<Vec<BaseCall>>,
    /// every call offered, including those failing both tiers
    pub n_observed: u32,
    pub n_spanning_deletions: u32,
}

impl SitePileup {
    pub fn new(ref_base: Base) -> Self {
        Self {
            ref_base,
            calls: TierPair::default(),
            n_observed: 0,
            n_spanning_deletions: 0,
        }
    }

    pub fn push(&mut self, call: BaseCall) {
        self.n_observed += 1;
        if call.is_tier1_pass {
            self.calls.tier1.push(call);
        }
        if call.is_tier2_pass {
            self.calls.tier2.push(call);
        }
    }

    pub fn depth(&self, tier: Tier) -> u32 {
        self.calls.get(tier).len() as u32
    }

    /// Calls that failed the tier-1 filter
    pub fn n_filtered(&self) -> u32 {
        self.n_observed - self.depth(Tier::One)
    }

    pub fn filtered_fraction(&self) -> f64 {
        if self.n_observed == 0 {
            0.0
        } else {
            self.n_filtered() as f64 / self.n_observed as f64
        }
    }

    pub fn spanning_deletion_fraction(&self) -> f64 {
        let total = self.depth(Tier::One) + self.n_spanning_deletions;
        if total == 0 {
            0.0
        } else {
            self.n_spanning_deletions as f64 / total as f64
        }
    }

    pub fn effective_calls(&self) -> Option<(Tier, &Vec<BaseCall>)> {
        self.calls.effective()
    }

    /// Counts of A, C, G, T, N within `tier`
    pub fn base_counts(&self, tier: Tier) -> [u32; 5] {
        let mut counts = [0; 5];
        for call in self.calls.get(tier) {
            counts[call.base.index()] += 1;
        }
        counts
    }

    /// Forward and reverse counts of `base` within `tier`
    pub fn strand_counts(&self, tier: Tier, base: Base) -> [u32; 2] {
        let mut counts = [0; 2];
        for call in self.calls.get(tier).iter().filter(|c| c.base == base) {
            counts[call.strand.index()] += 1;
        }
        counts
    }
}

/// Windowed per-position accumulator for both samples.
///
/// Positions must be consumed with [`PileupAggregator::take`] in
/// non-decreasing order; no call may be added behind the last taken position.
/// Not thread-safe: one aggregator serves one position-ordered sweep.
#[derive(Debug, Default)]
pub struct PileupAggregator {
    sites: [BTreeMap<u64, SitePileup>; 2],
    last_taken: Option<u64>,
}

impl PileupAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn site_mut(&mut self, sample: Sample, pos: u64, ref_base: Base) -> SomaticResult<&mut SitePileup> {
        if let Some(last) = self.last_taken {
            if pos <= last {
                return Err(SomaticError::InvalidEvidence(format!(
                    "{} evidence at position {} arrived after position {} was processed",
                    sample, pos, last
                )));
            }
        }
        Ok(self.sites[sample.index()]
            .entry(pos)
            .or_insert_with(|| SitePileup::new(ref_base)))
    }

    pub fn add_call(&mut self, sample: Sample, pos: u64, ref_base: Base, call: BaseCall) -> SomaticResult<()> {
        self.site_mut(sample, pos, ref_base)?.push(call);
        Ok(())
    }

    pub fn add_spanning_deletion(&mut self, sample: Sample, pos: u64, ref_base: Base) -> SomaticResult<()> {
        self.site_mut(sample, pos, ref_base)?.n_spanning_deletions += 1;
        Ok(())
    }

    pub fn get_pileup(&self, sample: Sample, pos: u64) -> SomaticResult<&SitePileup> {
        self.sites[sample.index()]
            .get(&pos)
            .ok_or(SomaticError::NotFound { sample, pos })
    }

    /// Remove and return both samples' pileups at `pos`. A sample with no
    /// reads gets an empty pileup sharing the other sample's reference base.
    pub fn take(&mut self, pos: u64) -> Option<[SitePileup; 2]> {
        let normal = self.sites[Sample::Normal.index()].remove(&pos);
        let tumor = self.sites[Sample::Tumor.index()].remove(&pos);
        self.last_taken = Some(self.last_taken.map_or(pos, |last| last.max(pos)));
        match (normal, tumor) {
            (None, None) => None,
            (Some(n), None) => {
                let t = SitePileup::new(n.ref_base);
                Some([n, t])
            }
            (None, Some(t)) => {
                let n = SitePileup::new(t.ref_base);
                Some([n, t])
            }
            (Some(n), Some(t)) => Some([n, t]),
        }
    }

    /// Buffered positions strictly before `pos`, in order
    pub fn positions_before(&self, pos: u64) -> Vec<u64> {
        let mut positions = BTreeSet::new();
        for sites in &self.sites {
            positions.extend(sites.range(..pos).map(|(p, _)| *p));
        }
        positions.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.iter().all(|s| s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(base: Base, tier1: bool, tier2: bool) -> BaseCall {
        BaseCall::new(base, 30, Strand::Forward, tier1, tier2)
    }

    #[test]
    fn test_tier1_implies_tier2() {
        let c = call(Base::A, true, false);
        assert!(c.passes(Tier::One));
        assert!(c.passes(Tier::Two));
    }

    #[test]
    fn test_tier2_superset_of_tier1() {
        let mut agg = PileupAggregator::new();
        agg.add_call(Sample::Tumor, 10, Base::A, call(Base::A, true, true)).unwrap();
        agg.add_call(Sample::Tumor, 10, Base::A, call(Base::C, false, true)).unwrap();
        agg.add_call(Sample::Tumor, 10, Base::A, call(Base::C, false, false)).unwrap();

        let pileup = agg.get_pileup(Sample::Tumor, 10).unwrap();
        assert_eq!(pileup.depth(Tier::One), 1);
        assert_eq!(pileup.depth(Tier::Two), 2);
        assert!(pileup.depth(Tier::Two) >= pileup.depth(Tier::One));
        assert_eq!(pileup.n_observed, 3);
        assert_eq!(pileup.n_filtered(), 2);
        assert!((pileup.filtered_fraction() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_get_pileup_not_found() {
        let agg = PileupAggregator::new();
        match agg.get_pileup(Sample::Normal, 5) {
            Err(SomaticError::NotFound { sample, pos }) => {
                assert_eq!(sample, Sample::Normal);
                assert_eq!(pos, 5);
            }
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_take_fills_missing_sample() {
        let mut agg = PileupAggregator::new();
        agg.add_call(Sample::Tumor, 3, Base::G, call(Base::T, true, true)).unwrap();
        let [normal, tumor] = agg.take(3).unwrap();
        assert_eq!(normal.ref_base, Base::G);
        assert_eq!(normal.n_observed, 0);
        assert_eq!(tumor.depth(Tier::One), 1);
        assert!(agg.is_empty());
        assert!(agg.take(4).is_none());
    }

    #[test]
    fn test_rejects_evidence_behind_sweep() {
        let mut agg = PileupAggregator::new();
        agg.add_call(Sample::Normal, 8, Base::A, call(Base::A, true, true)).unwrap();
        agg.take(8);
        let result = agg.add_call(Sample::Normal, 8, Base::A, call(Base::A, true, true));
        assert!(matches!(result, Err(SomaticError::InvalidEvidence(_))));
        assert!(agg.add_call(Sample::Normal, 9, Base::A, call(Base::A, true, true)).is_ok());
    }

    #[test]
    fn test_spanning_deletion_fraction() {
        let mut pileup = SitePileup::new(Base::C);
        for _ in 0..3 {
            pileup.push(call(Base::C, true, true));
        }
        pileup.n_spanning_deletions = 1;
        assert!((pileup.spanning_deletion_fraction() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_positions_before() {
        let mut agg = PileupAggregator::new();
        agg.add_call(Sample::Normal, 4, Base::A, call(Base::A, true, true)).unwrap();
        agg.add_call(Sample::Tumor, 2, Base::A, call(Base::A, true, true)).unwrap();
        agg.add_call(Sample::Tumor, 4, Base::A, call(Base::A, true, true)).unwrap();
        agg.add_call(Sample::Tumor, 9, Base::A, call(Base::A, true, true)).unwrap();
        assert_eq!(agg.positions_before(9), vec![2, 4]);
    }

    #[test]
    fn test_strand_counts() {
        let mut pileup = SitePileup::new(Base::A);
        pileup.push(BaseCall::new(Base::T, 30, Strand::Forward, true, true));
        pileup.push(BaseCall::new(Base::T, 30, Strand::Reverse, true, true));
        pileup.push(BaseCall::new(Base::T, 30, Strand::Reverse, true, true));
        assert_eq!(pileup.strand_counts(Tier::One, Base::T), [1, 2]);
        assert_eq!(pileup.base_counts(Tier::One)[Base::T.index()], 3);
    }
}
