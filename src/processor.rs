//! Position-ordered sweep over one chromosome: accumulates evidence, scores
//! sites and indels as their windows close, filters them and releases call
//! records in genomic order

use crate::callable::{CallableRegion, CallableRegionBuilder};
use crate::chrom_depth::ChromDepthTable;
use crate::config::SomaticCallerConfig;
use crate::evidence::{ChromEvidence, EvidenceEvent};
use crate::context::{indel_context, IndelContext, ReferenceSegment};
use crate::filter::{apply_indel_filters, apply_snv_filters, FilterFlags, IndelFilterInputs, SnvFilterInputs};
use crate::indel::{IndelEvidenceTracker, IndelKey, ReadPathScores, RetiredIndel};
use crate::noise::NoiseModel;
use crate::pileup::{Base, BaseCall, PileupAggregator, SitePileup};
use crate::scoring::{indel_features, snv_features, ScoringModel, VariantKind};
use crate::sindel::{score_indel, IndelScore};
use crate::snv::{score_site, SiteScore};
use crate::{Sample, SomaticError, SomaticResult, Tier};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Half-width of the basecall noise window around an indel, and the distance
/// past an indel's right end before its evidence is considered complete
pub const INDEL_WINDOW_FLANK: u64 = 25;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CallDetail {
    Snv(SiteScore),
    Indel(IndelScore),
}

/// A reported somatic call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallResult {
    pub chrom: String,
    pub pos: u64,
    pub filters: FilterFlags,
    pub empirical_score: Option<f64>,
    pub detail: CallDetail,
}

impl CallResult {
    /// QSS for SNVs, QSI for indels
    pub fn quality(&self) -> u32 {
        match &self.detail {
            CallDetail::Snv(s) => s.qss,
            CallDetail::Indel(s) => s.qsi,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.filters.is_pass()
    }

    /// Coordinate written to the calls table; indels are reported at their
    /// anchor base, one before the first affected base
    pub fn reported_pos(&self) -> u64 {
        match self.detail {
            CallDetail::Snv(_) => self.pos,
            CallDetail::Indel(_) => self.pos.saturating_sub(1),
        }
    }

    fn sort_key(&self) -> (u64, u8) {
        match self.detail {
            CallDetail::Snv(_) => (self.reported_pos(), 0),
            CallDetail::Indel(_) => (self.reported_pos(), 1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessorStats {
    pub n_sites: u64,
    pub n_snv_calls: u64,
    pub n_indels_seen: u64,
    pub n_indel_candidates: u64,
    pub n_indel_calls: u64,
}

/// Everything left once the sweep is complete
#[derive(Debug, Clone, Default)]
pub struct ProcessorOutput {
    pub calls: Vec<CallResult>,
    pub callable: Vec<CallableRegion>,
    pub stats: ProcessorStats,
}

/// Filtered and observed basecall counts at one position
type WindowCounts = [[u32; 2]; 2];

/// Somatic caller for one chromosome.
///
/// Evidence must arrive in non-decreasing position order relative to
/// [`SomaticPosProcessor::advance_to`]: once the sweep has advanced to `pos`,
/// nothing may be added before `pos`.
pub struct SomaticPosProcessor<'a> {
    chrom: String,
    config: &'a SomaticCallerConfig,
    noise: &'a NoiseModel,
    reference: Option<&'a ReferenceSegment>,
    scoring: Option<Arc<dyn ScoringModel>>,
    max_depth: Option<f64>,
    pileups: PileupAggregator,
    indels: IndelEvidenceTracker,
    window_counts: BTreeMap<u64, WindowCounts>,
    callable: CallableRegionBuilder,
    pending: Vec<CallResult>,
    current_pos: u64,
    stats: ProcessorStats,
}

impl<'a> SomaticPosProcessor<'a> {
    pub fn new(chrom: &str, config: &'a SomaticCallerConfig, noise: &'a NoiseModel) -> Self {
        Self {
            chrom: chrom.to_string(),
            config,
            noise,
            reference: None,
            scoring: None,
            max_depth: None,
            pileups: PileupAggregator::new(),
            indels: IndelEvidenceTracker::new(),
            window_counts: BTreeMap::new(),
            callable: CallableRegionBuilder::new(chrom, config.callable_min_quality),
            pending: Vec::new(),
            current_pos: 0,
            stats: ProcessorStats::default(),
        }
    }

    /// Reference used for indel context; without it indels get an unknown context
    pub fn with_reference(mut self, reference: &'a ReferenceSegment) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_scoring_model(mut self, model: Option<Arc<dyn ScoringModel>>) -> Self {
        self.scoring = model;
        self
    }

    /// Depth cap for the high-depth filter
    pub fn with_max_depth(mut self, max_depth: Option<f64>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    fn check_order(&self, pos: u64) -> SomaticResult<()> {
        if pos < self.current_pos {
            return Err(SomaticError::InvalidEvidence(format!(
                "{}:{} arrived after the sweep advanced to {}",
                self.chrom, pos, self.current_pos
            )));
        }
        Ok(())
    }

    pub fn add_base_call(&mut self, sample: Sample, pos: u64, ref_base: Base, call: BaseCall) -> SomaticResult<()> {
        self.check_order(pos)?;
        self.pileups.add_call(sample, pos, ref_base, call)
    }

    pub fn add_spanning_deletion(&mut self, sample: Sample, pos: u64, ref_base: Base) -> SomaticResult<()> {
        self.check_order(pos)?;
        self.pileups.add_spanning_deletion(sample, pos, ref_base)
    }

    pub fn add_indel_read(
        &mut self,
        key: &IndelKey,
        sample: Sample,
        tier: Tier,
        scores: ReadPathScores,
    ) -> SomaticResult<()> {
        self.check_order(key.pos)?;
        self.indels.record_read_paths(key, sample, tier, scores)
    }

    /// Declare every position before `pos` complete, returning the calls
    /// that can now be released in order
    pub fn advance_to(&mut self, pos: u64) -> Vec<CallResult> {
        if pos <= self.current_pos {
            return Vec::new();
        }
        self.current_pos = pos;

        for site_pos in self.pileups.positions_before(pos) {
            if let Some([normal, tumor]) = self.pileups.take(site_pos) {
                self.process_site(site_pos, &normal, &tumor);
            }
        }

        let retired = self.indels.retire_before(pos, INDEL_WINDOW_FLANK);
        for indel in retired {
            self.process_indel(indel);
        }

        self.release()
    }

    /// Flush all remaining evidence
    pub fn finish(mut self) -> ProcessorOutput {
        let mut calls = self.advance_to(u64::MAX);
        let remaining = self.indels.retire_all();
        for indel in remaining {
            self.process_indel(indel);
        }
        calls.extend(self.release());

        info!(
            "{}: {} sites, {} SNV calls, {} of {} indels were candidates, {} indel calls",
            self.chrom,
            self.stats.n_sites,
            self.stats.n_snv_calls,
            self.stats.n_indel_candidates,
            self.stats.n_indels_seen,
            self.stats.n_indel_calls
        );
        ProcessorOutput {
            calls,
            callable: self.callable.finish(),
            stats: self.stats,
        }
    }

    fn process_site(&mut self, pos: u64, normal: &SitePileup, tumor: &SitePileup) {
        self.stats.n_sites += 1;
        self.window_counts.insert(
            pos,
            [
                [normal.n_filtered(), normal.n_observed],
                [tumor.n_filtered(), tumor.n_observed],
            ],
        );

        let score = score_site(normal, tumor, self.config, self.noise);
        self.callable.add_site(pos, score.qss, score.nqss);

        if score.alt_base.is_none() || score.qss < self.config.min_reported_quality {
            return;
        }
        let mut inputs = SnvFilterInputs::from_pileups(normal, tumor);
        if let Some(model) = &self.scoring {
            inputs.empirical = model.score(VariantKind::Snv, &snv_features(&score, &inputs));
        }
        let filters = apply_snv_filters(&score, &inputs, self.config, self.max_depth);
        self.stats.n_snv_calls += 1;
        self.pending.push(CallResult {
            chrom: self.chrom.clone(),
            pos,
            filters,
            empirical_score: inputs.empirical.map(|e| e.score),
            detail: CallDetail::Snv(score),
        });
    }

    /// Filtered basecall fraction of each sample in the window around `key`
    fn window_filtered_fraction(&self, key: &IndelKey) -> [f64; 2] {
        let start = key.pos.saturating_sub(INDEL_WINDOW_FLANK);
        let end = key.pos + INDEL_WINDOW_FLANK;
        let mut totals = [[0u32; 2]; 2];
        for counts in self.window_counts.range(start..end).map(|(_, c)| c) {
            for sample in 0..2 {
                totals[sample][0] += counts[sample][0];
                totals[sample][1] += counts[sample][1];
            }
        }
        totals.map(|[filtered, observed]| {
            if observed == 0 {
                0.0
            } else {
                filtered as f64 / observed as f64
            }
        })
    }

    fn process_indel(&mut self, indel: RetiredIndel) {
        let key = &indel.key;
        if key.is_breakpoint() {
            debug!("{}: breakpoint {} tracked but not scored", self.chrom, key);
            return;
        }
        self.stats.n_indels_seen += 1;

        if !indel.is_candidate(&self.config.candidacy) {
            return;
        }
        self.stats.n_indel_candidates += 1;

        let context = match self.reference {
            Some(reference) => indel_context(key, reference),
            None => IndelContext::unknown(key),
        };
        let score = score_indel(key, &indel.normal, &indel.tumor, &context, self.config, self.noise);
        if score.qsi < self.config.min_reported_quality {
            return;
        }

        let mut inputs = IndelFilterInputs {
            normal_depth: indel.normal.tier1.n_total(),
            window_filtered_fraction: self.window_filtered_fraction(key),
            empirical: None,
        };
        if let Some(model) = &self.scoring {
            inputs.empirical = model.score(VariantKind::Indel, &indel_features(&score, &inputs));
        }
        let filters = apply_indel_filters(&score, &inputs, self.config, self.max_depth);
        self.stats.n_indel_calls += 1;
        self.pending.push(CallResult {
            chrom: self.chrom.clone(),
            pos: key.pos,
            filters,
            empirical_score: inputs.empirical.map(|e| e.score),
            detail: CallDetail::Indel(score),
        });
    }

    /// Release pending calls that no open indel window can precede
    fn release(&mut self) -> Vec<CallResult> {
        let bound = match self.indels.min_pos() {
            Some(min_pos) => min_pos.min(self.current_pos),
            None => self.current_pos,
        };

        let keep_from = bound.saturating_sub(INDEL_WINDOW_FLANK);
        self.window_counts = self.window_counts.split_off(&keep_from);

        self.pending.sort_by_key(CallResult::sort_key);
        // indels at or past `bound` are still to come and report at `bound - 1`
        let split = self.pending.partition_point(|call| call.reported_pos().saturating_add(1) < bound);
        let mut released: Vec<CallResult> = self.pending.drain(..split).collect();
        if bound == u64::MAX {
            released.append(&mut self.pending);
        }
        released
    }
}

/// Read-only inputs shared by every chromosome of a run
#[derive(Debug)]
pub struct CallerResources {
    pub config: SomaticCallerConfig,
    pub noise: NoiseModel,
    pub depth_table: Option<ChromDepthTable>,
    pub scoring: Option<Arc<dyn ScoringModel>>,
    pub reference: HashMap<String, ReferenceSegment>,
}

impl CallerResources {
    pub fn new(config: SomaticCallerConfig) -> Self {
        let noise = NoiseModel::from_config(&config);
        Self {
            config,
            noise,
            depth_table: None,
            scoring: None,
            reference: HashMap::new(),
        }
    }
}

/// Run the sweep over one chromosome's position-sorted evidence
pub fn process_chromosome(evidence: &ChromEvidence, resources: &CallerResources) -> SomaticResult<ProcessorOutput> {
    let max_depth = resources
        .depth_table
        .as_ref()
        .and_then(|table| table.max_depth(&evidence.chrom, resources.config.filters.max_depth_factor));

    let mut processor = SomaticPosProcessor::new(&evidence.chrom, &resources.config, &resources.noise)
        .with_scoring_model(resources.scoring.clone())
        .with_max_depth(max_depth);
    match resources.reference.get(&evidence.chrom) {
        Some(reference) => processor = processor.with_reference(reference),
        None if !resources.reference.is_empty() => {
            warn!("Chromosome {} not found in reference, indel context unavailable", evidence.chrom)
        }
        None => {}
    }

    let mut calls = Vec::new();
    for event in &evidence.events {
        calls.extend(processor.advance_to(event.pos()));
        match event {
            EvidenceEvent::Base {
                pos,
                sample,
                ref_base,
                call,
            } => processor.add_base_call(*sample, *pos, *ref_base, *call)?,
            EvidenceEvent::SpanningDeletion { pos, sample, ref_base } => {
                processor.add_spanning_deletion(*sample, *pos, *ref_base)?
            }
            EvidenceEvent::IndelRead {
                key,
                sample,
                tier,
                scores,
            } => processor.add_indel_read(key, *sample, *tier, scores.clone())?,
        }
    }

    let mut output = processor.finish();
    calls.append(&mut output.calls);
    output.calls = calls;
    Ok(output)
}

/// Process chromosomes in parallel, returning outputs in input order.
///
/// Chromosomes are pulled from `chromosomes` in batches of `num_processes`,
/// so at most one batch of evidence is held in memory at a time.
pub fn process_chromosomes<I>(
    chromosomes: I,
    resources: &CallerResources,
    num_processes: usize,
) -> SomaticResult<Vec<ProcessorOutput>>
where
    I: IntoIterator<Item = SomaticResult<ChromEvidence>>,
{
    let batch_size = num_processes.max(1);
    let mut chromosomes = chromosomes.into_iter();
    let mut outputs = Vec::new();
    loop {
        let batch = chromosomes
            .by_ref()
            .take(batch_size)
            .collect::<SomaticResult<Vec<ChromEvidence>>>()?;
        if batch.is_empty() {
            break;
        }
        let batch_outputs: SomaticResult<Vec<ProcessorOutput>> = batch
            .into_par_iter()
            .map(|evidence| process_chromosome(&evidence, resources))
            .collect();
        outputs.extend(batch_outputs?);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndelCandidacyConfig;
    use crate::filter::SomaticFilter;
    use crate::Strand;

    fn strand(i: usize) -> Strand {
        if i % 2 == 0 {
            Strand::Forward
        } else {
            Strand::Reverse
        }
    }

    fn add_site(processor: &mut SomaticPosProcessor, pos: u64, normal_alt: usize, tumor_alt: usize, depth: usize) {
        for (sample, n_alt) in [(Sample::Normal, normal_alt), (Sample::Tumor, tumor_alt)] {
            for i in 0..depth {
                let base = if i < n_alt { Base::T } else { Base::C };
                processor.add_base_call(sample, pos, Base::C, BaseCall::new(base, 30, strand(i), true, true))
                    .unwrap();
            }
        }
    }

    fn add_indel(processor: &mut SomaticPosProcessor, key: &IndelKey, normal: (usize, usize), tumor: (usize, usize)) {
        for (sample, (n_alt, n_ref)) in [(Sample::Normal, normal), (Sample::Tumor, tumor)] {
            for _ in 0..n_alt {
                processor.add_indel_read(key, sample, Tier::One, ReadPathScores::from_support(true, -20.0))
                    .unwrap();
            }
            for _ in 0..n_ref {
                processor.add_indel_read(key, sample, Tier::One, ReadPathScores::from_support(false, -20.0))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_snv_call_released_after_advance() {
        let config = SomaticCallerConfig::default();
        let noise = NoiseModel::from_config(&config);
        let mut processor = SomaticPosProcessor::new("chr1", &config, &noise);

        add_site(&mut processor, 100, 0, 10, 20);
        add_site(&mut processor, 101, 0, 0, 20);
        assert!(processor.advance_to(100).is_empty());

        let calls = processor.advance_to(102);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pos, 100);
        assert!(calls[0].is_pass());
        assert!(calls[0].quality() > 15);

        let output = processor.finish();
        assert!(output.calls.is_empty());
        assert_eq!(output.stats.n_sites, 2);
        assert_eq!(output.callable.len(), 1);
        assert_eq!(output.callable[0].start, 99);
        assert_eq!(output.callable[0].end, 101);
    }

    #[test]
    fn test_out_of_order_evidence_rejected() {
        let config = SomaticCallerConfig::default();
        let noise = NoiseModel::from_config(&config);
        let mut processor = SomaticPosProcessor::new("chr1", &config, &noise);
        processor.advance_to(500);
        let call = BaseCall::new(Base::A, 30, Strand::Forward, true, true);
        assert!(processor.add_base_call(Sample::Tumor, 499, Base::A, call).is_err());
        assert!(processor
            .add_indel_read(&IndelKey::deletion(10, 1), Sample::Tumor, Tier::One, ReadPathScores::new(0.0, -5.0))
            .is_err());
    }

    #[test]
    fn test_calls_released_in_genomic_order() {
        let config = SomaticCallerConfig::default();
        let noise = NoiseModel::from_config(&config);
        let mut processor = SomaticPosProcessor::new("chr1", &config, &noise);

        let key = IndelKey::deletion(100, 2);
        add_indel(&mut processor, &key, (0, 40), (15, 15));
        add_site(&mut processor, 100, 0, 10, 20);
        add_site(&mut processor, 110, 0, 10, 20);

        // indel window still open, so nothing at or after 100 is released
        assert!(processor.advance_to(120).is_empty());

        let mut calls = processor.advance_to(200);
        calls.extend(processor.finish().calls);
        let order: Vec<(u64, bool)> = calls
            .iter()
            .map(|c| (c.reported_pos(), matches!(c.detail, CallDetail::Indel(_))))
            .collect();
        // the deletion is reported at its anchor base, before the SNV
        assert_eq!(order, vec![(99, true), (100, false), (110, false)]);
    }

    #[test]
    fn test_snv_held_until_anchor_of_later_indel_is_known() {
        let config = SomaticCallerConfig::default();
        let noise = NoiseModel::from_config(&config);
        let mut processor = SomaticPosProcessor::new("chr1", &config, &noise);

        add_site(&mut processor, 100, 0, 10, 20);
        // an indel starting at 101 would be reported at 100
        assert!(processor.advance_to(101).is_empty());
        let key = IndelKey::deletion(101, 2);
        add_indel(&mut processor, &key, (0, 40), (15, 15));

        let mut calls = processor.advance_to(300);
        calls.extend(processor.finish().calls);
        let order: Vec<(u64, bool)> = calls
            .iter()
            .map(|c| (c.reported_pos(), matches!(c.detail, CallDetail::Indel(_))))
            .collect();
        assert_eq!(order, vec![(100, false), (100, true)]);
    }

    #[test]
    fn test_non_candidate_indel_not_scored() {
        let config = SomaticCallerConfig {
            candidacy: IndelCandidacyConfig {
                min_candidate_indel_reads: Some(3),
                ..Default::default()
            },
            ..Default::default()
        };
        let noise = NoiseModel::from_config(&config);
        let mut processor = SomaticPosProcessor::new("chr1", &config, &noise);
        let key = IndelKey::insertion(300, "A");
        add_indel(&mut processor, &key, (0, 20), (2, 18));

        let output = processor.finish();
        assert!(output.calls.is_empty());
        assert_eq!(output.stats.n_indels_seen, 1);
        assert_eq!(output.stats.n_indel_candidates, 0);
    }

    #[test]
    fn test_normal_support_makes_indel_candidate() {
        let config = SomaticCallerConfig {
            candidacy: IndelCandidacyConfig {
                min_candidate_indel_reads: Some(3),
                tumor_min_candidate_indel_reads: Some(10),
                ..Default::default()
            },
            ..Default::default()
        };
        let noise = NoiseModel::from_config(&config);
        let mut processor = SomaticPosProcessor::new("chr1", &config, &noise);
        let key = IndelKey::deletion(300, 2);
        add_indel(&mut processor, &key, (4, 4), (4, 16));

        let output = processor.finish();
        assert_eq!(output.stats.n_indels_seen, 1);
        assert_eq!(output.stats.n_indel_candidates, 1);
    }

    #[test]
    fn test_indel_window_noise_and_depth_filters() {
        let config = SomaticCallerConfig::default();
        let noise = NoiseModel::from_config(&config);
        let mut processor = SomaticPosProcessor::new("chr1", &config, &noise).with_max_depth(Some(30.0));

        let key = IndelKey::deletion(1000, 3);
        add_indel(&mut processor, &key, (0, 40), (15, 15));
        for pos in 990..1010 {
            for sample in Sample::ALL {
                for i in 0..10 {
                    let is_tier1 = i >= 5;
                    let call = BaseCall::new(Base::G, 30, strand(i), is_tier1, true);
                    processor.add_base_call(sample, pos, Base::G, call).unwrap();
                }
            }
        }

        let output = processor.finish();
        let indel = output
            .calls
            .iter()
            .find(|c| matches!(c.detail, CallDetail::Indel(_)))
            .unwrap();
        assert!(indel.filters.contains(SomaticFilter::BasecallNoise));
        assert!(indel.filters.contains(SomaticFilter::HighDepth));
    }
}
