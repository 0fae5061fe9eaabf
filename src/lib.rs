//! # tnsomatic - Tumor/Normal Somatic Variant Scoring
//!
//! A Rust library for scoring somatic SNVs and short indels from paired
//! tumor and normal read evidence. Read-level evidence is accumulated per
//! position into two tiers (strict and relaxed), scored under a joint
//! tumor/normal frequency model, and converted into phred-scaled somatic
//! qualities with the filters needed to accept or reject each call.

pub mod callable;
pub mod chrom_depth;
pub mod config;
pub mod context;
pub mod evidence;
pub mod filter;
pub mod indel;
pub mod noise;
pub mod output;
pub mod pileup;
pub mod posterior;
pub mod processor;
pub mod scoring;
pub mod sindel;
pub mod snv;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use config::{ConfigViolation, ConfigViolations, SomaticCallerConfig};

/// The two samples of a somatic analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sample {
    Normal,
    Tumor,
}

impl Sample {
    pub const ALL: [Sample; 2] = [Sample::Normal, Sample::Tumor];

    pub fn index(self) -> usize {
        match self {
            Sample::Normal => 0,
            Sample::Tumor => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Sample::Normal => "NORMAL",
            Sample::Tumor => "TUMOR",
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Read strand of a base call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn index(self) -> usize {
        match self {
            Strand::Forward => 0,
            Strand::Reverse => 1,
        }
    }
}

/// Evidence tier: tier 1 is the strict read filter, tier 2 the relaxed one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    One,
    Two,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::One, Tier::Two];

    pub fn number(self) -> u8 {
        match self {
            Tier::One => 1,
            Tier::Two => 2,
        }
    }
}

/// Anything that can be empty of evidence, used to pick the effective tier
pub trait TierEvidence {
    fn has_evidence(&self) -> bool;
}

impl<T> TierEvidence for Vec<T> {
    fn has_evidence(&self) -> bool {
        !self.is_empty()
    }
}

/// Ordered pair of tier-1 and tier-2 evidence buckets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierPair<T> {
    pub tier1: T,
    pub tier2: T,
}

impl<T> TierPair<T> {
    pub fn new(tier1: T, tier2: T) -> Self {
        Self { tier1, tier2 }
    }

    pub fn get(&self, tier: Tier) -> &T {
        match tier {
            Tier::One => &self.tier1,
            Tier::Two => &self.tier2,
        }
    }

    pub fn get_mut(&mut self, tier: Tier) -> &mut T {
        match tier {
            Tier::One => &mut self.tier1,
            Tier::Two => &mut self.tier2,
        }
    }
}

impl<T: TierEvidence> TierPair<T> {
    /// Prefer tier 1, fall back to tier 2 when tier 1 holds no evidence.
    /// Returns `None` if neither tier has evidence.
    pub fn effective(&self) -> Option<(Tier, &T)> {
        if self.tier1.has_evidence() {
            Some((Tier::One, &self.tier1))
        } else if self.tier2.has_evidence() {
            Some((Tier::Two, &self.tier2))
        } else {
            None
        }
    }
}

/// Tier each sample is scored from at one site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTiers {
    pub normal: Tier,
    pub tumor: Tier,
}

impl SampleTiers {
    pub fn uniform(tier: Tier) -> Self {
        Self { normal: tier, tumor: tier }
    }

    /// Effective tier of each sample, chosen independently. A sample without
    /// any evidence follows the other one. `None` if neither has evidence.
    pub fn select<T: TierEvidence>(normal: &TierPair<T>, tumor: &TierPair<T>) -> Option<Self> {
        let normal_tier = normal.effective().map(|(tier, _)| tier);
        let tumor_tier = tumor.effective().map(|(tier, _)| tier);
        match (normal_tier, tumor_tier) {
            (Some(normal), Some(tumor)) => Some(Self { normal, tumor }),
            (Some(tier), None) | (None, Some(tier)) => Some(Self::uniform(tier)),
            (None, None) => None,
        }
    }

    pub fn get(&self, sample: Sample) -> Tier {
        match sample {
            Sample::Normal => self.normal,
            Sample::Tumor => self.tumor,
        }
    }

    /// Tier 1 only when both samples were scored from tier 1
    pub fn reported(&self) -> Tier {
        self.normal.max(self.tumor)
    }
}

/// Error types for the somatic scoring library
#[derive(Debug, thiserror::Error)]
pub enum SomaticError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(ConfigViolations),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No {sample} reads observed at position {pos}")]
    NotFound { sample: Sample, pos: u64 },

    #[error("Invalid evidence: {0}")]
    InvalidEvidence(String),

    #[error("Invalid scoring model: {0}")]
    ScoringModel(String),

    #[error("Reference error: {0}")]
    Reference(String),
}

pub type SomaticResult<T> = Result<T, SomaticError>;
