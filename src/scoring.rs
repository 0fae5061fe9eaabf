//! Empirical variant scoring (EVS) with a precomputed logistic model.
//!
//! The model is loaded once and injected into the processor as an
//! `Arc<dyn ScoringModel>`; it is never mutated after loading. When a model
//! is present it replaces the QSS_ref/QSI_ref filters with a single LowEVS
//! filter at the model's threshold.
//!
//! Model file: tab-separated `model<TAB>term<TAB>value` rows where `model` is
//! `SNV` or `INDEL`, and `term` is a feature name, `intercept` or `threshold`.

use crate::filter::{IndelFilterInputs, SnvFilterInputs};
use crate::posterior::quality_from_posterior;
use crate::sindel::IndelScore;
use crate::snv::SiteScore;
use crate::utils::open_reader;
use crate::{SomaticError, SomaticResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Upper bound of empirical scores, in phred units
const MAX_EMPIRICAL_SCORE: u32 = 60;

pub const SNV_FEATURES: [&str; 9] = [
    "QSS", "QSS_REF", "N_DP", "T_DP", "N_FDP_RATE", "T_FDP_RATE", "T_SDP_RATE", "T_AF", "T_STRAND_BIAS",
];

pub const INDEL_FEATURES: [&str; 10] = [
    "QSI", "QSI_REF", "N_DP", "T_DP", "T_AF", "N_AF", "REF_REP", "IHP", "RU_LEN", "WINDOW_BCN",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VariantKind {
    #[serde(rename = "SNV")]
    Snv,
    #[serde(rename = "INDEL")]
    Indel,
}

impl VariantKind {
    pub fn features(self) -> &'static [&'static str] {
        match self {
            VariantKind::Snv => &SNV_FEATURES,
            VariantKind::Indel => &INDEL_FEATURES,
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantKind::Snv => write!(f, "SNV"),
            VariantKind::Indel => write!(f, "INDEL"),
        }
    }
}

/// Named feature values of one call
pub type Features = BTreeMap<&'static str, f64>;

/// Empirical score of one call with the threshold it is compared against
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmpiricalScore {
    pub score: f64,
    pub threshold: f64,
}

impl EmpiricalScore {
    pub fn passes(&self) -> bool {
        self.score >= self.threshold
    }
}

/// A precomputed scoring function over call features
pub trait ScoringModel: Send + Sync + fmt::Debug {
    /// Score `features`, or `None` if the model has no terms for `kind`
    fn score(&self, kind: VariantKind, features: &Features) -> Option<EmpiricalScore>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTermRecord {
    pub model: VariantKind,
    pub term: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct LogisticModel {
    intercept: f64,
    threshold: f64,
    weights: BTreeMap<String, f64>,
}

impl LogisticModel {
    fn probability(&self, features: &Features) -> f64 {
        let z = self.weights.iter().fold(self.intercept, |acc, (name, weight)| {
            acc + weight * features.get(name.as_str()).copied().unwrap_or(0.0)
        });
        1.0 / (1.0 + (-z).exp())
    }
}

/// Logistic regression per variant kind, scored as a phred-scaled probability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogisticScoringModel {
    models: BTreeMap<VariantKind, LogisticModel>,
}

impl LogisticScoringModel {
    pub fn from_path<P: AsRef<Path>>(path: P) -> SomaticResult<Self> {
        let reader = open_reader(&path)?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut records = Vec::new();
        for result in csv_reader.deserialize() {
            let record: ModelTermRecord = result.map_err(|e| {
                SomaticError::ScoringModel(format!("{}: {}", path.as_ref().display(), e))
            })?;
            records.push(record);
        }
        let model = Self::from_records(records)?;
        info!(
            "Loaded empirical scoring model for {} variant kinds from {}",
            model.models.len(),
            path.as_ref().display()
        );
        Ok(model)
    }

    pub fn from_records<I: IntoIterator<Item = ModelTermRecord>>(records: I) -> SomaticResult<Self> {
        let mut models: BTreeMap<VariantKind, LogisticModel> = BTreeMap::new();
        let mut has_threshold: BTreeMap<VariantKind, bool> = BTreeMap::new();

        for record in records {
            if !record.value.is_finite() {
                return Err(SomaticError::ScoringModel(format!(
                    "{} term {} has non-finite value {}",
                    record.model, record.term, record.value
                )));
            }
            let model = models.entry(record.model).or_default();
            match record.term.as_str() {
                "intercept" => model.intercept = record.value,
                "threshold" => {
                    model.threshold = record.value;
                    has_threshold.insert(record.model, true);
                }
                name if record.model.features().contains(&name) => {
                    if model.weights.insert(name.to_string(), record.value).is_some() {
                        return Err(SomaticError::ScoringModel(format!(
                            "{} feature {} given more than once",
                            record.model, name
                        )));
                    }
                }
                name => {
                    return Err(SomaticError::ScoringModel(format!(
                        "unknown {} feature {}",
                        record.model, name
                    )))
                }
            }
        }

        for kind in models.keys() {
            if !has_threshold.contains_key(kind) {
                return Err(SomaticError::ScoringModel(format!("{} model has no threshold", kind)));
            }
        }
        Ok(Self { models })
    }
}

impl ScoringModel for LogisticScoringModel {
    fn score(&self, kind: VariantKind, features: &Features) -> Option<EmpiricalScore> {
        self.models.get(&kind).map(|model| EmpiricalScore {
            score: quality_from_posterior(model.probability(features), MAX_EMPIRICAL_SCORE) as f64,
            threshold: model.threshold,
        })
    }
}

fn fraction(count: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

pub fn snv_features(score: &SiteScore, inputs: &SnvFilterInputs) -> Features {
    let tumor = &score.tumor;
    let alt = tumor.alt_count;
    let strand_bias = fraction(tumor.alt_strand_counts[0].abs_diff(tumor.alt_strand_counts[1]), alt);
    let tumor_depth = tumor.ref_count + tumor.alt_count;

    let mut features = Features::new();
    features.insert("QSS", score.qss as f64);
    features.insert("QSS_REF", score.qss_ref as f64);
    features.insert("N_DP", score.normal.depth_tier1 as f64);
    features.insert("T_DP", tumor.depth_tier1 as f64);
    features.insert("N_FDP_RATE", inputs.filtered_fraction[0]);
    features.insert("T_FDP_RATE", inputs.filtered_fraction[1]);
    features.insert("T_SDP_RATE", inputs.spanning_deletion_fraction[1]);
    features.insert("T_AF", fraction(alt, tumor_depth));
    features.insert("T_STRAND_BIAS", strand_bias);
    features
}

pub fn indel_features(score: &IndelScore, inputs: &IndelFilterInputs) -> Features {
    let allele_frac = |n_alt: u32, n_ref: u32| fraction(n_alt, n_alt + n_ref);

    let mut features = Features::new();
    features.insert("QSI", score.qsi as f64);
    features.insert("QSI_REF", score.qsi_ref as f64);
    features.insert("N_DP", score.normal.depth_tier1 as f64);
    features.insert("T_DP", score.tumor.depth_tier1 as f64);
    features.insert("T_AF", allele_frac(score.tumor.n_alt, score.tumor.n_ref));
    features.insert("N_AF", allele_frac(score.normal.n_alt, score.normal.n_ref));
    features.insert("REF_REP", score.context.ref_repeat_count as f64);
    features.insert("IHP", score.context.interrupted_hpol_len as f64);
    features.insert("RU_LEN", score.context.repeat_unit_len() as f64);
    features.insert(
        "WINDOW_BCN",
        inputs.window_filtered_fraction[0].max(inputs.window_filtered_fraction[1]),
    );
    features
}
