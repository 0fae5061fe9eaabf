//! Per-chromosome expected depth table used by the high-depth filter.
//!
//! One line per chromosome, `name<TAB>depth`, optionally gzip-compressed.
//! Lines starting with `#` are ignored.

use crate::utils::open_reader;
use crate::{SomaticError, SomaticResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChromDepthRecord {
    pub chrom: String,
    pub depth: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChromDepthTable {
    depths: HashMap<String, f64>,
}

impl ChromDepthTable {
    pub fn from_path<P: AsRef<Path>>(path: P) -> SomaticResult<Self> {
        let reader = open_reader(&path)?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut records = Vec::new();
        for result in csv_reader.deserialize() {
            let record: ChromDepthRecord = result?;
            records.push(record);
        }
        let table = Self::from_records(records)?;
        info!(
            "Loaded expected depth for {} chromosomes from {}",
            table.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    pub fn from_records<I: IntoIterator<Item = ChromDepthRecord>>(records: I) -> SomaticResult<Self> {
        let mut depths = HashMap::new();
        for record in records {
            if !record.depth.is_finite() || record.depth < 0.0 {
                return Err(SomaticError::InvalidEvidence(format!(
                    "invalid depth {} for chromosome {}",
                    record.depth, record.chrom
                )));
            }
            if depths.insert(record.chrom.clone(), record.depth).is_some() {
                return Err(SomaticError::InvalidEvidence(format!(
                    "chromosome {} listed more than once in depth file",
                    record.chrom
                )));
            }
        }
        Ok(Self { depths })
    }

    pub fn depth(&self, chrom: &str) -> Option<f64> {
        self.depths.get(chrom).copied()
    }

    /// Depth cap for `chrom`, or `None` when the chromosome is not listed
    pub fn max_depth(&self, chrom: &str, max_depth_factor: f64) -> Option<f64> {
        match self.depth(chrom) {
            Some(depth) => Some(depth * max_depth_factor),
            None => {
                warn!("Chromosome {} not found in depth file, depth filter disabled", chrom);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_depth_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# chrom\tdepth").unwrap();
        writeln!(file, "chr1\t50").unwrap();
        writeln!(file, "chr2\t32.5").unwrap();

        let table = ChromDepthTable::from_path(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_relative_eq!(table.max_depth("chr1", 3.0).unwrap(), 150.0);
        assert_relative_eq!(table.depth("chr2").unwrap(), 32.5);
        assert_eq!(table.max_depth("chrM", 3.0), None);
    }

    #[test]
    fn test_duplicate_chromosome_rejected() {
        let records = vec![
            ChromDepthRecord { chrom: "chr1".into(), depth: 30.0 },
            ChromDepthRecord { chrom: "chr1".into(), depth: 40.0 },
        ];
        assert!(ChromDepthTable::from_records(records).is_err());
    }

    #[test]
    fn test_malformed_depth_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "chr1\tdeep").unwrap();
        assert!(matches!(
            ChromDepthTable::from_path(file.path()),
            Err(SomaticError::Csv(_))
        ));

        let records = vec![ChromDepthRecord { chrom: "chr1".into(), depth: -1.0 }];
        assert!(ChromDepthTable::from_records(records).is_err());
    }
}
