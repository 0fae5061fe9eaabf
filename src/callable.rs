//! Callable regions: spans where the caller is confident either that a
//! somatic SNV is present or that none exists at >= 10% tumor frequency

use serde::Serialize;
use std::fmt;

/// Half-open, 0-based span in BED convention
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallableRegion {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl CallableRegion {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

impl fmt::Display for CallableRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.chrom, self.start, self.end)
    }
}

pub fn is_callable(qss: u32, nqss: u32, min_quality: u32) -> bool {
    qss >= min_quality || nqss >= min_quality
}

/// Merges callable positions of one chromosome, visited in increasing
/// order, into maximal contiguous spans
#[derive(Debug)]
pub struct CallableRegionBuilder {
    chrom: String,
    min_quality: u32,
    open: Option<(u64, u64)>,
    regions: Vec<CallableRegion>,
}

impl CallableRegionBuilder {
    pub fn new(chrom: &str, min_quality: u32) -> Self {
        Self {
            chrom: chrom.to_string(),
            min_quality,
            open: None,
            regions: Vec::new(),
        }
    }

    /// Record the scores of the 1-based position `pos`
    pub fn add_site(&mut self, pos: u64, qss: u32, nqss: u32) {
        if !is_callable(qss, nqss, self.min_quality) {
            self.close();
            return;
        }
        let (start, end) = (pos.saturating_sub(1), pos);
        match self.open {
            Some((open_start, open_end)) if open_end == start => self.open = Some((open_start, end)),
            _ => {
                self.close();
                self.open = Some((start, end));
            }
        }
    }

    fn close(&mut self) {
        if let Some((start, end)) = self.open.take() {
            self.regions.push(CallableRegion {
                chrom: self.chrom.clone(),
                start,
                end,
            });
        }
    }

    /// Regions completed so far, leaving any open span in place
    pub fn drain_completed(&mut self) -> Vec<CallableRegion> {
        std::mem::take(&mut self.regions)
    }

    pub fn finish(mut self) -> Vec<CallableRegion> {
        self.close();
        self.regions
    }
}
