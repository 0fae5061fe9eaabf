//! Reference sequence context around indels: repeat units, repeat counts
//! and interrupted homopolymer length

use crate::indel::{IndelKey, IndelKind};
use crate::utils::open_reader;
use crate::{SomaticError, SomaticResult};
use anyhow::{bail, Context};
use bio::io::fasta;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A contiguous slice of one chromosome, 1-based
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSegment {
    pub start: u64,
    pub seq: Vec<u8>,
}

impl ReferenceSegment {
    pub fn new(start: u64, seq: &[u8]) -> Self {
        Self {
            start,
            seq: seq.to_ascii_uppercase(),
        }
    }

    pub fn end(&self) -> u64 {
        self.start + self.seq.len() as u64
    }

    pub fn base(&self, pos: u64) -> Option<u8> {
        if pos < self.start {
            return None;
        }
        self.seq.get((pos - self.start) as usize).copied()
    }

    /// Bases in `[start, end)`, or `None` if any fall outside the segment
    pub fn slice(&self, start: u64, end: u64) -> Option<&[u8]> {
        if start < self.start || end > self.end() || start > end {
            return None;
        }
        let offset = (start - self.start) as usize;
        Some(&self.seq[offset..offset + (end - start) as usize])
    }
}

/// Load every sequence of a (optionally gzipped) FASTA file, keyed by name
pub fn load_reference<P: AsRef<Path>>(path: P) -> SomaticResult<HashMap<String, ReferenceSegment>> {
    read_fasta(path.as_ref()).map_err(|e| SomaticError::Reference(format!("{:#}", e)))
}

fn read_fasta(path: &Path) -> anyhow::Result<HashMap<String, ReferenceSegment>> {
    let reader = open_reader(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut segments = HashMap::new();
    let mut n_bases = 0usize;

    for (i, result) in fasta::Reader::new(reader).records().enumerate() {
        let record = result.with_context(|| format!("record {} of {}", i + 1, path.display()))?;
        if let Err(msg) = record.check() {
            bail!("sequence {} in {}: {}", record.id(), path.display(), msg);
        }
        n_bases += record.seq().len();
        let segment = ReferenceSegment::new(1, record.seq());
        if segments.insert(record.id().to_string(), segment).is_some() {
            bail!("sequence {} appears more than once in {}", record.id(), path.display());
        }
    }

    info!("Loaded {} reference sequences ({} bases) from {}", segments.len(), n_bases, path.display());
    Ok(segments)
}

/// Sequence context summary of one indel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndelContext {
    pub ref_allele: String,
    pub alt_allele: String,
    pub repeat_unit: String,
    pub ref_repeat_count: u32,
    pub indel_repeat_count: u32,
    pub interrupted_hpol_len: u32,
}

impl IndelContext {
    /// Context when no reference is available: nothing can trigger a
    /// context filter and error rates use the non-repeat baseline.
    pub fn unknown(key: &IndelKey) -> Self {
        let seq = if key.seq.is_empty() {
            "N".repeat(key.length as usize)
        } else {
            key.seq.clone()
        };
        let (ref_allele, alt_allele) = match key.kind {
            IndelKind::Deletion => (format!("N{}", seq), "N".to_string()),
            _ => ("N".to_string(), format!("N{}", seq)),
        };
        Self {
            ref_allele,
            alt_allele,
            repeat_unit: "N".to_string(),
            ref_repeat_count: 0,
            indel_repeat_count: 0,
            interrupted_hpol_len: 0,
        }
    }

    pub fn repeat_unit_len(&self) -> usize {
        self.repeat_unit.len()
    }

    pub fn is_repeat_unit(&self) -> bool {
        self.repeat_unit != "N" && !self.repeat_unit.is_empty()
    }
}

/// Smallest unit that tiles `seq` exactly
pub fn repeat_unit(seq: &[u8]) -> &[u8] {
    let len = seq.len();
    for unit_len in 1..=len {
        if len % unit_len != 0 {
            continue;
        }
        let unit = &seq[..unit_len];
        if seq.chunks(unit_len).all(|chunk| chunk == unit) {
            return unit;
        }
    }
    seq
}

/// Copies of `unit` tiling the reference rightward from `pos` and leftward
/// from `pos - 1`
fn count_repeats(reference: &ReferenceSegment, unit: &[u8], pos: u64) -> u32 {
    let unit_len = unit.len() as u64;
    if unit_len == 0 {
        return 0;
    }
    let mut count = 0;

    let mut right = pos;
    while reference.slice(right, right + unit_len) == Some(unit) {
        count += 1;
        right += unit_len;
    }

    let mut left = pos;
    while left >= reference.start + unit_len && reference.slice(left - unit_len, left) == Some(unit) {
        count += 1;
        left -= unit_len;
    }
    count
}

/// Longest run of the base at `pos` allowing a single interrupting base
pub fn interrupted_hpol_size(reference: &ReferenceSegment, pos: u64) -> u32 {
    let hpol_base = match reference.base(pos) {
        Some(b) if b != b'N' => b,
        _ => return 0,
    };

    // run lengths on each side, with and without spending the one mismatch
    let extend = |step: i64| -> (u32, u32) {
        let mut clean = 0;
        let mut interrupted = 0;
        let mut is_mismatch = false;
        let mut p = pos as i64 + step;
        loop {
            if p < 0 {
                break;
            }
            match reference.base(p as u64) {
                Some(b) if b == hpol_base => {
                    if is_mismatch {
                        interrupted += 1;
                    } else {
                        clean += 1;
                    }
                }
                Some(b) if b != b'N' && !is_mismatch => {
                    let next = p + step;
                    if next < 0 || reference.base(next as u64) != Some(hpol_base) {
                        break;
                    }
                    is_mismatch = true;
                    interrupted += 1;
                }
                _ => break,
            }
            p += step;
        }
        (clean, clean + interrupted)
    };

    let (left_clean, left_any) = extend(-1);
    let (right_clean, right_any) = extend(1);
    1 + (left_clean + right_any).max(left_any + right_clean)
}

/// Summarize the reference context of `key`
pub fn indel_context(key: &IndelKey, reference: &ReferenceSegment) -> IndelContext {
    if key.is_breakpoint() || key.pos <= reference.start {
        return IndelContext::unknown(key);
    }
    let anchor = match reference.base(key.pos - 1) {
        Some(b) => b,
        None => return IndelContext::unknown(key),
    };

    let indel_seq: Vec<u8> = match key.kind {
        IndelKind::Deletion => match reference.slice(key.pos, key.pos + key.length as u64) {
            Some(s) => s.to_vec(),
            None => return IndelContext::unknown(key),
        },
        _ => key.seq.as_bytes().to_ascii_uppercase(),
    };
    if indel_seq.is_empty() {
        return IndelContext::unknown(key);
    }

    let unit = repeat_unit(&indel_seq).to_vec();
    let indel_units = (indel_seq.len() / unit.len()) as u32;
    let ref_repeat_count = count_repeats(reference, &unit, key.pos);
    let indel_repeat_count = match key.kind {
        IndelKind::Deletion => ref_repeat_count.saturating_sub(indel_units),
        _ => ref_repeat_count + indel_units,
    };

    let interrupted_hpol_len = [key.pos - 1, key.pos, key.right_pos()]
        .iter()
        .map(|&p| interrupted_hpol_size(reference, p))
        .max()
        .unwrap_or(0);

    let anchor = anchor as char;
    let indel_str = String::from_utf8_lossy(&indel_seq).into_owned();
    let (ref_allele, alt_allele) = match key.kind {
        IndelKind::Deletion => (format!("{}{}", anchor, indel_str), anchor.to_string()),
        _ => (anchor.to_string(), format!("{}{}", anchor, indel_str)),
    };

    IndelContext {
        ref_allele,
        alt_allele,
        repeat_unit: String::from_utf8_lossy(&unit).into_owned(),
        ref_repeat_count,
        indel_repeat_count,
        interrupted_hpol_len,
    }
}
