//! Reader for the per-sample, tab-separated evidence stream.
//!
//! Each line is one event, `#` lines are comments:
//!
//! ```text
//! BASE     chrom pos ref_base base qscore strand tier1_pass tier2_pass [read_pos read_len]
//! SPANDEL  chrom pos ref_base
//! INDEL    chrom tier indel ref_lnp indel_lnp [alt_indel alt_lnp]...
//! ```
//!
//! `strand` is `+` or `-`, pass flags are `0`/`1` and `tier` is `1` or `2`.
//! Indels are written `pos:KIND:length[:seq]` with `KIND` one of `INS`, `DEL`,
//! `BP_LEFT` or `BP_RIGHT`.

use crate::indel::{IndelKey, IndelKind, ReadPathScores};
use crate::pileup::{Base, BaseCall};
use crate::utils::open_reader;
use crate::{Sample, SomaticError, SomaticResult, Strand, Tier};
use csv::StringRecord;
use log::debug;
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceEvent {
    Base {
        pos: u64,
        sample: Sample,
        ref_base: Base,
        call: BaseCall,
    },
    SpanningDeletion {
        pos: u64,
        sample: Sample,
        ref_base: Base,
    },
    IndelRead {
        key: IndelKey,
        sample: Sample,
        tier: Tier,
        scores: ReadPathScores,
    },
}

impl EvidenceEvent {
    pub fn pos(&self) -> u64 {
        match self {
            EvidenceEvent::Base { pos, .. } | EvidenceEvent::SpanningDeletion { pos, .. } => *pos,
            EvidenceEvent::IndelRead { key, .. } => key.pos,
        }
    }
}

impl FromStr for IndelKey {
    type Err = SomaticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SomaticError::InvalidEvidence(format!("invalid indel '{}'", s));
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() < 3 || fields.len() > 4 {
            return Err(invalid());
        }
        let pos: u64 = fields[0].parse().map_err(|_| invalid())?;
        let length: u32 = fields[2].parse().map_err(|_| invalid())?;
        let seq = fields.get(3).copied().unwrap_or("");
        let kind = match fields[1] {
            "INS" => IndelKind::Insertion,
            "DEL" => IndelKind::Deletion,
            "BP_LEFT" => IndelKind::BreakpointLeft,
            "BP_RIGHT" => IndelKind::BreakpointRight,
            _ => return Err(invalid()),
        };
        match kind {
            IndelKind::Insertion if seq.len() as u32 != length && !seq.is_empty() => Err(invalid()),
            IndelKind::Insertion if !seq.is_empty() => Ok(IndelKey::insertion(pos, seq)),
            IndelKind::Deletion => Ok(IndelKey::deletion(pos, length)),
            _ => Ok(IndelKey {
                pos,
                kind,
                length,
                seq: seq.to_ascii_uppercase(),
            }),
        }
    }
}

/// Streaming reader over one sample's evidence file
pub struct EvidenceReader {
    sample: Sample,
    records: csv::StringRecordsIntoIter<Box<dyn BufRead>>,
}

impl EvidenceReader {
    pub fn from_path<P: AsRef<Path>>(path: P, sample: Sample) -> SomaticResult<Self> {
        Ok(Self::from_reader(open_reader(path)?, sample))
    }

    pub fn from_reader(reader: Box<dyn BufRead>, sample: Sample) -> Self {
        let records = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .from_reader(reader)
            .into_records();
        Self { sample, records }
    }

    fn parse(&self, record: &StringRecord) -> SomaticResult<(String, EvidenceEvent)> {
        let line = record.position().map_or(0, |p| p.line());
        let field = |i: usize| -> SomaticResult<&str> {
            record.get(i).ok_or_else(|| {
                SomaticError::InvalidEvidence(format!("line {}: expected at least {} fields", line, i + 1))
            })
        };
        let parse_int = |i: usize, what: &str| -> SomaticResult<u32> {
            let value = field(i)?;
            value.parse::<u32>().map_err(|_| {
                SomaticError::InvalidEvidence(format!("line {}: invalid {} '{}'", line, what, value))
            })
        };
        let parse_num = |i: usize, what: &str| -> SomaticResult<f64> {
            let value = field(i)?;
            value.parse::<f64>().map_err(|_| {
                SomaticError::InvalidEvidence(format!("line {}: invalid {} '{}'", line, what, value))
            })
        };
        let parse_pos = |i: usize| -> SomaticResult<u64> {
            let value = field(i)?;
            match value.parse::<u64>() {
                Ok(pos) if pos > 0 => Ok(pos),
                _ => Err(SomaticError::InvalidEvidence(format!(
                    "line {}: invalid position '{}'",
                    line, value
                ))),
            }
        };
        let parse_flag = |i: usize| -> SomaticResult<bool> {
            match field(i)? {
                "1" => Ok(true),
                "0" => Ok(false),
                other => Err(SomaticError::InvalidEvidence(format!(
                    "line {}: invalid pass flag '{}'",
                    line, other
                ))),
            }
        };
        let parse_base = |i: usize| -> SomaticResult<Base> {
            let value = field(i)?;
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Base::from_char(c)),
                _ => Err(SomaticError::InvalidEvidence(format!("line {}: invalid base '{}'", line, value))),
            }
        };

        let chrom = field(1)?.to_string();
        let sample = self.sample;
        let event = match field(0)? {
            "BASE" => {
                let qscore = field(5)?;
                let qscore = qscore.parse::<u8>().map_err(|_| {
                    SomaticError::InvalidEvidence(format!("line {}: invalid quality '{}', expected 0-255", line, qscore))
                })?;
                let strand = match field(6)? {
                    "+" => Strand::Forward,
                    "-" => Strand::Reverse,
                    other => {
                        return Err(SomaticError::InvalidEvidence(format!(
                            "line {}: invalid strand '{}'",
                            line, other
                        )))
                    }
                };
                let mut call = BaseCall::new(parse_base(4)?, qscore, strand, parse_flag(7)?, parse_flag(8)?);
                if record.len() >= 11 {
                    call = call.with_read_position(parse_int(9, "read position")?, parse_int(10, "read length")?);
                }
                EvidenceEvent::Base {
                    pos: parse_pos(2)?,
                    sample,
                    ref_base: parse_base(3)?,
                    call,
                }
            }
            "SPANDEL" => EvidenceEvent::SpanningDeletion {
                pos: parse_pos(2)?,
                sample,
                ref_base: parse_base(3)?,
            },
            "INDEL" => {
                let tier = match field(2)? {
                    "1" => Tier::One,
                    "2" => Tier::Two,
                    other => {
                        return Err(SomaticError::InvalidEvidence(format!(
                            "line {}: invalid tier '{}'",
                            line, other
                        )))
                    }
                };
                let key: IndelKey = field(3)?.parse()?;
                let mut scores = ReadPathScores::new(parse_num(4, "reference log-likelihood")?, parse_num(5, "indel log-likelihood")?);
                let mut i = 6;
                while i + 1 < record.len() {
                    let alt: IndelKey = field(i)?.parse()?;
                    scores = scores.with_alt_indel(alt, parse_num(i + 1, "alternate indel log-likelihood")?);
                    i += 2;
                }
                EvidenceEvent::IndelRead {
                    key,
                    sample,
                    tier,
                    scores,
                }
            }
            other => {
                return Err(SomaticError::InvalidEvidence(format!(
                    "line {}: unknown event type '{}'",
                    line, other
                )))
            }
        };
        Ok((chrom, event))
    }
}

impl Iterator for EvidenceReader {
    type Item = SomaticResult<(String, EvidenceEvent)>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(record.map_err(SomaticError::from).and_then(|r| self.parse(&r)))
    }
}

/// All evidence of one chromosome, in position order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChromEvidence {
    pub chrom: String,
    pub events: Vec<EvidenceEvent>,
}

/// One reader with its next event buffered and its ordering checked
struct OrderedSource {
    reader: EvidenceReader,
    head: Option<(String, EvidenceEvent)>,
    last_pos: u64,
    seen_chroms: HashSet<String>,
}

impl OrderedSource {
    fn new(reader: EvidenceReader) -> SomaticResult<Self> {
        let mut source = Self {
            reader,
            head: None,
            last_pos: 0,
            seen_chroms: HashSet::new(),
        };
        source.advance()?;
        Ok(source)
    }

    fn head_chrom(&self) -> Option<&str> {
        self.head.as_ref().map(|(chrom, _)| chrom.as_str())
    }

    fn head_pos_on(&self, chrom: &str) -> Option<u64> {
        match &self.head {
            Some((c, event)) if c == chrom => Some(event.pos()),
            _ => None,
        }
    }

    /// Replace the buffered event with the next one from the reader
    fn advance(&mut self) -> SomaticResult<Option<EvidenceEvent>> {
        let next = self.reader.next().transpose()?;
        if let Some((chrom, event)) = &next {
            let pos = event.pos();
            let same_chrom = self.head_chrom() == Some(chrom.as_str());
            if same_chrom && pos < self.last_pos {
                return Err(SomaticError::InvalidEvidence(format!(
                    "{} evidence is not position-sorted: {}:{} follows {}:{}",
                    self.reader.sample, chrom, pos, chrom, self.last_pos
                )));
            }
            if !same_chrom && !self.seen_chroms.insert(chrom.clone()) {
                return Err(SomaticError::InvalidEvidence(format!(
                    "{} evidence is not grouped by chromosome: {} appears again at {}",
                    self.reader.sample, chrom, pos
                )));
            }
            self.last_pos = pos;
        }
        Ok(std::mem::replace(&mut self.head, next).map(|(_, event)| event))
    }
}

/// Merges position-sorted evidence readers into one chromosome at a time.
///
/// Only the chromosome being yielded is held in memory. Within it, events of
/// the readers are interleaved by position, earlier readers first on ties.
/// Every reader must list chromosomes contiguously and in the same relative
/// order; a position moving backwards is rejected.
pub struct ChromosomeStream {
    sources: Vec<OrderedSource>,
    emitted: HashSet<String>,
    n_events: usize,
    failed: bool,
}

impl ChromosomeStream {
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    fn next_chrom(&mut self) -> SomaticResult<Option<ChromEvidence>> {
        let chrom = match self.sources.iter().find_map(OrderedSource::head_chrom) {
            Some(chrom) => chrom.to_string(),
            None => return Ok(None),
        };
        if !self.emitted.insert(chrom.clone()) {
            return Err(SomaticError::InvalidEvidence(format!(
                "chromosome {} appears in a different order across evidence files",
                chrom
            )));
        }

        let mut events = Vec::new();
        loop {
            let next = self
                .sources
                .iter()
                .enumerate()
                .filter_map(|(i, source)| source.head_pos_on(&chrom).map(|pos| (pos, i)))
                .min();
            let i = match next {
                Some((_, i)) => i,
                None => break,
            };
            if let Some(event) = self.sources[i].advance()? {
                events.push(event);
            }
        }
        self.n_events += events.len();
        debug!("Read {} evidence events on {}", events.len(), chrom);
        Ok(Some(ChromEvidence { chrom, events }))
    }
}

impl Iterator for ChromosomeStream {
    type Item = SomaticResult<ChromEvidence>;

    /// Stops after the first error
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.next_chrom();
        self.failed = next.is_err();
        next.transpose()
    }
}

/// Merge readers into a stream of chromosomes, in the order they first appear
pub fn merge_by_chrom<I>(readers: I) -> SomaticResult<ChromosomeStream>
where
    I: IntoIterator<Item = EvidenceReader>,
{
    let sources = readers
        .into_iter()
        .map(OrderedSource::new)
        .collect::<SomaticResult<Vec<_>>>()?;
    Ok(ChromosomeStream {
        sources,
        emitted: HashSet::new(),
        n_events: 0,
        failed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn reader(text: &str, sample: Sample) -> EvidenceReader {
        let boxed: Box<dyn BufRead> = Box::new(Cursor::new(text.as_bytes().to_vec()));
        EvidenceReader::from_reader(boxed, sample)
    }

    #[test]
    fn test_parse_indel_key() {
        assert_eq!("100:DEL:3".parse::<IndelKey>().unwrap(), IndelKey::deletion(100, 3));
        assert_eq!("7:INS:2:at".parse::<IndelKey>().unwrap(), IndelKey::insertion(7, "AT"));
        assert!("7:INS:3:AT".parse::<IndelKey>().is_err());
        assert!("7:DUP:3".parse::<IndelKey>().is_err());
        assert!("seven:DEL:3".parse::<IndelKey>().is_err());
        let bp: IndelKey = "50:BP_LEFT:0".parse().unwrap();
        assert!(bp.is_breakpoint());
    }

    #[test]
    fn test_read_events() {
        let text = "# sample evidence\n\
            BASE\tchr1\t100\tA\tG\t30\t+\t1\t1\n\
            BASE\tchr1\t100\tA\tA\t12\t-\t0\t1\t5\t100\n\
            SPANDEL\tchr1\t101\tC\n\
            INDEL\tchr1\t1\t105:DEL:2\t-20\t0\t106:DEL:2\t-1.5\n";
        let events: Vec<(String, EvidenceEvent)> = reader(text, Sample::Tumor).map(|r| r.unwrap()).collect();
        assert_eq!(events.len(), 4);

        match &events[1].1 {
            EvidenceEvent::Base { pos, sample, call, .. } => {
                assert_eq!(*pos, 100);
                assert_eq!(*sample, Sample::Tumor);
                assert_eq!(call.strand, Strand::Reverse);
                assert!(!call.is_tier1_pass && call.is_tier2_pass);
                assert_eq!(call.read_len, Some(100));
            }
            other => panic!("unexpected event {:?}", other),
        }
        match &events[3].1 {
            EvidenceEvent::IndelRead { key, tier, scores, .. } => {
                assert_eq!(*key, IndelKey::deletion(105, 2));
                assert_eq!(*tier, Tier::One);
                assert_eq!(scores.alt_indels.len(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_malformed_line_reports_error() {
        let text = "BASE\tchr1\t100\tA\tG\tthirty\t+\t1\t1\n";
        let result: Vec<_> = reader(text, Sample::Normal).collect();
        assert!(matches!(result[0], Err(SomaticError::InvalidEvidence(_))));

        let text = "PILEUP\tchr1\t1\n";
        assert!(reader(text, Sample::Normal).next().unwrap().is_err());
    }

    #[test]
    fn test_quality_outside_byte_range_rejected() {
        for quality in ["300", "-5", "30.5"] {
            let text = format!("BASE\tchr1\t100\tA\tG\t{}\t+\t1\t1\n", quality);
            let result = reader(&text, Sample::Tumor).next().unwrap();
            assert!(
                matches!(result, Err(SomaticError::InvalidEvidence(ref msg)) if msg.contains(quality)),
                "quality {} accepted",
                quality
            );
        }
        let text = "BASE\tchr1\t100\tA\tG\t255\t+\t1\t1\n";
        match reader(text, Sample::Tumor).next().unwrap().unwrap().1 {
            EvidenceEvent::Base { call, .. } => assert_eq!(call.qscore, 255),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_merge_interleaves_samples_by_position() {
        let mut normal = NamedTempFile::new().unwrap();
        writeln!(normal, "BASE\tchr2\t10\tA\tA\t30\t+\t1\t1").unwrap();
        writeln!(normal, "BASE\tchr2\t50\tA\tA\t30\t+\t1\t1").unwrap();
        writeln!(normal, "BASE\tchr1\t20\tA\tA\t30\t+\t1\t1").unwrap();
        let mut tumor = NamedTempFile::new().unwrap();
        writeln!(tumor, "BASE\tchr2\t10\tC\tC\t30\t-\t1\t1").unwrap();
        writeln!(tumor, "BASE\tchr2\t30\tC\tC\t30\t-\t1\t1").unwrap();

        let stream = merge_by_chrom(vec![
            EvidenceReader::from_path(normal.path(), Sample::Normal).unwrap(),
            EvidenceReader::from_path(tumor.path(), Sample::Tumor).unwrap(),
        ])
        .unwrap();
        let groups: Vec<ChromEvidence> = stream.map(|g| g.unwrap()).collect();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].chrom, "chr2");
        let order: Vec<(u64, Sample)> = groups[0]
            .events
            .iter()
            .map(|e| match e {
                EvidenceEvent::Base { pos, sample, .. } => (*pos, *sample),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(
            order,
            vec![(10, Sample::Normal), (10, Sample::Tumor), (30, Sample::Tumor), (50, Sample::Normal)]
        );
        assert_eq!(groups[1].chrom, "chr1");
        assert_eq!(groups[1].events.len(), 1);
    }

    #[test]
    fn test_unsorted_evidence_rejected() {
        let text = "BASE\tchr1\t50\tA\tA\t30\t+\t1\t1\n\
            BASE\tchr1\t20\tA\tA\t30\t+\t1\t1\n";
        let mut stream = merge_by_chrom(vec![reader(text, Sample::Tumor)]).unwrap();
        assert!(matches!(stream.next(), Some(Err(SomaticError::InvalidEvidence(_)))));

        let text = "BASE\tchr1\t50\tA\tA\t30\t+\t1\t1\n\
            BASE\tchr2\t20\tA\tA\t30\t+\t1\t1\n\
            BASE\tchr1\t60\tA\tA\t30\t+\t1\t1\n";
        let results: Vec<_> = merge_by_chrom(vec![reader(text, Sample::Normal)]).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(SomaticError::InvalidEvidence(_))));
    }

    #[test]
    fn test_chromosome_order_must_agree_across_samples() {
        let normal = reader("BASE\tchr1\t5\tA\tA\t30\t+\t1\t1\nBASE\tchr2\t5\tA\tA\t30\t+\t1\t1\n", Sample::Normal);
        let tumor = reader("BASE\tchr2\t5\tA\tA\t30\t+\t1\t1\nBASE\tchr1\t5\tA\tA\t30\t+\t1\t1\n", Sample::Tumor);
        let results: Vec<_> = merge_by_chrom(vec![normal, tumor]).unwrap().collect();
        assert!(results.iter().any(|r| matches!(r, Err(SomaticError::InvalidEvidence(_)))));
    }
}
