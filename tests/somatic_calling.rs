use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tnsomatic_rs::{
    chrom_depth::{ChromDepthRecord, ChromDepthTable},
    config::IndelCandidacyConfig,
    context::load_reference,
    evidence::{merge_by_chrom, EvidenceReader},
    filter::SomaticFilter,
    output::{write_callable_regions_to_path, write_calls_to_path, CALLS_HEADER},
    processor::{process_chromosomes, CallDetail, CallResult, CallerResources},
    utils::open_reader,
    Sample, SomaticCallerConfig, SomaticError,
};

/// Text of one evidence file
#[derive(Default)]
struct Evidence(String);

impl Evidence {
    /// `depth` reads at `pos`, the first `n_alt` of which carry `alt`, on
    /// alternating strands
    fn site(mut self, chrom: &str, pos: u64, ref_base: char, alt: char, n_alt: usize, depth: usize) -> Self {
        for i in 0..depth {
            let base = if i < n_alt { alt } else { ref_base };
            let strand = if i % 2 == 0 { '+' } else { '-' };
            writeln!(self.0, "BASE\t{}\t{}\t{}\t{}\t30\t{}\t1\t1", chrom, pos, ref_base, base, strand).unwrap();
        }
        self
    }

    fn indel(mut self, chrom: &str, key: &str, n_alt: usize, n_ref: usize) -> Self {
        for _ in 0..n_alt {
            writeln!(self.0, "INDEL\t{}\t1\t{}\t-20\t0", chrom, key).unwrap();
        }
        for _ in 0..n_ref {
            writeln!(self.0, "INDEL\t{}\t1\t{}\t0\t-20", chrom, key).unwrap();
        }
        self
    }

    fn write(&self, dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        if name.ends_with(".gz") {
            let mut encoder = GzEncoder::new(std::fs::File::create(&path).unwrap(), Compression::default());
            encoder.write_all(self.0.as_bytes()).unwrap();
            encoder.finish().unwrap();
        } else {
            std::fs::write(&path, &self.0).unwrap();
        }
        path
    }
}

fn run(normal: &Path, tumor: &Path, resources: &CallerResources) -> (Vec<CallResult>, usize) {
    let readers = vec![
        EvidenceReader::from_path(normal, Sample::Normal).unwrap(),
        EvidenceReader::from_path(tumor, Sample::Tumor).unwrap(),
    ];
    let chromosomes = merge_by_chrom(readers).unwrap();
    let outputs = process_chromosomes(chromosomes, resources, 2).unwrap();
    let n_regions = outputs.iter().map(|o| o.callable.len()).sum();
    (outputs.into_iter().flat_map(|o| o.calls).collect(), n_regions)
}

#[test]
fn test_somatic_snv_passes() {
    let dir = tempfile::tempdir().unwrap();
    let normal = Evidence::default().site("chr1", 100, 'A', 'G', 0, 20).write(&dir, "normal.tsv");
    let tumor = Evidence::default().site("chr1", 100, 'A', 'G', 10, 20).write(&dir, "tumor.tsv.gz");

    let resources = CallerResources::new(SomaticCallerConfig::default());
    let (calls, _) = run(&normal, &tumor, &resources);

    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!((call.chrom.as_str(), call.pos), ("chr1", 100));
    assert!(call.quality() > resources.config.filters.snv_min_qss_ref);
    assert!(call.is_pass(), "unexpected filters {}", call.filters);
    match &call.detail {
        CallDetail::Snv(score) => assert_eq!(score.alt_base.map(|b| b.to_string()), Some("G".to_string())),
        CallDetail::Indel(_) => panic!("expected an SNV call"),
    }
}

#[test]
fn test_identical_evidence_not_reported() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = Evidence::default().site("chr1", 100, 'A', 'G', 10, 20);
    let normal = evidence.write(&dir, "normal.tsv");
    let tumor = evidence.write(&dir, "tumor.tsv");

    let resources = CallerResources::new(SomaticCallerConfig::default());
    let (calls, _) = run(&normal, &tumor, &resources);
    assert!(calls.is_empty());
}

#[test]
fn test_high_depth_filter() {
    let dir = tempfile::tempdir().unwrap();
    let normal = Evidence::default().site("chr1", 100, 'A', 'G', 0, 200).write(&dir, "normal.tsv");
    let tumor = Evidence::default().site("chr1", 100, 'A', 'G', 60, 200).write(&dir, "tumor.tsv");

    let mut resources = CallerResources::new(SomaticCallerConfig::default());
    resources.depth_table = Some(
        ChromDepthTable::from_records(vec![ChromDepthRecord {
            chrom: "chr1".into(),
            depth: 50.0,
        }])
        .unwrap(),
    );
    let (calls, _) = run(&normal, &tumor, &resources);

    assert_eq!(calls.len(), 1);
    assert!(calls[0].filters.contains(SomaticFilter::HighDepth));
    assert_eq!(calls[0].filters.to_string(), "DP");
}

#[test]
fn test_weak_indel_is_not_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let normal = Evidence::default().indel("chr1", "500:DEL:2", 0, 20).write(&dir, "normal.tsv");
    let tumor = Evidence::default().indel("chr1", "500:DEL:2", 2, 18).write(&dir, "tumor.tsv");

    let config = SomaticCallerConfig {
        candidacy: IndelCandidacyConfig {
            min_candidate_indel_reads: Some(3),
            ..Default::default()
        },
        ..Default::default()
    };
    let resources = CallerResources::new(config);
    let (calls, _) = run(&normal, &tumor, &resources);
    assert!(calls.is_empty());
}

#[test]
fn test_indel_with_reference_context() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    std::fs::write(&fasta, ">chr2\nGATTACAGATTACAGATTACAGGCCTTAACCGGTTAACCGGTTAACCGG\n").unwrap();

    let normal = Evidence::default().indel("chr2", "10:DEL:2", 0, 40).write(&dir, "normal.tsv");
    let tumor = Evidence::default().indel("chr2", "10:DEL:2", 15, 15).write(&dir, "tumor.tsv");

    let mut resources = CallerResources::new(SomaticCallerConfig::default());
    resources.reference = load_reference(&fasta).unwrap();
    let (calls, _) = run(&normal, &tumor, &resources);

    assert_eq!(calls.len(), 1);
    match &calls[0].detail {
        CallDetail::Indel(score) => {
            assert!(score.qsi >= resources.config.filters.sindel_quality_lower_bound);
            assert_eq!(score.context.ref_allele, "ATT");
            assert_eq!(score.context.alt_allele, "A");
            assert_eq!(score.context.repeat_unit, "T");
        }
        CallDetail::Snv(_) => panic!("expected an indel call"),
    }
}

#[test]
fn test_chromosomes_keep_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let normal = Evidence::default()
        .site("chr3", 10, 'C', 'T', 0, 20)
        .site("chr1", 10, 'C', 'T', 0, 20)
        .site("chr2", 10, 'C', 'T', 0, 20)
        .write(&dir, "normal.tsv");
    let tumor = Evidence::default()
        .site("chr3", 10, 'C', 'T', 10, 20)
        .site("chr1", 10, 'C', 'T', 10, 20)
        .site("chr2", 10, 'C', 'T', 10, 20)
        .write(&dir, "tumor.tsv");

    let resources = CallerResources::new(SomaticCallerConfig::default());
    let (calls, n_regions) = run(&normal, &tumor, &resources);
    let chroms: Vec<&str> = calls.iter().map(|c| c.chrom.as_str()).collect();
    assert_eq!(chroms, vec!["chr3", "chr1", "chr2"]);
    assert_eq!(n_regions, 3);
}

#[test]
fn test_written_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let normal = Evidence::default()
        .site("chr1", 100, 'A', 'G', 0, 20)
        .site("chr1", 101, 'C', 'T', 0, 20)
        .write(&dir, "normal.tsv");
    let tumor = Evidence::default()
        .site("chr1", 100, 'A', 'G', 10, 20)
        .site("chr1", 101, 'C', 'T', 0, 20)
        .write(&dir, "tumor.tsv");

    let resources = CallerResources::new(SomaticCallerConfig::default());
    let readers = vec![
        EvidenceReader::from_path(&normal, Sample::Normal).unwrap(),
        EvidenceReader::from_path(&tumor, Sample::Tumor).unwrap(),
    ];
    let outputs = process_chromosomes(merge_by_chrom(readers).unwrap(), &resources, 1).unwrap();

    let calls_path = dir.path().join("out/calls.tsv");
    let bed_path = dir.path().join("out/callable.bed.gz");
    write_calls_to_path(&calls_path, &outputs[0].calls, false).unwrap();
    write_callable_regions_to_path(&bed_path, &outputs[0].callable).unwrap();

    let text = std::fs::read_to_string(&calls_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], CALLS_HEADER);
    assert!(lines[1].starts_with("chr1\t100\tSNV\tA\tG\t"));

    let mut bed = String::new();
    std::io::Read::read_to_string(&mut open_reader(&bed_path).unwrap(), &mut bed).unwrap();
    assert_eq!(bed, "chr1\t99\t101\n");
}

#[test]
fn test_invalid_evidence_line() {
    let dir = tempfile::tempdir().unwrap();
    let normal = dir.path().join("normal.tsv");
    std::fs::write(&normal, "BASE\tchr1\t100\tA\tA\t30\tx\t1\t1\n").unwrap();
    let reader = EvidenceReader::from_path(&normal, Sample::Normal).unwrap();
    assert!(matches!(
        merge_by_chrom(vec![reader]),
        Err(SomaticError::InvalidEvidence(_))
    ));
}

#[test]
fn test_unsorted_evidence_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let normal = Evidence::default()
        .site("chr1", 200, 'A', 'G', 0, 20)
        .site("chr1", 100, 'A', 'G', 0, 20)
        .write(&dir, "normal.tsv");
    let tumor = Evidence::default().site("chr1", 100, 'A', 'G', 10, 20).write(&dir, "tumor.tsv");

    let resources = CallerResources::new(SomaticCallerConfig::default());
    let readers = vec![
        EvidenceReader::from_path(&normal, Sample::Normal).unwrap(),
        EvidenceReader::from_path(&tumor, Sample::Tumor).unwrap(),
    ];
    let result = process_chromosomes(merge_by_chrom(readers).unwrap(), &resources, 2);
    assert!(matches!(result, Err(SomaticError::InvalidEvidence(_))));
}

#[test]
fn test_written_positions_never_decrease() {
    let dir = tempfile::tempdir().unwrap();
    let normal = Evidence::default()
        .site("chr1", 100, 'A', 'G', 0, 20)
        .indel("chr1", "100:DEL:2", 0, 40)
        .write(&dir, "normal.tsv");
    let tumor = Evidence::default()
        .site("chr1", 100, 'A', 'G', 10, 20)
        .indel("chr1", "100:DEL:2", 15, 15)
        .write(&dir, "tumor.tsv");

    let resources = CallerResources::new(SomaticCallerConfig::default());
    let (calls, _) = run(&normal, &tumor, &resources);
    assert_eq!(calls.len(), 2);

    let calls_path = dir.path().join("calls.tsv");
    write_calls_to_path(&calls_path, &calls, true).unwrap();
    let text = std::fs::read_to_string(&calls_path).unwrap();
    let written: Vec<(u64, &str)> = text
        .lines()
        .map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            (fields[1].parse().unwrap(), fields[2])
        })
        .collect();
    assert_eq!(written, vec![(99, "INDEL"), (100, "SNV")]);
}

#[test]
fn test_out_of_range_config_rejected() {
    let config = SomaticCallerConfig {
        somatic_snv_rate: 1.5,
        ..Default::default()
    };
    match config.validated() {
        Err(SomaticError::Configuration(violations)) => {
            assert_eq!(violations.len(), 1);
            assert!(violations.contains("somatic-snv-rate"));
        }
        other => panic!("expected a configuration error, got {:?}", other),
    }
}
