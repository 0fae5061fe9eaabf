//! Tab-separated call records and BED callable regions

use crate::callable::CallableRegion;
use crate::processor::{CallDetail, CallResult};
use crate::utils::create_writer;
use crate::SomaticResult;
use std::io::Write;
use std::path::Path;

pub const CALLS_HEADER: &str = "#chrom\tpos\ttype\tref\talt\tquality\tquality_ref\tnormal_genotype\ttier\tfilter\tevs\tnormal_depth\tnormal_alt\ttumor_depth\ttumor_alt\tinfo";

fn format_tier(tier: Option<crate::Tier>) -> String {
    tier.map_or_else(|| ".".to_string(), |t| t.number().to_string())
}

fn format_call(call: &CallResult) -> String {
    let evs = call
        .empirical_score
        .map_or_else(|| ".".to_string(), |s| format!("{:.2}", s));

    match &call.detail {
        CallDetail::Snv(s) => {
            let alt = s.alt_base.map_or_else(|| ".".to_string(), |b| b.to_string());
            let info = format!(
                "ALT_STRAND={},{};N_FILT={};T_FILT={};N_SPANDEL={};T_SPANDEL={};NQSS={}",
                s.tumor.alt_strand_counts[0],
                s.tumor.alt_strand_counts[1],
                s.normal.n_filtered,
                s.tumor.n_filtered,
                s.normal.n_spanning_deletions,
                s.tumor.n_spanning_deletions,
                s.nqss
            );
            format!(
                "{}\t{}\tSNV\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                call.chrom,
                call.pos,
                s.ref_base,
                alt,
                s.qss,
                s.qss_ref,
                s.normal_genotype.label(),
                format_tier(s.tier),
                call.filters,
                evs,
                s.normal.depth_tier1,
                s.normal.alt_count,
                s.tumor.depth_tier1,
                s.tumor.alt_count,
                info
            )
        }
        CallDetail::Indel(s) => {
            let mut info = format!(
                "KEY={};RU={};RC={};IC={};IHP={}",
                s.key,
                s.context.repeat_unit,
                s.context.ref_repeat_count,
                s.context.indel_repeat_count,
                s.context.interrupted_hpol_len
            );
            if let Some(alt) = &s.alt_indel {
                info.push_str(&format!(";ALT_INDEL={}", alt));
            }
            format!(
                "{}\t{}\tINDEL\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                call.chrom,
                call.reported_pos(),
                s.context.ref_allele,
                s.context.alt_allele,
                s.qsi,
                s.qsi_ref,
                s.normal_genotype.label(),
                format_tier(s.tier),
                call.filters,
                evs,
                s.normal.depth_tier1,
                s.normal.n_alt,
                s.tumor.depth_tier1,
                s.tumor.n_alt,
                info
            )
        }
    }
}

/// Write call records; `skip_header` only suppresses the header line
pub fn write_calls<W: Write>(writer: &mut W, calls: &[CallResult], skip_header: bool) -> SomaticResult<()> {
    if !skip_header {
        writeln!(writer, "{}", CALLS_HEADER)?;
    }
    for call in calls {
        writeln!(writer, "{}", format_call(call))?;
    }
    Ok(())
}

pub fn write_calls_to_path<P: AsRef<Path>>(path: P, calls: &[CallResult], skip_header: bool) -> SomaticResult<()> {
    let mut writer = create_writer(path)?;
    write_calls(&mut writer, calls, skip_header)?;
    writer.flush()?;
    Ok(())
}

pub fn write_callable_regions<W: Write>(writer: &mut W, regions: &[CallableRegion]) -> SomaticResult<()> {
    for region in regions {
        writeln!(writer, "{}", region)?;
    }
    Ok(())
}

pub fn write_callable_regions_to_path<P: AsRef<Path>>(path: P, regions: &[CallableRegion]) -> SomaticResult<()> {
    let mut writer = create_writer(path)?;
    write_callable_regions(&mut writer, regions)?;
    writer.flush()?;
    Ok(())
}
