//! File handling, compression and timing helpers

use crate::{SomaticError, SomaticResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Check if a file starts with the gzip magic bytes
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> SomaticResult<bool> {
    let mut reader = BufReader::new(File::open(path)?);
    Ok(reader.fill_buf()?.starts_with(&GZIP_MAGIC))
}

/// Open a plain or gzip-compressed text file, detected from its content
pub fn open_reader<P: AsRef<Path>>(path: P) -> SomaticResult<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|_| SomaticError::FileNotFound(path.display().to_string()))?;

    let mut reader = BufReader::new(file);
    if reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Create an output file, gzip-compressed when the path ends in `.gz`
pub fn create_writer<P: AsRef<Path>>(path: P) -> SomaticResult<Box<dyn Write>> {
    let path = path.as_ref();
    ensure_parent_dirs(path)?;
    let file = File::create(path)?;
    if has_extension(path, "gz") {
        Ok(Box::new(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Get the number of CPU cores, with a fallback default
pub fn get_num_cpus() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Fail with `FileNotFound` unless `path` is an existing, openable file
pub fn validate_file_readable<P: AsRef<Path>>(path: P) -> SomaticResult<()> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(SomaticError::FileNotFound(path.display().to_string()));
    }
    File::open(path).map(|_| ()).map_err(|e| {
        SomaticError::Io(std::io::Error::new(
            e.kind(),
            format!("cannot read {}: {}", path.display(), e),
        ))
    })
}

pub fn has_extension<P: AsRef<Path>>(path: P, extension: &str) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

pub fn ensure_parent_dirs<P: AsRef<Path>>(path: P) -> SomaticResult<()> {
    match path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(std::fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

/// Logs the elapsed time of a run phase when dropped
pub struct Timer {
    start: std::time::Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::info!("Starting: {}", name);
        Timer {
            start: std::time::Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::info!("Finished: {} in {:.2?}", self.name, self.elapsed());
    }
}
