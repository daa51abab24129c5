//! # Reference Scanning
//!
//! Finds the maximal coordinate in a partition's reference data. Accepts
//! plain or gzip/BGZF-compressed whitespace-delimited text: IMPUTE-style
//! legend files (`id position a0 a1` header) and VCF (`POS` in column 2)
//! both work with the default column.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::{debug, info_span};

use crate::error::{ChunkjobError, Result};

/// Summary of one reference scan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferenceExtent {
    pub max_coordinate: u64,
    pub n_records: u64,
}

/// Open a reference file, transparently decompressing `.gz`/`.bgz`.
pub fn open_reference(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|e| ChunkjobError::data_access(path, e.to_string()))?;

    let is_gzipped = path
        .extension()
        .map(|e| e == "gz" || e == "bgz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead + Send> = if is_gzipped {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

/// Scan a reference for its largest coordinate.
///
/// `position_column` is 1-based. Lines starting with `#` are skipped, as is a
/// single leading header row whose coordinate field is not numeric.
/// Returns `n_records == 0` when nothing was found; callers decide whether
/// that is an error.
pub fn scan_max_coordinate(path: &Path, position_column: usize) -> Result<ReferenceExtent> {
    info_span!("scan_reference", path = ?path).in_scope(|| {
        let reader = open_reference(path)?;
        scan_reader(reader, path, position_column)
    })
}

fn scan_reader<R: Read>(reader: R, path: &Path, position_column: usize) -> Result<ReferenceExtent> {
    assert!(position_column >= 1, "position column is 1-based");
    let reader = BufReader::new(reader);

    let mut extent = ReferenceExtent {
        max_coordinate: 0,
        n_records: 0,
    };
    let mut seen_row = false;

    for (line_num, line) in reader.lines().enumerate() {
        // Decompression errors surface here as I/O errors
        let line = line.map_err(|e| ChunkjobError::data_access(path, e.to_string()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let field = line.split_whitespace().nth(position_column - 1).ok_or_else(|| {
            ChunkjobError::parse(
                path,
                line_num + 1,
                format!("expected at least {} columns", position_column),
            )
        })?;

        match field.parse::<u64>() {
            Ok(pos) => {
                extent.max_coordinate = extent.max_coordinate.max(pos);
                extent.n_records += 1;
            }
            Err(_) if !seen_row => {
                debug!(line = line_num + 1, "skipping header row");
            }
            Err(_) => {
                return Err(ChunkjobError::parse(
                    path,
                    line_num + 1,
                    format!("invalid coordinate {:?}", field),
                ));
            }
        }
        seen_row = true;
    }

    Ok(extent)
}
