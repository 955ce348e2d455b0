//src/match_file.rs

//! Tab-separated match files, plain or gzipped.
//!
//! One line per alignment; consecutive lines with the same read name make up
//! one read. Columns:
//!
//! ```text
//! read  length  reference  bitscore  expect  identity  qstart  qend  rstart  rend  rlength  class_ids  [tags]
//! ```
//!
//! `class_ids` holds one id per classification, comma separated (0 for none).
//! A reference of `*` marks a read without alignments. Optional trailing
//! `key=value` tags: `mate=<read>`, `magnitude=<n>`, `complexity=<f>`.

use ahash::AHashMap;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use crate::error::{BinningError, Result};
use crate::source::InMemoryReadSource;
use crate::types::{Match, Read};

const REQUIRED_COLUMNS: usize = 12;
const NO_REFERENCE: &str = "*";

/// Opens `path`, decompressing on the fly when it ends in `.gz`.
fn open_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let f = File::open(path)?;
    let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);
    Ok(if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    })
}

/// Reads all records of a match file.
pub fn read_match_records<P: AsRef<Path>>(path: P) -> Result<Vec<Read>> {
    let reads = parse_match_records(open_reader(path.as_ref())?)?;
    log::info!("Loaded {} reads from {}", reads.len(), path.as_ref().display());
    Ok(reads)
}

/// Loads a match file into a read source with mate lookup.
pub fn open_match_file<P: AsRef<Path>>(path: P) -> Result<InMemoryReadSource> {
    Ok(InMemoryReadSource::new(read_match_records(path)?))
}

fn field<T: FromStr>(parts: &[&str], index: usize, what: &str, line_no: usize) -> Result<T> {
    parts[index]
        .trim()
        .parse()
        .map_err(|_| BinningError::parse(line_no, format!("bad {} '{}'", what, parts[index])))
}

fn parse_class_ids(text: &str, line_no: usize) -> Result<Vec<i32>> {
    text.split(',')
        .map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return Ok(0);
            }
            s.parse()
                .map_err(|_| BinningError::parse(line_no, format!("bad class id '{}'", s)))
        })
        .collect()
}

pub fn parse_match_records<R: BufRead>(reader: R) -> Result<Vec<Read>> {
    let mut reads: Vec<Read> = Vec::new();
    let mut mate_names: Vec<Option<String>> = Vec::new();
    let mut next_match_uid = 1u64;

    for (index, line_result) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line_result?;
        let trimmed = line.trim_end_matches('\r');
        if trimmed.trim().is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = trimmed.split('\t').collect();
        if parts.len() < REQUIRED_COLUMNS {
            return Err(BinningError::parse(
                line_no,
                format!("expected at least {} columns, found {}", REQUIRED_COLUMNS, parts.len()),
            ));
        }
        let name = parts[0].trim();
        let length: u32 = field(&parts, 1, "read length", line_no)?;

        let starts_new_read = reads.last().map_or(true, |r| r.name != name);
        if starts_new_read {
            let mut read = Read::new(reads.len() as u64 + 1, length, Vec::new());
            read.name = name.to_string();
            reads.push(read);
            mate_names.push(None);
        }
        let slot = reads.len() - 1;

        for tag in &parts[REQUIRED_COLUMNS..] {
            let Some((key, value)) = tag.split_once('=') else {
                return Err(BinningError::parse(line_no, format!("bad tag '{}'", tag)));
            };
            match key {
                "mate" => mate_names[slot] = Some(value.to_string()),
                "magnitude" => {
                    reads[slot].magnitude = value
                        .parse()
                        .map_err(|_| BinningError::parse(line_no, format!("bad magnitude '{}'", value)))?
                }
                "complexity" => {
                    reads[slot].complexity = Some(
                        value
                            .parse()
                            .map_err(|_| BinningError::parse(line_no, format!("bad complexity '{}'", value)))?,
                    )
                }
                other => log::debug!("Line {}: ignoring tag '{}'", line_no, other),
            }
        }

        let reference = parts[2].trim();
        if reference == NO_REFERENCE {
            continue;
        }
        let mut m = Match::new(
            next_match_uid,
            parse_class_ids(parts[11], line_no)?,
            field(&parts, 3, "bit score", line_no)?,
            field(&parts, 6, "query start", line_no)?,
            field(&parts, 7, "query end", line_no)?,
        );
        next_match_uid += 1;
        m.expected = field(&parts, 4, "expect", line_no)?;
        m.percent_identity = field(&parts, 5, "identity", line_no)?;
        m.reference = reference.to_string();
        m.ref_start = field(&parts, 8, "reference start", line_no)?;
        m.ref_end = field(&parts, 9, "reference end", line_no)?;
        m.ref_length = field(&parts, 10, "reference length", line_no)?;
        reads[slot].matches.push(m);
    }

    let uids: AHashMap<&str, u64> = reads.iter().map(|r| (r.name.as_str(), r.uid)).collect();
    let mate_uids: Vec<Option<u64>> = mate_names
        .iter()
        .map(|mate| {
            mate.as_deref().and_then(|name| {
                let uid = uids.get(name).copied();
                if uid.is_none() {
                    log::warn!("Mate '{}' not found in match file", name);
                }
                uid
            })
        })
        .collect();
    for (read, mate_uid) in reads.iter_mut().zip(mate_uids) {
        read.mate_uid = mate_uid;
    }
    Ok(reads)
}
