//src/source.rs

//! Abstract access to reads and their matches.
//!
//! The on-disk containers live outside this crate; the pipeline only needs a
//! single-pass iterator plus a way to fetch a read's mate by uid.

use ahash::AHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::types::Read;

/// Filters a read source applies while reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadQuery {
    pub min_score: f32,
    pub max_expected: f64,
    pub want_sequence: bool,
    pub want_matches: bool,
}

impl Default for ReadQuery {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_expected: f64::MAX,
            want_sequence: false,
            want_matches: true,
        }
    }
}

/// Sequential, single-pass stream of reads. A bad record yields `Err` and the
/// stream carries on with the next one.
pub trait ReadIterator: Iterator<Item = Result<Read>> {
    /// Total number of reads, if known up front.
    fn maximum(&self) -> Option<u64> {
        None
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Random access by read uid, used to fetch mates.
pub trait MateReader {
    /// Positions the reader on `uid`. Returns false if there is no such read.
    fn seek(&mut self, uid: u64) -> Result<bool>;
    /// Reads the record at the current position.
    fn read_one(&mut self) -> Result<Option<Read>>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait ReadSource {
    fn iterator(&self, query: &ReadQuery) -> Result<Box<dyn ReadIterator + '_>>;

    /// A separate reader for mate lookups, `None` if the source has no mates.
    fn mate_reader(&self) -> Result<Option<Box<dyn MateReader + '_>>>;
}

/// Cooperative cancellation flag, checked once per read.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Reads held in memory, e.g. parsed from a match file or built by tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReadSource {
    reads: Vec<Read>,
    by_uid: AHashMap<u64, usize>,
}

impl InMemoryReadSource {
    pub fn new(reads: Vec<Read>) -> Self {
        let by_uid = reads.iter().enumerate().map(|(i, r)| (r.uid, i)).collect();
        Self { reads, by_uid }
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    pub fn reads(&self) -> &[Read] {
        &self.reads
    }

    fn filtered(&self, index: usize, query: &ReadQuery) -> Read {
        let mut read = self.reads[index].clone();
        read.matches_before_filter = Some(read.matches.len());
        if query.want_matches {
            read.matches
                .retain(|m| m.bit_score >= query.min_score && m.expected <= query.max_expected);
        } else {
            read.matches.clear();
        }
        read
    }
}

struct InMemoryIterator<'a> {
    source: &'a InMemoryReadSource,
    query: ReadQuery,
    next: usize,
}

impl Iterator for InMemoryIterator<'_> {
    type Item = Result<Read>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.source.reads.len() {
            return None;
        }
        let read = self.source.filtered(self.next, &self.query);
        self.next += 1;
        Some(Ok(read))
    }
}

impl ReadIterator for InMemoryIterator<'_> {
    fn maximum(&self) -> Option<u64> {
        Some(self.source.reads.len() as u64)
    }
}

struct InMemoryMateReader<'a> {
    source: &'a InMemoryReadSource,
    query: ReadQuery,
    position: Option<usize>,
}

impl MateReader for InMemoryMateReader<'_> {
    fn seek(&mut self, uid: u64) -> Result<bool> {
        self.position = self.source.by_uid.get(&uid).copied();
        Ok(self.position.is_some())
    }

    fn read_one(&mut self) -> Result<Option<Read>> {
        Ok(self.position.map(|i| self.source.filtered(i, &self.query)))
    }
}

impl ReadSource for InMemoryReadSource {
    fn iterator(&self, query: &ReadQuery) -> Result<Box<dyn ReadIterator + '_>> {
        Ok(Box::new(InMemoryIterator {
            source: self,
            query: *query,
            next: 0,
        }))
    }

    fn mate_reader(&self) -> Result<Option<Box<dyn MateReader + '_>>> {
        if !self.reads.iter().any(|r| r.mate_uid.is_some()) {
            return Ok(None);
        }
        // mates come back unfiltered, the active match filter handles them
        Ok(Some(Box::new(InMemoryMateReader {
            source: self,
            query: ReadQuery::default(),
            position: None,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Match;

    #[test]
    fn iterator_applies_query_filters() {
        let mut bad = Match::new(2, vec![562], 10.0, 1, 50);
        bad.expected = 1.0;
        let source = InMemoryReadSource::new(vec![Read::new(7, 100, vec![Match::new(1, vec![562], 80.0, 1, 50), bad])]);
        let query = ReadQuery {
            min_score: 20.0,
            max_expected: 0.1,
            ..Default::default()
        };
        let mut it = source.iterator(&query).unwrap();
        assert_eq!(it.maximum(), Some(1));
        let read = it.next().unwrap().unwrap();
        assert_eq!(read.matches.len(), 1);
        assert_eq!(read.matches_before_filter, Some(2));
        assert!(it.next().is_none());
    }

    #[test]
    fn mate_reader_seeks_by_uid() {
        let source = InMemoryReadSource::new(vec![
            Read::new(1, 100, vec![]).with_mate(2),
            Read::new(2, 100, vec![]).with_mate(1),
        ]);
        let mut mates = source.mate_reader().unwrap().unwrap();
        assert!(mates.seek(2).unwrap());
        assert_eq!(mates.read_one().unwrap().map(|r| r.uid), Some(2));
        assert!(!mates.seek(99).unwrap());
        assert!(mates.read_one().unwrap().is_none());
    }

    #[test]
    fn no_mate_reader_without_mates() {
        let source = InMemoryReadSource::new(vec![Read::new(1, 100, vec![])]);
        assert!(source.mate_reader().unwrap().is_none());
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
