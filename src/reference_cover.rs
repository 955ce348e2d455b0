//src/reference_cover.rs

use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;

use crate::error::{BinningError, Result};
use crate::interval_tree::IntervalTree;
use crate::source::{CancellationToken, ReadQuery, ReadSource};

/// Aligned spans collected for one reference sequence.
#[derive(Debug, Default, Clone)]
pub struct ReferenceSpans {
    pub length: u32,
    pub spans: Vec<(i32, i32)>,
}

/// Drops matches to references that are poorly covered across the whole
/// dataset, i.e. where the union of all aligned reference spans is below
/// `min_percent_to_cover` of the reference length.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCoverFilter {
    min_percent_to_cover: f32,
    covered_refs: AHashSet<String>,
}

impl ReferenceCoverFilter {
    pub fn new(min_percent_to_cover: f32) -> Result<Self> {
        if !(0.0..=100.0).contains(&min_percent_to_cover) {
            return Err(BinningError::config(format!(
                "min percent of reference to cover must be in 0..=100, got {}",
                min_percent_to_cover
            )));
        }
        Ok(Self {
            min_percent_to_cover,
            covered_refs: AHashSet::new(),
        })
    }

    pub fn is_applicable(&self) -> bool {
        self.min_percent_to_cover > 0.0
    }

    pub fn is_active(&self, reference: &str) -> bool {
        !self.is_applicable() || self.covered_refs.contains(reference)
    }

    pub fn covered_count(&self) -> usize {
        self.covered_refs.len()
    }

    /// One pass over `source` collecting reference spans, then the coverage
    /// of each reference is computed in parallel.
    pub fn compute<S: ReadSource + ?Sized>(
        &mut self,
        source: &S,
        query: &ReadQuery,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.is_applicable() {
            return Ok(());
        }
        let mut spans: AHashMap<String, ReferenceSpans> = AHashMap::new();
        let mut it = source.iterator(query)?;
        while let Some(item) = it.next() {
            if cancel.is_cancelled() {
                it.close()?;
                return Err(BinningError::Cancelled);
            }
            let read = match item {
                Ok(read) => read,
                Err(e) => {
                    log::warn!("Reference cover pass skipped a read: {}", e);
                    continue;
                }
            };
            for m in read.matches {
                if m.reference.is_empty() || m.ref_length == 0 {
                    continue;
                }
                let entry = spans.entry(m.reference.clone()).or_default();
                entry.length = entry.length.max(m.ref_length);
                entry.spans.push(m.ref_span());
            }
        }
        it.close()?;
        self.set_spans(spans);
        Ok(())
    }

    /// Replaces the covered set from already collected spans.
    pub fn set_spans(&mut self, spans: AHashMap<String, ReferenceSpans>) {
        let min_percent = self.min_percent_to_cover as f64;
        let total = spans.len();
        let spans: Vec<(String, ReferenceSpans)> = spans.into_iter().collect();
        let covered: Vec<String> = spans
            .into_par_iter()
            .filter(|(_, rs)| {
                let mut tree = IntervalTree::new();
                for &(s, e) in &rs.spans {
                    tree.insert(s, e, ());
                }
                100.0 * tree.covered_length() as f64 >= min_percent * rs.length as f64
            })
            .map(|(name, _)| name)
            .collect();
        self.covered_refs = covered.into_iter().collect();
        log::info!(
            "Reference cover filter: {} of {} references are covered to {}%",
            self.covered_refs.len(),
            total,
            self.min_percent_to_cover
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryReadSource;
    use crate::types::{Match, Read};

    fn aligned(uid: u64, reference: &str, ref_start: i32, ref_end: i32) -> Match {
        let mut m = Match::new(uid, vec![562], 100.0, 1, 50);
        m.reference = reference.to_string();
        m.ref_start = ref_start;
        m.ref_end = ref_end;
        m.ref_length = 1000;
        m
    }

    #[test]
    fn keeps_only_well_covered_references() {
        let source = InMemoryReadSource::new(vec![
            Read::new(1, 100, vec![aligned(1, "refA", 1, 400), aligned(2, "refB", 1, 100)]),
            Read::new(2, 100, vec![aligned(3, "refA", 600, 301)]),
        ]);
        let mut filter = ReferenceCoverFilter::new(50.0).unwrap();
        filter
            .compute(&source, &ReadQuery::default(), &CancellationToken::new())
            .unwrap();
        assert_eq!(filter.covered_count(), 1);
        assert!(filter.is_active("refA"));
        assert!(!filter.is_active("refB"));
    }

    #[test]
    fn zero_percent_accepts_everything() {
        let filter = ReferenceCoverFilter::new(0.0).unwrap();
        assert!(!filter.is_applicable());
        assert!(filter.is_active("anything"));
        assert!(ReferenceCoverFilter::new(120.0).is_err());
    }

    #[test]
    fn honours_cancellation() {
        let source = InMemoryReadSource::new(vec![Read::new(1, 100, vec![aligned(1, "refA", 1, 400)])]);
        let mut filter = ReferenceCoverFilter::new(10.0).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = filter.compute(&source, &ReadQuery::default(), &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }
}
