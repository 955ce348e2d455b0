//src/active_matches.rs

use crate::error::{BinningError, Result};
use crate::interval_tree::IntervalTree;
use crate::reference_cover::ReferenceCoverFilter;
use crate::types::{Match, Read};

/// Thresholds a match must pass to take part in classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveMatchParams {
    pub min_score: f32,
    /// Keep matches within this percentage of the best score; 0 disables.
    pub top_percent: f32,
    pub max_expected: f64,
    pub min_percent_identity: f32,
}

impl Default for ActiveMatchParams {
    fn default() -> Self {
        Self {
            min_score: 50.0,
            top_percent: 10.0,
            max_expected: 0.01,
            min_percent_identity: 0.0,
        }
    }
}

impl ActiveMatchParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.top_percent) {
            return Err(BinningError::config(format!(
                "top percent must be in 0..=100, got {}",
                self.top_percent
            )));
        }
        if !(0.0..=100.0).contains(&self.min_percent_identity) {
            return Err(BinningError::config(format!(
                "min percent identity must be in 0..=100, got {}",
                self.min_percent_identity
            )));
        }
        if self.max_expected < 0.0 || self.max_expected.is_nan() {
            return Err(BinningError::config("max expected must not be negative"));
        }
        if self.min_score.is_nan() {
            return Err(BinningError::config("min score is undefined"));
        }
        Ok(())
    }

    /// Long reads are filtered by the interval based algorithms themselves.
    pub fn without_top_percent(mut self) -> Self {
        self.top_percent = 0.0;
        self
    }
}

/// Selection over a read's matches, one flag per match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveMatches {
    bits: Vec<bool>,
}

impl ActiveMatches {
    pub fn with_len(len: usize) -> Self {
        Self { bits: vec![false; len] }
    }

    /// Every one of the read's matches selected.
    pub fn all(len: usize) -> Self {
        Self { bits: vec![true; len] }
    }

    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits[index] = value;
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    pub fn cardinality(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }

    /// Indices of the selected matches, ascending.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().filter(|(_, &b)| b).map(|(i, _)| i)
    }

    /// The selected matches of `read`.
    pub fn matches<'a>(&'a self, read: &'a Read) -> impl Iterator<Item = &'a Match> + 'a {
        self.iter().filter_map(move |i| read.matches.get(i))
    }
}

/// Computes the active matches of `read` for one classification.
///
/// A match is active if it carries a positive class id for the classification
/// and passes the score, expect and identity thresholds. With a positive top
/// percent, only matches scoring at least `(1 - top/100) * best` survive,
/// where `best` is taken over the matches that passed the first filter.
/// The reference cover filter, if any, runs last.
pub fn compute_active(
    read: &Read,
    classification_index: usize,
    params: &ActiveMatchParams,
    cover_filter: Option<&ReferenceCoverFilter>,
) -> ActiveMatches {
    let mut active = ActiveMatches::with_len(read.matches.len());
    let mut best_score = f32::MIN;

    for (i, m) in read.matches.iter().enumerate() {
        if m.class_id(classification_index) > 0
            && m.bit_score >= params.min_score
            && m.expected <= params.max_expected
            && m.percent_identity >= params.min_percent_identity
        {
            active.set(i, true);
            best_score = best_score.max(m.bit_score);
        }
    }

    if params.top_percent > 0.0 && params.top_percent < 100.0 && !active.is_empty() {
        let threshold = (1.0 - params.top_percent / 100.0) * best_score;
        for (i, m) in read.matches.iter().enumerate() {
            if active.get(i) && m.bit_score < threshold {
                active.set(i, false);
            }
        }
    }

    if let Some(filter) = cover_filter.filter(|f| f.is_applicable()) {
        for (i, m) in read.matches.iter().enumerate() {
            if active.get(i) && !filter.is_active(&m.reference) {
                active.set(i, false);
            }
        }
    }

    active
}

/// Whether the active matches cover at least `min_percent` of the read.
///
/// Normally a single match has to reach the fraction on its own; with
/// `use_union` the union of all active spans is measured instead.
pub fn is_read_covered(read: &Read, active: &ActiveMatches, min_percent: f32, use_union: bool) -> bool {
    if min_percent <= 0.0 {
        return true;
    }
    if read.length == 0 {
        return false;
    }
    let needed = (min_percent as f64 / 100.0) * read.length as f64;
    if use_union {
        let mut tree = IntervalTree::new();
        for m in active.matches(read) {
            let (start, end) = m.query_span();
            tree.insert(start, end, ());
        }
        tree.covered_length() as f64 >= needed
    } else {
        active
            .matches(read)
            .any(|m| m.aligned_length() as f64 >= needed)
    }
}
