//src/types.rs

use crate::error::{BinningError, Result};

// Reserved class ids. Real taxonomy and function ids are always positive.
pub const NOHITS_ID: i32 = -1;
pub const UNASSIGNED_ID: i32 = -2;
pub const LOW_COMPLEXITY_ID: i32 = -3;
pub const CONTAMINANTS_ID: i32 = -6;

/// True for the reserved negative ids above.
pub fn is_sentinel(class_id: i32) -> bool {
    class_id < 0
}

pub fn sentinel_name(class_id: i32) -> Option<&'static str> {
    match class_id {
        NOHITS_ID => Some("No hits"),
        UNASSIGNED_ID => Some("Not assigned"),
        LOW_COMPLEXITY_ID => Some("Low complexity"),
        CONTAMINANTS_ID => Some("Contaminants"),
        _ => None,
    }
}

/// One alignment of a read against a reference sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Unique id, used to break score ties.
    pub uid: u64,
    /// Class id per classification index, 0 if the reference has none.
    pub class_ids: Vec<i32>,
    pub bit_score: f32,
    pub expected: f64,
    pub percent_identity: f32,
    /// Aligned part of the read. `query_start > query_end` marks the reverse strand.
    pub query_start: i32,
    pub query_end: i32,
    pub reference: String,
    pub ref_start: i32,
    pub ref_end: i32,
    pub ref_length: u32,
}

impl Match {
    pub fn new(uid: u64, class_ids: Vec<i32>, bit_score: f32, query_start: i32, query_end: i32) -> Self {
        Self {
            uid,
            class_ids,
            bit_score,
            expected: 0.0,
            percent_identity: 100.0,
            query_start,
            query_end,
            reference: String::new(),
            ref_start: 0,
            ref_end: 0,
            ref_length: 0,
        }
    }

    /// Class id for the given classification, 0 if none was recorded.
    #[inline]
    pub fn class_id(&self, classification_index: usize) -> i32 {
        self.class_ids.get(classification_index).copied().unwrap_or(0)
    }

    #[inline]
    pub fn is_reverse(&self) -> bool {
        self.query_start > self.query_end
    }

    /// Query span with the orientation removed, so that `start <= end`.
    #[inline]
    pub fn query_span(&self) -> (i32, i32) {
        if self.is_reverse() {
            (self.query_end, self.query_start)
        } else {
            (self.query_start, self.query_end)
        }
    }

    /// Number of read positions covered by this alignment.
    pub fn aligned_length(&self) -> u32 {
        let (start, end) = self.query_span();
        (end - start + 1) as u32
    }

    /// Reference span with `start <= end`.
    pub fn ref_span(&self) -> (i32, i32) {
        if self.ref_start > self.ref_end {
            (self.ref_end, self.ref_start)
        } else {
            (self.ref_start, self.ref_end)
        }
    }
}

/// One sequenced fragment together with all of its alignments.
#[derive(Debug, Clone, PartialEq)]
pub struct Read {
    pub uid: u64,
    pub name: String,
    pub mate_uid: Option<u64>,
    pub length: u32,
    /// Effective copy count, set once by the read weight calculator.
    pub weight: f32,
    /// Number of original reads this record stands for (1 unless dereplicated).
    pub magnitude: u32,
    /// Sequence complexity score, `None` when it was not computed.
    pub complexity: Option<f32>,
    pub matches: Vec<Match>,
    /// Match count before a source dropped matches by score or expect.
    /// `None` when `matches` is the full list.
    pub matches_before_filter: Option<usize>,
}

impl Read {
    pub fn new(uid: u64, length: u32, matches: Vec<Match>) -> Self {
        Self {
            uid,
            name: uid.to_string(),
            mate_uid: None,
            length,
            weight: 1.0,
            magnitude: 1,
            complexity: None,
            matches,
            matches_before_filter: None,
        }
    }

    pub fn with_mate(mut self, mate_uid: u64) -> Self {
        self.mate_uid = Some(mate_uid);
        self
    }

    pub fn with_complexity(mut self, complexity: f32) -> Self {
        self.complexity = Some(complexity);
        self
    }

    /// True if the read aligned anywhere at all, including matches a source
    /// filtered out.
    pub fn has_any_matches(&self) -> bool {
        self.matches_before_filter.unwrap_or(self.matches.len()) > 0
    }

    /// Checks the match fields the classifiers rely on.
    pub fn validate(&self) -> Result<()> {
        for m in &self.matches {
            if !m.bit_score.is_finite() {
                return Err(BinningError::data(
                    self.uid,
                    format!("match {} has non-finite bit score", m.uid),
                ));
            }
            if m.expected.is_nan() || m.percent_identity.is_nan() {
                return Err(BinningError::data(
                    self.uid,
                    format!("match {} has undefined expect or identity", m.uid),
                ));
            }
            if m.query_start < 0 || m.query_end < 0 {
                return Err(BinningError::data(
                    self.uid,
                    format!("match {} has negative query coordinates", m.uid),
                ));
            }
        }
        Ok(())
    }
}

/// One emitted assignment tuple: a read (or one segment of it) with its
/// weight and a class id per classification.
///
/// A class id of 0 in an extra-segment tuple means that classification has
/// nothing to add for the segment.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAssignment {
    pub read_uid: u64,
    pub weight: f32,
    pub class_ids: Vec<i32>,
    /// False for the primary tuple of a read, true for multi-gene extras.
    pub extra: bool,
}

/// A structured representation of one row in a per-class report.
#[derive(Debug, Clone)]
pub struct ClassReportRow {
    pub pct: f64,
    pub clade_weight: f64,
    pub self_weight: f64,
    pub self_count: u64,
    pub class_id: i32,
    pub rank: String,
    pub name: String,
    /// Distance from the root, used to indent names.
    pub depth: usize,
    pub parent_id: Option<i32>,
}
