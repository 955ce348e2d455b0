//src/read_weight.rs

use crate::error::{BinningError, Result};
use crate::interval_tree::IntervalTree;
use crate::types::Read;

/// What a read counts for in the per-class totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadAssignmentMode {
    #[default]
    ReadCount,
    /// Number of original reads a dereplicated record stands for.
    ReadMagnitude,
    ReadLength,
    /// Bases of the read covered by at least one alignment.
    AlignedBases,
}

impl ReadAssignmentMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "readcount" | "read-count" => Ok(Self::ReadCount),
            "readmagnitude" | "read-magnitude" => Ok(Self::ReadMagnitude),
            "readlength" | "read-length" => Ok(Self::ReadLength),
            "alignedbases" | "aligned-bases" => Ok(Self::AlignedBases),
            other => Err(BinningError::config(format!("unknown read assignment mode '{}'", other))),
        }
    }
}

/// Derives a read's weight from its matches.
#[derive(Debug, Default)]
pub struct ReadAssignmentCalculator {
    mode: ReadAssignmentMode,
    spans: IntervalTree<()>,
}

impl ReadAssignmentCalculator {
    pub fn new(mode: ReadAssignmentMode) -> Self {
        Self {
            mode,
            spans: IntervalTree::new(),
        }
    }

    pub fn mode(&self) -> ReadAssignmentMode {
        self.mode
    }

    pub fn compute(&mut self, read: &Read) -> f32 {
        match self.mode {
            ReadAssignmentMode::ReadCount => 1.0,
            ReadAssignmentMode::ReadMagnitude => read.magnitude.max(1) as f32,
            ReadAssignmentMode::ReadLength => read.length as f32,
            ReadAssignmentMode::AlignedBases => {
                self.spans.clear();
                for m in &read.matches {
                    let (start, end) = m.query_span();
                    self.spans.insert(start, end, ());
                }
                self.spans.covered_length() as f32
            }
        }
    }

    /// Computes and stores the weight on the read.
    pub fn assign(&mut self, read: &mut Read) -> f32 {
        read.weight = self.compute(read);
        read.weight
    }
}
