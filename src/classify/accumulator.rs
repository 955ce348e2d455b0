//src/classify/accumulator.rs

use ahash::AHashMap;

use super::min_support::ReassignmentMap;
use crate::error::Result;
use crate::types::ReadAssignment;

/// Unweighted and weighted totals for one class.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ClassCount {
    pub count: u64,
    pub weight: f64,
}

impl ClassCount {
    pub fn merge(&mut self, other: ClassCount) {
        self.count += other.count;
        self.weight += other.weight;
    }
}

pub type ClassCounts = AHashMap<i32, ClassCount>;

/// Per-classification class totals built up during a run, plus (optionally)
/// every emitted tuple so class ids can be rewritten after the min-support pass.
#[derive(Debug, Clone, Default)]
pub struct UpdateAccumulator {
    classification_names: Vec<String>,
    counts: Vec<ClassCounts>,
    assignments: Vec<ReadAssignment>,
    keep_assignments: bool,
}

impl UpdateAccumulator {
    pub fn new(classification_names: Vec<String>, keep_assignments: bool) -> Self {
        let counts = vec![ClassCounts::new(); classification_names.len()];
        Self {
            classification_names,
            counts,
            assignments: Vec::new(),
            keep_assignments,
        }
    }

    pub fn classification_names(&self) -> &[String] {
        &self.classification_names
    }

    pub fn number_of_classifications(&self) -> usize {
        self.classification_names.len()
    }

    pub fn index_of(&self, classification: &str) -> Option<usize> {
        self.classification_names.iter().position(|n| n == classification)
    }

    /// Adds one tuple. Zero entries (nothing to say for that classification)
    /// are skipped.
    pub fn add(&mut self, read_uid: u64, weight: f32, class_ids: &[i32], extra: bool) {
        for (counts, &id) in self.counts.iter_mut().zip(class_ids) {
            if id == 0 {
                continue;
            }
            let entry = counts.entry(id).or_default();
            entry.count += 1;
            entry.weight += weight as f64;
        }
        if self.keep_assignments {
            self.assignments.push(ReadAssignment {
                read_uid,
                weight,
                class_ids: class_ids.to_vec(),
                extra,
            });
        }
    }

    pub fn counts(&self, classification_index: usize) -> &ClassCounts {
        &self.counts[classification_index]
    }

    pub(crate) fn counts_mut(&mut self) -> &mut Vec<ClassCounts> {
        &mut self.counts
    }

    pub fn weight_of(&self, classification_index: usize, class_id: i32) -> f64 {
        self.counts[classification_index]
            .get(&class_id)
            .map(|c| c.weight)
            .unwrap_or(0.0)
    }

    /// Weight that went to real classes (positive ids).
    pub fn assigned_weight(&self, classification_index: usize) -> f64 {
        self.counts[classification_index]
            .iter()
            .filter(|(&id, _)| id > 0)
            .map(|(_, c)| c.weight)
            .sum()
    }

    pub fn total_weight(&self, classification_index: usize) -> f64 {
        self.counts[classification_index].values().map(|c| c.weight).sum()
    }

    pub fn assignments(&self) -> &[ReadAssignment] {
        &self.assignments
    }

    /// Rewrites stored tuples after classes were folded away. The class
    /// totals themselves are moved by the min-support filter.
    pub fn apply_reassignments(&mut self, classification_index: usize, map: &ReassignmentMap) {
        if map.is_empty() {
            return;
        }
        for assignment in &mut self.assignments {
            if let Some(id) = assignment.class_ids.get_mut(classification_index) {
                if let Some(&new_id) = map.get(id) {
                    *id = new_id;
                }
            }
        }
    }
}

/// Receives the result of a completed run. Never called for cancelled runs.
pub trait UpdateSink {
    fn consume(&mut self, accumulator: UpdateAccumulator, reassignments: Vec<ReassignmentMap>) -> Result<()>;
}

/// Keeps the result in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    pub accumulator: Option<UpdateAccumulator>,
    pub reassignments: Vec<ReassignmentMap>,
}

impl UpdateSink for InMemorySink {
    fn consume(&mut self, accumulator: UpdateAccumulator, reassignments: Vec<ReassignmentMap>) -> Result<()> {
        self.accumulator = Some(accumulator);
        self.reassignments = reassignments;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc() -> UpdateAccumulator {
        UpdateAccumulator::new(vec!["Taxonomy".to_string(), "KEGG".to_string()], true)
    }

    #[test]
    fn sums_per_classification() {
        let mut a = acc();
        a.add(1, 1.0, &[562, 100], false);
        a.add(2, 2.5, &[562, -2], false);
        a.add(2, 0.5, &[0, 200], true);
        assert_eq!(a.counts(0)[&562], ClassCount { count: 2, weight: 3.5 });
        assert!(!a.counts(0).contains_key(&0));
        assert_eq!(a.weight_of(1, 200), 0.5);
        assert_eq!(a.assigned_weight(1), 1.5);
        assert_eq!(a.total_weight(1), 4.0);
        assert_eq!(a.assignments().len(), 3);
        assert_eq!(a.index_of("KEGG"), Some(1));
    }

    #[test]
    fn rewrites_tuples_through_map() {
        let mut a = acc();
        a.add(1, 1.0, &[562, 100], false);
        a.add(2, 1.0, &[1386, 100], false);
        let map: ReassignmentMap = [(562, 2)].into_iter().collect();
        a.apply_reassignments(0, &map);
        let ids: Vec<i32> = a.assignments().iter().map(|t| t.class_ids[0]).collect();
        assert_eq!(ids, vec![2, 1386]);
    }

    #[test]
    fn tuples_are_optional() {
        let mut a = UpdateAccumulator::new(vec!["Taxonomy".to_string()], false);
        a.add(1, 1.0, &[562], false);
        assert!(a.assignments().is_empty());
        assert_eq!(a.counts(0).len(), 1);
    }
}
