//src/contaminants.rs

use ahash::AHashSet;
use std::sync::Arc;

use crate::active_matches::ActiveMatches;
use crate::taxdb::ClassificationTreeService;
use crate::types::Read;

/// Decides whether a read comes from a contaminant taxon.
pub trait ContaminantOracle: Send + Sync {
    /// Long reads are judged by their assigned taxon.
    fn is_contaminant_long_read(&self, tax_id: i32) -> bool;
    /// Short reads are judged by their active taxonomy matches.
    fn is_contaminant_short_read(&self, read: &Read, active: &ActiveMatches, taxonomy_index: usize) -> bool;
}

/// A list of contaminant taxa; everything in their clades counts as contaminant.
pub struct ContaminantManager {
    tree: Arc<dyn ClassificationTreeService>,
    contaminants: AHashSet<i32>,
}

impl ContaminantManager {
    pub fn new<I: IntoIterator<Item = i32>>(tree: Arc<dyn ClassificationTreeService>, tax_ids: I) -> Self {
        let contaminants: AHashSet<i32> = tax_ids
            .into_iter()
            .filter(|&id| {
                let known = tree.is_known(id);
                if !known {
                    log::warn!("Ignoring unknown contaminant taxon {}", id);
                }
                known
            })
            .collect();
        Self { tree, contaminants }
    }

    pub fn len(&self) -> usize {
        self.contaminants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contaminants.is_empty()
    }

    fn in_contaminant_clade(&self, tax_id: i32) -> bool {
        tax_id > 0
            && self
                .tree
                .path_to_root(tax_id)
                .iter()
                .any(|id| self.contaminants.contains(id))
    }
}

impl ContaminantOracle for ContaminantManager {
    fn is_contaminant_long_read(&self, tax_id: i32) -> bool {
        self.in_contaminant_clade(tax_id)
    }

    fn is_contaminant_short_read(&self, read: &Read, active: &ActiveMatches, taxonomy_index: usize) -> bool {
        active
            .matches(read)
            .any(|m| self.in_contaminant_clade(m.class_id(taxonomy_index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxdb::tests::small_taxonomy;
    use crate::types::Match;

    fn manager() -> ContaminantManager {
        ContaminantManager::new(Arc::new(small_taxonomy()), [9606, 31337])
    }

    #[test]
    fn unknown_taxa_are_dropped() {
        assert_eq!(manager().len(), 1);
    }

    #[test]
    fn long_read_by_clade() {
        let cm = manager();
        assert!(cm.is_contaminant_long_read(9606));
        assert!(!cm.is_contaminant_long_read(2759));
        assert!(!cm.is_contaminant_long_read(562));
        assert!(!cm.is_contaminant_long_read(0));
    }

    #[test]
    fn short_read_by_any_active_match() {
        let cm = manager();
        let read = Read::new(
            1,
            150,
            vec![Match::new(1, vec![562], 100.0, 1, 150), Match::new(2, vec![9606], 70.0, 1, 150)],
        );
        assert!(cm.is_contaminant_short_read(&read, &ActiveMatches::all(2), 0));
        let mut only_first = ActiveMatches::with_len(2);
        only_first.set(0, true);
        assert!(!cm.is_contaminant_short_read(&read, &only_first, 0));
    }
}
