//src/taxdb.rs

use ahash::{AHashMap, AHashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{BinningError, Result};

pub type ParentMap = AHashMap<i32, i32>;
pub type NameMap = AHashMap<i32, String>;
pub type RankMap = AHashMap<i32, String>;

/// Guard against parent cycles in malformed trees.
const MAX_TREE_DEPTH: usize = 1024;

/// Read-only view of one classification's tree (taxonomy, KEGG, SEED, ...).
///
/// Handed to the assignment algorithms and the min-support filter instead of a
/// process-wide registry, so several runs can coexist.
pub trait ClassificationTreeService: Send + Sync {
    fn name(&self) -> &str;
    fn root(&self) -> i32;
    /// Parent of `id`, `None` for the root and for unknown ids.
    fn parent(&self, id: i32) -> Option<i32>;
    fn rank(&self, id: i32) -> Option<&str>;
    /// Display name of a class, if the tree carries one.
    fn class_name(&self, _id: i32) -> Option<&str> {
        None
    }
    /// Whether `id` is a node of this tree.
    fn is_known(&self, id: i32) -> bool;
    /// Nodes hidden by external policy. The min-support filter always folds them.
    fn is_disabled(&self, id: i32) -> bool;

    /// True if `a` is an ancestor of `b` or equal to it.
    fn is_ancestor(&self, a: i32, b: i32) -> bool {
        let mut node = b;
        for _ in 0..MAX_TREE_DEPTH {
            if node == a {
                return true;
            }
            match self.parent(node) {
                Some(p) if p != node => node = p,
                _ => return false,
            }
        }
        false
    }

    /// Number of edges between `id` and the root, `None` for unknown ids.
    fn depth(&self, id: i32) -> Option<usize> {
        if !self.is_known(id) {
            return None;
        }
        let mut node = id;
        let mut depth = 0;
        while let Some(p) = self.parent(node) {
            if p == node || depth >= MAX_TREE_DEPTH {
                break;
            }
            node = p;
            depth += 1;
        }
        Some(depth)
    }

    /// Path from `id` up to the root, `id` first.
    fn path_to_root(&self, id: i32) -> Vec<i32> {
        let mut path = vec![id];
        let mut node = id;
        while let Some(p) = self.parent(node) {
            if p == node || path.len() > MAX_TREE_DEPTH {
                break;
            }
            path.push(p);
            node = p;
        }
        path
    }

    /// Deepest node that is an ancestor of (or equal to) both ids.
    /// Non-positive ids are ignored: `lca(0, x) == x`.
    fn lca(&self, a: i32, b: i32) -> i32 {
        if a <= 0 || b <= 0 {
            return if a <= 0 { b } else { a };
        }
        if a == b {
            return a;
        }
        let a_anc: AHashSet<i32> = self.path_to_root(a).into_iter().collect();
        for node in self.path_to_root(b) {
            if a_anc.contains(&node) {
                return node;
            }
        }
        self.root()
    }
}

/// In-memory classification tree loaded from a taxDB file.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTree {
    name: String,
    root: i32,
    parent_map: ParentMap,
    name_map: NameMap,
    rank_map: RankMap,
    disabled: AHashSet<i32>,
}

impl ClassificationTree {
    pub fn new<S: Into<String>>(name: S, root: i32) -> Self {
        let mut parent_map = ParentMap::new();
        parent_map.insert(root, root);
        Self {
            name: name.into(),
            root,
            parent_map,
            ..Default::default()
        }
    }

    /// Adds (or replaces) a node below `parent`.
    pub fn add_node(&mut self, id: i32, parent: i32, name: &str, rank: &str) {
        self.parent_map.insert(id, parent);
        if !name.is_empty() {
            self.name_map.insert(id, name.to_string());
        }
        if !rank.is_empty() {
            self.rank_map.insert(id, rank.to_string());
        }
    }

    pub fn set_disabled<I: IntoIterator<Item = i32>>(&mut self, ids: I) {
        self.disabled = ids.into_iter().collect();
    }

    pub fn parent_map(&self) -> &ParentMap {
        &self.parent_map
    }

    pub fn name_map(&self) -> &NameMap {
        &self.name_map
    }

    pub fn rank_map(&self) -> &RankMap {
        &self.rank_map
    }

    pub fn len(&self) -> usize {
        self.parent_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent_map.is_empty()
    }

    /// Parses a taxDB file in the format:
    /// ```text
    /// <id>\t<parentid>\t<name>\t<rank>
    /// ```
    /// The root is the node that is its own parent (or whose parent is 0).
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_taxdb<P: AsRef<Path>>(classification: &str, filepath: P) -> Result<Self> {
        let file = File::open(filepath)?;
        Self::from_reader(classification, BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(classification: &str, reader: R) -> Result<Self> {
        let mut tree = ClassificationTree {
            name: classification.to_string(),
            ..Default::default()
        };
        let mut root = None;

        for (line_no, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let trimmed = line.trim_end();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            // Expecting 4 tab-separated fields: id, parentid, name, rank
            let parts: Vec<&str> = trimmed.split('\t').collect();
            if parts.len() < 2 {
                return Err(BinningError::parse(line_no + 1, "expected at least id and parent id"));
            }
            let id: i32 = parts[0]
                .trim()
                .parse()
                .map_err(|_| BinningError::parse(line_no + 1, format!("bad id '{}'", parts[0])))?;
            let parent: i32 = parts[1]
                .trim()
                .parse()
                .map_err(|_| BinningError::parse(line_no + 1, format!("bad parent id '{}'", parts[1])))?;
            if id <= 0 {
                return Err(BinningError::parse(line_no + 1, format!("class id {} is not positive", id)));
            }
            let name = parts.get(2).map(|s| s.trim()).unwrap_or("");
            let rank = parts.get(3).map(|s| s.trim()).unwrap_or("");

            if parent == id || parent == 0 {
                root = Some(id);
                tree.add_node(id, id, name, rank);
            } else {
                tree.add_node(id, parent, name, rank);
            }
        }

        tree.root = root.ok_or_else(|| BinningError::parse(0, "taxDB has no root node"))?;
        log::debug!(
            "Loaded {} nodes for classification '{}' (root {})",
            tree.parent_map.len(),
            tree.name,
            tree.root
        );
        Ok(tree)
    }
}

impl ClassificationTreeService for ClassificationTree {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> i32 {
        self.root
    }

    fn parent(&self, id: i32) -> Option<i32> {
        match self.parent_map.get(&id) {
            Some(&p) if p != id => Some(p),
            _ => None,
        }
    }

    fn rank(&self, id: i32) -> Option<&str> {
        self.rank_map.get(&id).map(|s| s.as_str())
    }

    fn class_name(&self, id: i32) -> Option<&str> {
        self.name_map.get(&id).map(|s| s.as_str())
    }

    fn is_known(&self, id: i32) -> bool {
        self.parent_map.contains_key(&id)
    }

    fn is_disabled(&self, id: i32) -> bool {
        self.disabled.contains(&id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// root(1) -> Bacteria(2) -> Firmicutes(1239) -> Bacilli(91061) -> Bacillus(1386)
    ///                        -> Proteobacteria(1224) -> E. coli(562)
    ///         -> Eukaryota(2759) -> Homo sapiens(9606)
    pub(crate) fn small_taxonomy() -> ClassificationTree {
        let text = "1\t1\troot\tno rank\n\
                    2\t1\tBacteria\tsuperkingdom\n\
                    1239\t2\tFirmicutes\tphylum\n\
                    91061\t1239\tBacilli\tclass\n\
                    1386\t91061\tBacillus\tgenus\n\
                    1224\t2\tProteobacteria\tphylum\n\
                    562\t1224\tEscherichia coli\tspecies\n\
                    2759\t1\tEukaryota\tsuperkingdom\n\
                    9606\t2759\tHomo sapiens\tspecies\n";
        ClassificationTree::from_reader("Taxonomy", Cursor::new(text)).unwrap()
    }

    #[test]
    fn parses_taxdb_lines() {
        let tree = small_taxonomy();
        assert_eq!(tree.root(), 1);
        assert_eq!(tree.len(), 9);
        assert_eq!(tree.parent(562), Some(1224));
        assert_eq!(tree.parent(1), None);
        assert_eq!(tree.rank(1239), Some("phylum"));
        assert_eq!(tree.name_map()[&9606], "Homo sapiens");
        assert!(tree.is_known(91061));
        assert!(!tree.is_known(4242));
    }

    #[test]
    fn rejects_garbage_ids() {
        let err = ClassificationTree::from_reader("Taxonomy", Cursor::new("x\t1\tfoo\tbar\n")).unwrap_err();
        assert!(matches!(err, BinningError::Parse { line: 1, .. }));
    }

    #[test]
    fn ancestry_and_depth() {
        let tree = small_taxonomy();
        assert!(tree.is_ancestor(2, 1386));
        assert!(tree.is_ancestor(1386, 1386));
        assert!(!tree.is_ancestor(1386, 2));
        assert_eq!(tree.depth(1), Some(0));
        assert_eq!(tree.depth(1386), Some(4));
        assert_eq!(tree.depth(777), None);
    }

    #[test]
    fn lca_is_common_ancestor() {
        let tree = small_taxonomy();
        assert_eq!(tree.lca(1386, 562), 2);
        assert_eq!(tree.lca(1386, 9606), 1);
        assert_eq!(tree.lca(1239, 1386), 1239);
        assert_eq!(tree.lca(562, 562), 562);
        assert_eq!(tree.lca(0, 562), 562);
        for &(a, b) in &[(1386, 562), (9606, 1224), (2, 91061)] {
            let c = tree.lca(a, b);
            assert!(tree.is_ancestor(c, a) && tree.is_ancestor(c, b));
        }
    }
}
