// src/report.rs

use ahash::AHashMap;
use std::fmt::Write as FmtWrite;

use crate::classify::ClassCounts;
use crate::taxdb::ClassificationTreeService;
use crate::types::{is_sentinel, sentinel_name, ClassReportRow};

/// Per-class totals for the report:
///   - weight and read count assigned to the class itself
///   - the same summed over the class and everything below it
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct ClassStats {
    pub self_weight: f64,
    pub self_count: u64,
    pub clade_weight: f64,
    pub clade_count: u64,
}

/// Build a map of `parent -> Vec<child>` covering only the observed classes
/// and their ancestors. Classes the tree does not know hang off the root.
pub fn build_children_map<I>(tree: &dyn ClassificationTreeService, ids: I) -> AHashMap<i32, Vec<i32>>
where
    I: IntoIterator<Item = i32>,
{
    let root = tree.root();
    let mut children_map: AHashMap<i32, Vec<i32>> = AHashMap::new();
    children_map.entry(root).or_default();

    for id in ids {
        if id <= 0 || id == root || children_map.contains_key(&id) {
            continue;
        }
        if !tree.is_known(id) {
            children_map.entry(id).or_default();
            children_map.entry(root).or_default().push(id);
            continue;
        }
        let path = tree.path_to_root(id);
        for pair in path.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            if children_map.contains_key(&child) {
                break;
            }
            children_map.entry(child).or_default();
            children_map.entry(parent).or_default().push(child);
        }
    }
    children_map
}

/// Initialize each `ClassStats` from the accumulated counts; clade == self at first.
pub fn init_class_stats(counts: &ClassCounts) -> AHashMap<i32, ClassStats> {
    counts
        .iter()
        .map(|(&id, c)| {
            (
                id,
                ClassStats {
                    self_weight: c.weight,
                    self_count: c.count,
                    clade_weight: c.weight,
                    clade_count: c.count,
                },
            )
        })
        .collect()
}

/// Recursively sum children's totals into the parent.
pub fn accumulate_clade_stats(
    id: i32,
    children_map: &AHashMap<i32, Vec<i32>>,
    stats_map: &mut AHashMap<i32, ClassStats>,
) -> (f64, u64) {
    let own = *stats_map.entry(id).or_default();
    let mut total_weight = own.self_weight;
    let mut total_count = own.self_count;

    if let Some(kids) = children_map.get(&id) {
        for &child in kids {
            let (w, c) = accumulate_clade_stats(child, children_map, stats_map);
            total_weight += w;
            total_count += c;
        }
    }

    if let Some(node) = stats_map.get_mut(&id) {
        node.clade_weight = total_weight;
        node.clade_count = total_count;
    }
    (total_weight, total_count)
}

/// Rows for one classification: reserved ids first, then the tree in
/// depth-first order with heavier clades first. Empty clades are left out.
pub fn build_class_report(tree: &dyn ClassificationTreeService, counts: &ClassCounts) -> Vec<ClassReportRow> {
    let total_weight: f64 = counts.values().map(|c| c.weight).sum();
    let mut rows = Vec::new();
    if total_weight <= 0.0 {
        return rows;
    }

    let mut sentinels: Vec<i32> = counts.keys().copied().filter(|&id| is_sentinel(id)).collect();
    sentinels.sort_unstable_by(|a, b| b.cmp(a));
    for id in sentinels {
        let c = counts[&id];
        rows.push(ClassReportRow {
            pct: 100.0 * c.weight / total_weight,
            clade_weight: c.weight,
            self_weight: c.weight,
            self_count: c.count,
            class_id: id,
            rank: String::new(),
            name: sentinel_name(id).unwrap_or("Reserved").to_string(),
            depth: 0,
            parent_id: None,
        });
    }

    let children_map = build_children_map(tree, counts.keys().copied());
    let mut stats_map = init_class_stats(counts);
    let root = tree.root();
    accumulate_clade_stats(root, &children_map, &mut stats_map);

    fn dfs(
        id: i32,
        parent_id: Option<i32>,
        depth: usize,
        tree: &dyn ClassificationTreeService,
        children_map: &AHashMap<i32, Vec<i32>>,
        stats_map: &AHashMap<i32, ClassStats>,
        total_weight: f64,
        rows: &mut Vec<ClassReportRow>,
    ) {
        let stats = stats_map.get(&id).copied().unwrap_or_default();
        if stats.clade_weight <= 0.0 && stats.clade_count == 0 {
            return;
        }
        rows.push(ClassReportRow {
            pct: 100.0 * stats.clade_weight / total_weight,
            clade_weight: stats.clade_weight,
            self_weight: stats.self_weight,
            self_count: stats.self_count,
            class_id: id,
            rank: tree.rank(id).unwrap_or("").to_string(),
            name: tree.class_name(id).map(str::to_string).unwrap_or_else(|| id.to_string()),
            depth,
            parent_id,
        });

        if let Some(kids) = children_map.get(&id) {
            let mut kids = kids.clone();
            kids.sort_by(|a, b| {
                let wa = stats_map.get(a).map(|s| s.clade_weight).unwrap_or(0.0);
                let wb = stats_map.get(b).map(|s| s.clade_weight).unwrap_or(0.0);
                wb.total_cmp(&wa).then(a.cmp(b))
            });
            for child in kids {
                dfs(child, Some(id), depth + 1, tree, children_map, stats_map, total_weight, rows);
            }
        }
    }

    dfs(root, None, 0, tree, &children_map, &stats_map, total_weight, &mut rows);
    rows
}

/// Text version of the rows, one line per class with names indented by depth.
pub fn format_report(rows: &[ClassReportRow]) -> String {
    let mut output = String::new();
    output.push_str("%\tcladeWeight\tselfWeight\treads\tclassID\trank\tname\n");
    for row in rows {
        let indented_name = format!("{}{}", "  ".repeat(row.depth), row.name);
        // writing into a String cannot fail
        let _ = writeln!(
            output,
            "{:.4}\t{:.2}\t{:.2}\t{}\t{}\t{}\t{}",
            row.pct, row.clade_weight, row.self_weight, row.self_count, row.class_id, row.rank, indented_name
        );
    }
    output
}
