//src/interval_tree.rs

//! Interval tree over a read's query axis.
//!
//! Intervals are closed, `[start, end]`, and kept in a start-sorted vector that
//! doubles as an implicit augmented binary tree (each node stores the largest
//! end in its subtree). The index is rebuilt lazily after inserts and removals.
//! Until [`IntervalTree::index`] has been called, queries scan linearly, so
//! results are always correct, only slower.

use ahash::AHashSet;

/// A closed interval with an attached payload.
///
/// Two intervals with the same coordinates are different entries; identity is
/// the `key` handed out by [`IntervalTree::insert`].
#[derive(Debug, Clone)]
pub struct Interval<T> {
    pub start: i32,
    pub end: i32,
    pub payload: T,
    key: usize,
    max_end: i32,
}

impl<T> Interval<T> {
    pub fn key(&self) -> usize {
        self.key
    }

    pub fn len(&self) -> u32 {
        (self.end - self.start + 1) as u32
    }

    /// Number of positions shared with `[start, end]`.
    pub fn overlap(&self, start: i32, end: i32) -> u32 {
        let lo = self.start.max(start);
        let hi = self.end.min(end);
        if hi < lo {
            0
        } else {
            (hi - lo + 1) as u32
        }
    }
}

/// Payloads that can be compared for dominance pruning.
pub trait Ranked {
    fn score(&self) -> f32;
    fn uid(&self) -> u64;
}

impl<R: Ranked + ?Sized> Ranked for &R {
    fn score(&self) -> f32 {
        (**self).score()
    }
    fn uid(&self) -> u64 {
        (**self).uid()
    }
}

#[derive(Debug, Clone)]
pub struct IntervalTree<T> {
    intervals: Vec<Interval<T>>,
    next_key: usize,
    max_level: Option<u32>,
    dirty: bool,
}

impl<T> Default for IntervalTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntervalTree<T> {
    pub fn new() -> Self {
        Self {
            intervals: Vec::new(),
            next_key: 0,
            max_level: None,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Drops every interval but keeps the allocation for the next read.
    pub fn clear(&mut self) {
        self.intervals.clear();
        self.next_key = 0;
        self.max_level = None;
        self.dirty = false;
    }

    /// Adds `[start, end]`; swapped coordinates are normalised. Returns the
    /// identity key of the new entry.
    pub fn insert(&mut self, start: i32, end: i32, payload: T) -> usize {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let key = self.next_key;
        self.next_key += 1;
        self.intervals.push(Interval {
            start,
            end,
            payload,
            key,
            max_end: end,
        });
        self.dirty = true;
        key
    }

    /// Sorts and augments the tree. Cheap when nothing changed.
    pub fn index(&mut self) {
        if !self.dirty && self.max_level.is_some() {
            return;
        }
        self.intervals
            .sort_by(|a, b| (a.start, a.end, a.key).cmp(&(b.start, b.end, b.key)));
        self.max_level = build_max_ends(&mut self.intervals);
        self.dirty = false;
    }

    /// Iterates in tree order: by start, then end, then insertion.
    /// Call [`index`](Self::index) first for that order to hold.
    pub fn iter(&self) -> impl Iterator<Item = &Interval<T>> {
        self.intervals.iter()
    }

    /// All stored intervals sharing at least one position with `[start, end]`.
    pub fn overlapping(&self, start: i32, end: i32) -> Vec<&Interval<T>> {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let mut hits = Vec::new();
        match self.max_level {
            Some(max_level) if !self.dirty => {
                self.query_indexed(start, end, max_level, &mut hits);
            }
            _ => {
                hits.extend(
                    self.intervals
                        .iter()
                        .filter(|iv| iv.start <= end && iv.end >= start),
                );
            }
        }
        hits
    }

    fn query_indexed<'a>(&'a self, start: i32, end: i32, max_level: u32, hits: &mut Vec<&'a Interval<T>>) {
        let a = &self.intervals;
        let n = a.len();
        // (node index, level, left subtree already pushed)
        let mut stack: Vec<(usize, u32, bool)> = Vec::with_capacity(64);
        stack.push(((1usize << max_level) - 1, max_level, false));
        while let Some((x, k, visited_left)) = stack.pop() {
            if k <= 3 {
                // small subtree, scan it
                let i0 = x >> k << k;
                let i1 = (i0 + (1usize << (k + 1)) - 1).min(n);
                let mut i = i0;
                while i < i1 && a[i].start <= end {
                    if a[i].end >= start {
                        hits.push(&a[i]);
                    }
                    i += 1;
                }
            } else if !visited_left {
                stack.push((x, k, true));
                let y = x - (1usize << (k - 1));
                if y >= n || a[y].max_end >= start {
                    stack.push((y, k - 1, false));
                }
            } else if x < n && a[x].start <= end {
                if a[x].end >= start {
                    hits.push(&a[x]);
                }
                stack.push((x + (1usize << (k - 1)), k - 1, false));
            }
        }
    }

    /// Removes every interval whose key is listed.
    pub fn remove_all<I: IntoIterator<Item = usize>>(&mut self, keys: I) -> usize {
        let doomed: AHashSet<usize> = keys.into_iter().collect();
        if doomed.is_empty() {
            return 0;
        }
        let before = self.intervals.len();
        self.intervals.retain(|iv| !doomed.contains(&iv.key));
        let removed = before - self.intervals.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Length of the union of all stored intervals.
    pub fn covered_length(&self) -> u64 {
        let mut spans: Vec<(i32, i32)> = self.intervals.iter().map(|iv| (iv.start, iv.end)).collect();
        spans.sort_unstable();
        let mut covered = 0u64;
        let mut current: Option<(i32, i32)> = None;
        for (s, e) in spans {
            current = match current {
                Some((cs, ce)) if s <= ce + 1 => Some((cs, ce.max(e))),
                Some((cs, ce)) => {
                    covered += (ce - cs + 1) as u64;
                    Some((s, e))
                }
                None => Some((s, e)),
            };
        }
        if let Some((cs, ce)) = current {
            covered += (ce - cs + 1) as u64;
        }
        covered
    }
}

impl<T: Clone> IntervalTree<T> {
    /// Copies all intervals of `other` into this tree under fresh keys.
    pub fn extend_from(&mut self, other: &IntervalTree<T>) {
        for iv in &other.intervals {
            self.insert(iv.start, iv.end, iv.payload.clone());
        }
    }
}

impl<T: Ranked> IntervalTree<T> {
    /// Removes every interval that is dominated by an overlapping one.
    ///
    /// J dominates I when J covers more than half of I and J scores higher,
    /// or scores the same and has the smaller uid. Victims are collected over
    /// the whole tree before anything is removed, so the outcome does not
    /// depend on visiting order. Returns the number removed.
    pub fn remove_dominated(&mut self) -> usize {
        self.index();
        let mut dominated = Vec::new();
        for iv in &self.intervals {
            let half = 0.5 * iv.len() as f64;
            let score = iv.payload.score();
            let uid = iv.payload.uid();
            let beaten = self.overlapping(iv.start, iv.end).into_iter().any(|other| {
                other.key != iv.key
                    && other.overlap(iv.start, iv.end) as f64 > half
                    && (other.payload.score() > score
                        || (other.payload.score() == score && other.payload.uid() < uid))
            });
            if beaten {
                dominated.push(iv.key);
            }
        }
        let removed = self.remove_all(dominated);
        self.index();
        removed
    }
}

/// Fills in `max_end` for the implicit tree and returns its top level.
fn build_max_ends<T>(a: &mut [Interval<T>]) -> Option<u32> {
    let n = a.len();
    if n == 0 {
        return None;
    }
    let mut last_i = 0usize;
    let mut last = a[0].end;
    for i in (0..n).step_by(2) {
        last_i = i;
        a[i].max_end = a[i].end;
        last = a[i].max_end;
    }
    let mut k = 1u32;
    while (1usize << k) <= n {
        let x = 1usize << (k - 1);
        let i0 = (x << 1) - 1;
        let step = x << 2;
        let mut i = i0;
        while i < n {
            let el = a[i - x].max_end;
            let er = if i + x < n { a[i + x].max_end } else { last };
            a[i].max_end = a[i].end.max(el).max(er);
            i += step;
        }
        last_i = if (last_i >> k) & 1 != 0 { last_i - x } else { last_i + x };
        if last_i < n && a[last_i].max_end > last {
            last = a[last_i].max_end;
        }
        k += 1;
    }
    Some(k - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Hit {
        score: f32,
        uid: u64,
    }

    impl Ranked for Hit {
        fn score(&self) -> f32 {
            self.score
        }
        fn uid(&self) -> u64 {
            self.uid
        }
    }

    fn hit(score: f32, uid: u64) -> Hit {
        Hit { score, uid }
    }

    fn brute_force(spans: &[(i32, i32)], s: i32, e: i32) -> Vec<usize> {
        spans
            .iter()
            .enumerate()
            .filter(|(_, &(a, b))| a <= e && b >= s)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn indexed_query_matches_linear_scan() {
        let mut spans = Vec::new();
        let mut seed = 17u64;
        for _ in 0..300 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let start = (seed >> 33) as i32 % 5000;
            let len = ((seed >> 17) as i32 % 400).abs() + 1;
            spans.push((start, start + len));
        }
        let mut tree = IntervalTree::new();
        for (i, &(s, e)) in spans.iter().enumerate() {
            assert_eq!(tree.insert(s, e, i), i);
        }
        tree.index();
        for &(qs, qe) in &[(0, 10), (100, 2000), (4990, 6000), (2500, 2500), (-50, -1)] {
            let mut got: Vec<usize> = tree.overlapping(qs, qe).iter().map(|iv| iv.payload).collect();
            got.sort_unstable();
            assert_eq!(got, brute_force(&spans, qs, qe), "query {}-{}", qs, qe);
        }
    }

    #[test]
    fn equal_coordinates_are_kept_apart() {
        let mut tree = IntervalTree::new();
        let a = tree.insert(10, 20, "a");
        let b = tree.insert(10, 20, "b");
        assert_ne!(a, b);
        assert_eq!(tree.overlapping(15, 15).len(), 2);
        assert_eq!(tree.remove_all([a]), 1);
        let left: Vec<_> = tree.overlapping(0, 100).iter().map(|iv| iv.payload).collect();
        assert_eq!(left, vec!["b"]);
    }

    #[test]
    fn covered_length_is_union() {
        let mut tree = IntervalTree::new();
        tree.insert(1, 10, ());
        tree.insert(5, 15, ());
        tree.insert(16, 20, ());
        tree.insert(30, 31, ());
        assert_eq!(tree.covered_length(), 22);
        assert_eq!(IntervalTree::<()>::new().covered_length(), 0);
    }

    #[test]
    fn higher_score_dominates_large_overlap() {
        let mut tree = IntervalTree::new();
        tree.insert(10, 100, hit(80.0, 2));
        tree.insert(15, 95, hit(60.0, 1));
        assert_eq!(tree.remove_dominated(), 1);
        let left: Vec<f32> = tree.iter().map(|iv| iv.payload.score).collect();
        assert_eq!(left, vec![80.0]);
    }

    #[test]
    fn small_overlap_keeps_both() {
        let mut tree = IntervalTree::new();
        tree.insert(1, 100, hit(80.0, 1));
        tree.insert(90, 200, hit(60.0, 2));
        assert_eq!(tree.remove_dominated(), 0);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn equal_score_keeps_smaller_uid() {
        let mut tree = IntervalTree::new();
        tree.insert(10, 50, hit(42.0, 9));
        tree.insert(10, 50, hit(42.0, 3));
        tree.remove_dominated();
        let left: Vec<u64> = tree.iter().map(|iv| iv.payload.uid).collect();
        assert_eq!(left, vec![3]);
    }

    #[test]
    fn pruning_is_idempotent() {
        let mut tree = IntervalTree::new();
        let layout = [(1, 50, 10.0), (5, 60, 12.0), (55, 120, 9.0), (58, 118, 9.0), (200, 260, 1.0), (30, 210, 5.0)];
        for (uid, &(s, e, score)) in layout.iter().enumerate() {
            tree.insert(s, e, hit(score, uid as u64));
        }
        tree.remove_dominated();
        let once: Vec<u64> = tree.iter().map(|iv| iv.payload.uid).collect();
        assert_eq!(tree.remove_dominated(), 0);
        let twice: Vec<u64> = tree.iter().map(|iv| iv.payload.uid).collect();
        assert_eq!(once, twice);
    }
}
