use std::cmp::{max, min};

/// A set of disjoint half-open intervals that can be cut down piecewise.
pub struct Intervals<T: Copy + Ord>(Vec<(T, T)>);

impl<T: Copy + Ord> Intervals<T> {
    pub fn new(l: T, r: T) -> Self {
        debug_assert!(l <= r, "invalid interval: left must be <= right");
        Intervals(vec![(l, r)])
    }

    /// Remove `[slice_l, slice_r)` from the set, returning the removed pieces.
    pub fn cut(&mut self, slice_l: T, slice_r: T) -> Vec<(T, T)> {
        if self.0.is_empty() {
            return Vec::new();
        }

        let mut remaining = Vec::new();
        let mut cut = Vec::new();
        let mut touched = false;

        for &(l, r) in &self.0 {
            if r <= slice_l || l >= slice_r {
                remaining.push((l, r));
                continue;
            }

            touched = true;
            let cut_l = max(l, slice_l);
            let cut_r = min(r, slice_r);
            if cut_l < cut_r {
                cut.push((cut_l, cut_r));
            }
            if l < cut_l {
                remaining.push((l, cut_l));
            }
            if cut_r < r {
                remaining.push((cut_r, r));
            }
        }

        if !touched {
            return Vec::new();
        }

        self.0 = remaining.into_iter().filter(|(l, r)| l < r).collect();
        cut
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn collect(self) -> Vec<(T, T)> {
        self.0
    }
}

/// Number of distinct points covered by `ranges`, overlaps counted once.
pub fn union_len(ranges: impl IntoIterator<Item = (u64, u64)>) -> u64 {
    let mut ranges: Vec<(u64, u64)> = ranges.into_iter().filter(|(l, r)| l < r).collect();
    ranges.sort_unstable();

    let mut total = 0;
    let mut current: Option<(u64, u64)> = None;
    for (l, r) in ranges {
        current = match current {
            Some((cl, cr)) if l <= cr => Some((cl, max(cr, r))),
            Some((cl, cr)) => {
                total += cr - cl;
                Some((l, r))
            }
            None => Some((l, r)),
        };
    }
    if let Some((cl, cr)) = current {
        total += cr - cl;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_keeps_both_sides() {
        let mut iv = Intervals::new(0u64, 100);
        assert_eq!(iv.cut(30, 60), vec![(30, 60)]);
        assert_eq!(iv.collect(), vec![(0, 30), (60, 100)]);
    }

    #[test]
    fn cut_outside_is_noop() {
        let mut iv = Intervals::new(10u64, 20);
        assert!(iv.cut(20, 30).is_empty());
        assert!(iv.cut(0, 10).is_empty());
        assert_eq!(iv.collect(), vec![(10, 20)]);
    }

    #[test]
    fn cut_everything() {
        let mut iv = Intervals::new(10u64, 20);
        assert_eq!(iv.cut(0, 50), vec![(10, 20)]);
        assert!(iv.is_empty());
    }

    #[test]
    fn union_len_merges_overlaps_and_touching() {
        assert_eq!(union_len(Vec::<(u64, u64)>::new()), 0);
        assert_eq!(union_len([(0, 100), (50, 150)]), 150);
        assert_eq!(union_len([(0, 10), (10, 20), (30, 35)]), 25);
        assert_eq!(union_len([(40, 50), (0, 200), (5, 5)]), 200);
    }
}
