//! Posting list intersection.
//!
//! Both co-occurrence and per-pool class statistics reduce to the same
//! primitive: walk the documents two lists share. Lists written by the
//! segment builder are id-sorted and take the merge path; anything else
//! falls back to a hash probe.

use ahash::AHashMap;

use crate::codec::Posting;
use crate::memory::MemHandle;

/// What an intersection observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overlap {
    /// Number of shared ids.
    pub df: u32,
    /// Sum of the left list's `tf` over the shared ids.
    pub tf: u64,
}

/// Intersect `left` with `right`, summing `left`'s term frequencies.
pub fn intersect(left: &[Posting], right: &[Posting]) -> Overlap {
    let mut overlap = Overlap::default();
    for_each_shared(left, right, |hit| {
        overlap.df += 1;
        overlap.tf += hit.tf as u64;
    });
    overlap
}

/// Number of ids `left` and `right` share.
pub fn intersect_count(left: &[Posting], right: &[Posting]) -> u32 {
    let mut count = 0;
    for_each_shared(left, right, |_| count += 1);
    count
}

/// Intersect the list saved on `mem`'s stack with its current list.
///
/// Returns `None` when nothing was pushed.
pub fn intersect_saved(mem: &MemHandle) -> Option<Overlap> {
    mem.saved_and_current()
        .map(|(saved, current)| intersect(saved, current))
}

fn is_sorted(list: &[Posting]) -> bool {
    list.windows(2).all(|w| w[0].id < w[1].id)
}

fn for_each_shared<F>(left: &[Posting], right: &[Posting], mut visit: F)
where
    F: FnMut(&Posting),
{
    if left.is_empty() || right.is_empty() {
        return;
    }

    if is_sorted(left) && is_sorted(right) {
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            match left[i].id.cmp(&right[j].id) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    visit(&left[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        return;
    }

    let mut remaining: AHashMap<u32, usize> = AHashMap::with_capacity(right.len());
    for posting in right {
        *remaining.entry(posting.id).or_insert(0) += 1;
    }
    for posting in left {
        if let Some(count) = remaining.get_mut(&posting.id)
            && *count > 0
        {
            *count -= 1;
            visit(posting);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[(u32, u32)]) -> Vec<Posting> {
        ids.iter().map(|&(id, tf)| Posting::new(id, tf)).collect()
    }

    #[test]
    fn test_sorted_merge() {
        let left = list(&[(1, 2), (3, 1), (5, 4), (9, 1)]);
        let right = list(&[(0, 1), (3, 1), (5, 1), (8, 1)]);
        assert_eq!(intersect(&left, &right), Overlap { df: 2, tf: 5 });
        assert_eq!(intersect_count(&right, &left), 2);
    }

    #[test]
    fn test_unsorted_fallback_matches_merge() {
        let left = list(&[(9, 1), (1, 2), (5, 4), (3, 1)]);
        let right = list(&[(5, 1), (0, 1), (3, 1)]);
        assert_eq!(intersect(&left, &right), Overlap { df: 2, tf: 5 });
    }

    #[test]
    fn test_empty_sides() {
        assert_eq!(intersect(&[], &list(&[(1, 1)])), Overlap::default());
        assert_eq!(intersect_count(&list(&[(1, 1)]), &[]), 0);
    }
}
