//! Edit scripts between two sequences of element keys.
//!
//! Alignment is a longest common subsequence of what is left after trimming
//! the common prefix and suffix, found with Hunt-Szymanski over the matching
//! positions. Among equally long alignments the one starting earliest in the
//! old sequence wins. Elements present on both sides but outside the
//! alignment are not removed and re-inserted; they survive and are placed by
//! a single reorder.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Above this many equal `(old, new)` position pairs the alignment is
/// skipped and survivors are paired greedily. The script stays correct but
/// may carry a reorder an alignment would have avoided.
const MAX_MATCH_PAIRS: usize = 1 << 20;

/// Changes turning `old` into `new`, applied in field order: removals,
/// then the reorder, then insertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditScript {
    /// Indices into `old`, descending, so each removal leaves the indices
    /// of the remaining removals valid.
    pub removed: Vec<usize>,
    /// After removals, element `i` of the result is survivor `permutation[i]`.
    /// `None` when the survivors are already in order.
    pub permutation: Option<Vec<usize>>,
    /// Indices into `new`, ascending. Inserting in this order puts every
    /// element at its final index.
    pub inserted: Vec<usize>,
}

impl EditScript {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.permutation.is_none() && self.inserted.is_empty()
    }

    /// Number of operations the script expands to.
    pub fn op_count(&self) -> usize {
        self.removed.len() + usize::from(self.permutation.is_some()) + self.inserted.len()
    }

    /// Replays the script on `old`, taking inserted elements from `new`.
    pub fn apply<T: Clone>(&self, old: &[T], new: &[T]) -> Vec<T> {
        let mut items = old.to_vec();
        for &index in &self.removed {
            items.remove(index);
        }
        if let Some(permutation) = &self.permutation {
            items = permutation.iter().map(|&i| items[i].clone()).collect();
        }
        for &index in &self.inserted {
            items.insert(index, new[index].clone());
        }
        items
    }
}

/// Computes the edit script turning `old` into `new`.
///
/// Runs in time and memory linear in the input plus the number of equal
/// position pairs between the untrimmed middles.
///
/// ```
/// use uisync::diff::edit_script;
///
/// let script = edit_script(&["a", "b"], &["a", "c", "b"]);
/// assert!(script.removed.is_empty());
/// assert_eq!(script.inserted, vec![1]);
/// ```
pub fn edit_script<K: Hash + Eq>(old: &[K], new: &[K]) -> EditScript {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let mut old_target: Vec<Option<usize>> = vec![None; old.len()];
    let mut new_taken = vec![false; new.len()];
    let mut pair = |o: usize, n: usize| {
        old_target[o] = Some(n);
        new_taken[n] = true;
    };

    for i in 0..prefix {
        pair(i, i);
    }
    for k in 1..=suffix {
        pair(old.len() - k, new.len() - k);
    }
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];
    for (o, n) in lcs_pairs(old_mid, new_mid) {
        pair(prefix + o, prefix + n);
    }

    // Moved elements: equal on both sides but outside the alignment. Each
    // takes the earliest free new position holding the same key.
    let mut free: HashMap<&K, VecDeque<usize>> = HashMap::new();
    for (n, item) in new.iter().enumerate() {
        if !new_taken[n] {
            free.entry(item).or_default().push_back(n);
        }
    }
    for (o, item) in old.iter().enumerate() {
        if old_target[o].is_some() {
            continue;
        }
        if let Some(n) = free.get_mut(item).and_then(VecDeque::pop_front) {
            old_target[o] = Some(n);
            new_taken[n] = true;
        }
    }

    let removed = (0..old.len()).rev().filter(|&o| old_target[o].is_none()).collect();
    let targets: Vec<usize> = old_target.iter().flatten().copied().collect();
    let mut order: Vec<usize> = (0..targets.len()).collect();
    order.sort_by_key(|&s| targets[s]);
    let permutation = if order.iter().enumerate().all(|(i, &s)| i == s) {
        None
    } else {
        Some(order)
    };
    let inserted = (0..new.len()).filter(|&n| !new_taken[n]).collect();

    EditScript {
        removed,
        permutation,
        inserted,
    }
}

struct Link {
    old: usize,
    new: usize,
    prev: Option<usize>,
}

/// LCS alignment as `(old_index, new_index)` pairs, ascending.
///
/// Both sides are walked back to front, so the chain left standing at the
/// longest length is the one that starts earliest in `a`.
fn lcs_pairs<K: Hash + Eq>(a: &[K], b: &[K]) -> Vec<(usize, usize)> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut positions: HashMap<&K, Vec<usize>> = HashMap::new();
    for (j, item) in b.iter().enumerate() {
        positions.entry(item).or_default().push(j);
    }
    let matches: usize = a
        .iter()
        .map(|item| positions.get(item).map_or(0, Vec::len))
        .sum();
    if matches > MAX_MATCH_PAIRS {
        tracing::debug!(
            old = a.len(),
            new = b.len(),
            matches,
            "Too many equal pairs for alignment, pairing greedily"
        );
        return Vec::new();
    }

    let last = b.len() - 1;
    let mut links: Vec<Link> = Vec::with_capacity(matches);
    // tails[k]: smallest reversed new index ending a common subsequence of
    // length k + 1; heads[k] is the link that ends it.
    let mut tails: Vec<usize> = Vec::new();
    let mut heads: Vec<usize> = Vec::new();
    for i in (0..a.len()).rev() {
        let Some(js) = positions.get(&a[i]) else {
            continue;
        };
        // Ascending original index is descending reversed index, which keeps
        // one old element from extending its own chain.
        for &j in js {
            let rj = last - j;
            let k = tails.partition_point(|&t| t < rj);
            let prev = k.checked_sub(1).map(|p| heads[p]);
            links.push(Link { old: i, new: j, prev });
            let link = links.len() - 1;
            if k == tails.len() {
                tails.push(rj);
                heads.push(link);
            } else {
                tails[k] = rj;
                heads[k] = link;
            }
        }
    }

    let mut pairs = Vec::with_capacity(heads.len());
    let mut cursor = heads.last().copied();
    while let Some(at) = cursor {
        let link = &links[at];
        pairs.push((link.old, link.new));
        cursor = link.prev;
    }
    pairs
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_insert_in_middle() {
        let script = edit_script(&['a', 'b'], &['a', 'c', 'b']);
        assert_eq!(
            script,
            EditScript {
                removed: vec![],
                permutation: None,
                inserted: vec![1],
            }
        );
    }

    #[test]
    fn test_removals_are_descending() {
        let script = edit_script(&[1, 2, 3, 4, 5], &[1, 3, 5]);
        assert_eq!(script.removed, vec![3, 1]);
        assert_eq!(script.op_count(), 2);
    }

    #[test]
    fn test_swap_is_one_reorder() {
        let old = ['a', 'b', 'c'];
        let new = ['c', 'b', 'a'];
        let script = edit_script(&old, &new);
        assert!(script.removed.is_empty());
        assert!(script.inserted.is_empty());
        assert_eq!(script.op_count(), 1);
        assert_eq!(script.apply(&old, &new), new.to_vec());
    }

    #[test]
    fn test_leftmost_alignment_on_ties() {
        // Both [x] alignments are minimal; the earlier old element is kept.
        let script = edit_script(&['x', 'y', 'x'], &['x']);
        assert_eq!(script.removed, vec![2, 1]);
    }

    #[test]
    fn test_leftmost_alignment_inside_middle() {
        let script = edit_script(&['a', 'x', 'b', 'x', 'c'], &['x', 'd']);
        assert_eq!(script.removed, vec![4, 3, 2, 0]);
        assert_eq!(script.inserted, vec![1]);
        assert!(script.permutation.is_none());
    }

    #[test]
    fn test_large_reordered_list() {
        let n = 50_000u32;
        let old: Vec<u32> = (0..n).collect();
        let reversed: Vec<u32> = old.iter().rev().copied().collect();
        let script = edit_script(&old, &reversed);
        assert!(script.removed.is_empty());
        assert!(script.inserted.is_empty());
        assert_eq!(script.op_count(), 1);
        assert_eq!(script.apply(&old, &reversed), reversed);

        // Scattered, with one element dropped and one added.
        let mut shuffled: Vec<u32> = (0..n).map(|i| (i * 7919) % n).filter(|&v| v != 17).collect();
        shuffled.push(n);
        let script = edit_script(&old, &shuffled);
        assert_eq!(script.removed, vec![17]);
        assert_eq!(script.inserted, vec![shuffled.len() - 1]);
        assert_eq!(script.apply(&old, &shuffled), shuffled);
    }

    #[test]
    fn test_dense_duplicates_pair_greedily() {
        // 1500 zeros and 1500 ones per side: too many equal pairs to align.
        let mut old: Vec<u8> = vec![2];
        old.extend((0..3000).map(|i| (i % 2) as u8));
        let mut new: Vec<u8> = (0..3000).map(|i| (i % 2) as u8).collect();
        new.push(2);
        let script = edit_script(&old, &new);
        assert!(script.removed.is_empty());
        assert!(script.inserted.is_empty());
        assert_eq!(script.op_count(), 1);
        assert_eq!(script.apply(&old, &new), new);
    }

    #[test]
    fn test_identical_sequences_yield_nothing() {
        assert!(edit_script(&[1, 2, 3], &[1, 2, 3]).is_empty());
        assert!(edit_script::<u8>(&[], &[]).is_empty());
    }

    proptest! {
        #[test]
        fn prop_script_reconstructs_target(
            old in proptest::collection::vec(0u8..6, 0..12),
            new in proptest::collection::vec(0u8..6, 0..12),
        ) {
            let script = edit_script(&old, &new);
            prop_assert_eq!(script.apply(&old, &new), new.clone());
            prop_assert!(script.removed.windows(2).all(|w| w[0] > w[1]));
            prop_assert!(script.inserted.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(script.op_count() <= old.len() + new.len());
        }

        #[test]
        fn prop_equal_sequences_are_empty(items in proptest::collection::vec(0u8..6, 0..12)) {
            prop_assert!(edit_script(&items, &items).is_empty());
        }
    }
}
