use std::collections::HashSet;

use crate::identity::ImageKey;

/// Keys present in `old` but not in `new`, in `old` order, without repeats.
///
/// Used after an edit replaces a reference list: the result is the set of
/// candidates for reference-checked deletion.
pub fn removed_keys(old: &[ImageKey], new: &[ImageKey]) -> Vec<ImageKey> {
    let kept: HashSet<&ImageKey> = new.iter().collect();
    let mut seen = HashSet::new();
    old.iter()
        .filter(|k| !kept.contains(k) && seen.insert(*k))
        .cloned()
        .collect()
}
