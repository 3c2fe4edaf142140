// ============================================================================
// spark-observables - Array Diff
// Edit scripts between two sequences, with move detection
// ============================================================================
//
// The edit distance matrix is only filled inside a diagonal band around the
// length difference. Arrays of similar length and content then cost close
// to linear time; the worst case stays O(n * m).
//
// Move detection pairs deleted entries with added entries of equal value.
// It gives up after a run of failed compares proportional to the shorter
// array, so adversarial inputs may report a delete + add where a move was
// possible. That trade keeps the scan linear.
// ============================================================================

use crate::core::constants::MOVE_COMPARE_FACTOR;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeStatus {
    /// Present only in the new array
    Added,
    /// Present only in the old array
    Deleted,
    /// Present in both
    Retained,
}

/// One entry of an edit script.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayChange<U> {
    pub status: ChangeStatus,
    pub value: U,
    /// Index in the new array for additions, in the old array for
    /// deletions. None for retained entries.
    pub index: Option<usize>,
    /// For a moved item, the index of its counterpart entry in the other
    /// array.
    pub moved: Option<usize>,
}

impl<U> ArrayChange<U> {
    pub fn added(value: U, index: usize) -> Self {
        Self {
            status: ChangeStatus::Added,
            value,
            index: Some(index),
            moved: None,
        }
    }

    pub fn deleted(value: U, index: usize) -> Self {
        Self {
            status: ChangeStatus::Deleted,
            value,
            index: Some(index),
            moved: None,
        }
    }

    pub fn retained(value: U) -> Self {
        Self {
            status: ChangeStatus::Retained,
            value,
            index: None,
            moved: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompareOptions {
    /// Leave retained entries out of the script
    pub sparse: bool,
    /// Scan for moves without the failed-compare cap
    pub dont_limit_moves: bool,
}

// =============================================================================
// EDIT DISTANCE MATRIX
// =============================================================================

/// One matrix row, stored only inside the band.
struct BandRow {
    start: usize,
    cells: Vec<usize>,
}

impl BandRow {
    fn get(&self, column: usize) -> Option<usize> {
        column
            .checked_sub(self.start)
            .and_then(|offset| self.cells.get(offset).copied())
    }
}

// =============================================================================
// COMPARE
// =============================================================================

/// Compute the edit script turning `old` into `new`.
///
/// Entries come in sequence order, so replaying them (keep retained, drop
/// deleted, insert added) over `old` yields `new`.
///
/// # Example
///
/// ```
/// use spark_observables::{compare_arrays, ChangeStatus, CompareOptions};
///
/// let script = compare_arrays(&["a", "b", "c"], &["b", "a", "c"], CompareOptions::default());
/// let moved: Vec<_> = script
///     .iter()
///     .filter(|c| c.moved.is_some())
///     .map(|c| (c.status, c.value))
///     .collect();
/// assert_eq!(moved, vec![(ChangeStatus::Added, "b"), (ChangeStatus::Deleted, "b")]);
/// ```
pub fn compare_arrays<U: Clone + PartialEq>(
    old: &[U],
    new: &[U],
    options: CompareOptions,
) -> Vec<ArrayChange<U>> {
    if old.len() < new.len() {
        compare_small_to_big(old, new, ChangeStatus::Added, ChangeStatus::Deleted, options)
    } else {
        compare_small_to_big(new, old, ChangeStatus::Deleted, ChangeStatus::Added, options)
    }
}

/// `not_in_small` labels entries found only in `big`, `not_in_big` those
/// found only in `small`.
fn compare_small_to_big<U: Clone + PartialEq>(
    small: &[U],
    big: &[U],
    not_in_small: ChangeStatus,
    not_in_big: ChangeStatus,
    options: CompareOptions,
) -> Vec<ArrayChange<U>> {
    let compare_range = (big.len() - small.len()).max(1);
    let max_distance = small.len() + big.len() + 1;

    let mut matrix: Vec<BandRow> = Vec::with_capacity(small.len() + 1);
    for s in 0..=small.len() {
        let first = s.saturating_sub(1);
        let last = big.len().min(s + compare_range);
        let mut row = BandRow {
            start: first,
            cells: Vec::with_capacity(last + 1 - first),
        };
        for b in first..=last {
            let distance = if b == 0 {
                s + 1
            } else if s == 0 {
                b + 1
            } else if small[s - 1] == big[b - 1] {
                matrix[s - 1].get(b - 1).unwrap_or(max_distance)
            } else {
                let north = matrix[s - 1].get(b).unwrap_or(max_distance);
                let west = row.get(b - 1).unwrap_or(max_distance);
                north.min(west) + 1
            };
            row.cells.push(distance);
        }
        matrix.push(row);
    }

    // Walk back from the bottom-right corner
    let mut script = Vec::new();
    let mut only_in_big = Vec::new();
    let mut only_in_small = Vec::new();
    let (mut s, mut b) = (small.len(), big.len());
    while s > 0 || b > 0 {
        let me_minus_one = matrix[s].get(b).map(|d| d - 1);
        if b > 0 && me_minus_one.is_some() && me_minus_one == matrix[s].get(b - 1) {
            b -= 1;
            only_in_big.push(script.len());
            script.push(ArrayChange {
                status: not_in_small,
                value: big[b].clone(),
                index: Some(b),
                moved: None,
            });
        } else if s > 0 && me_minus_one.is_some() && me_minus_one == matrix[s - 1].get(b) {
            s -= 1;
            only_in_small.push(script.len());
            script.push(ArrayChange {
                status: not_in_big,
                value: small[s].clone(),
                index: Some(s),
                moved: None,
            });
        } else {
            b = b.saturating_sub(1);
            s = s.saturating_sub(1);
            if !options.sparse {
                script.push(ArrayChange::retained(big[b].clone()));
            }
        }
    }

    let limit = (!options.dont_limit_moves && !small.is_empty())
        .then(|| small.len() * MOVE_COMPARE_FACTOR);
    find_moves(&mut script, &only_in_small, &only_in_big, limit);

    // Indices into `script` are no longer needed past this point
    script.reverse();
    script
}

// =============================================================================
// MOVE DETECTION
// =============================================================================

/// Cross-link entries of `left` and `right` (indices into `changes`) that
/// carry equal values, setting each side's `moved` to the other's `index`.
///
/// Each right entry pairs at most once. With `limit`, scanning stops after
/// that many consecutive failed compares.
pub fn find_moves<U: PartialEq>(
    changes: &mut [ArrayChange<U>],
    left: &[usize],
    right: &[usize],
    limit: Option<usize>,
) {
    if left.is_empty() || right.is_empty() {
        return;
    }
    let mut right = right.to_vec();
    let mut failed_compares = 0;

    for &l in left {
        if limit.is_some_and(|max| failed_compares >= max) {
            break;
        }
        match right
            .iter()
            .position(|&r| changes[l].value == changes[r].value)
        {
            Some(position) => {
                let r = right.remove(position);
                changes[l].moved = changes[r].index;
                changes[r].moved = changes[l].index;
                failed_compares = 0;
            }
            None => failed_compares += right.len(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
