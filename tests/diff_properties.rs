//! Property-based tests for array diffing
//!
//! Uses proptest to verify:
//! 1. Replaying an edit script over the old array yields the new array
//! 2. Added and deleted entries point at their value in the right array
//! 3. Move links pair equal values across the two arrays
//! 4. Sparse scripts are full scripts minus retained entries

use proptest::prelude::*;
use spark_observables::{compare_arrays, ArrayChange, ChangeStatus, CompareOptions};

/// Small alphabets force plenty of repeats and moves
fn values() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..4, 0..20)
}

fn replay(old: &[u8], script: &[ArrayChange<u8>]) -> Vec<u8> {
    let mut result = old.to_vec();
    let mut position = 0;
    for change in script {
        match change.status {
            ChangeStatus::Retained => position += 1,
            ChangeStatus::Deleted => {
                result.remove(position);
            }
            ChangeStatus::Added => {
                result.insert(position, change.value);
                position += 1;
            }
        }
    }
    result
}

fn count(script: &[ArrayChange<u8>], status: ChangeStatus) -> usize {
    script.iter().filter(|c| c.status == status).count()
}

// ============================================================================
// Edit script
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: the script transforms old into new
    #[test]
    fn script_replays_to_new_array(old in values(), new in values()) {
        let script = compare_arrays(&old, &new, CompareOptions::default());
        prop_assert_eq!(replay(&old, &script), new);
    }

    /// Property: every entry is accounted for exactly once
    #[test]
    fn script_covers_both_arrays(old in values(), new in values()) {
        let script = compare_arrays(&old, &new, CompareOptions::default());
        let retained = count(&script, ChangeStatus::Retained);
        prop_assert_eq!(retained + count(&script, ChangeStatus::Deleted), old.len());
        prop_assert_eq!(retained + count(&script, ChangeStatus::Added), new.len());
    }

    /// Property: indices point at the entry's value
    #[test]
    fn indices_locate_values(old in values(), new in values()) {
        let script = compare_arrays(&old, &new, CompareOptions::default());
        for change in &script {
            match change.status {
                ChangeStatus::Added => {
                    let index = change.index.expect("added entries carry an index");
                    prop_assert_eq!(new[index], change.value);
                }
                ChangeStatus::Deleted => {
                    let index = change.index.expect("deleted entries carry an index");
                    prop_assert_eq!(old[index], change.value);
                }
                ChangeStatus::Retained => prop_assert_eq!(change.index, None),
            }
        }
    }

    /// Property: a move links an addition to a deletion of the same value
    #[test]
    fn moves_link_equal_values(old in values(), new in values()) {
        let script = compare_arrays(
            &old,
            &new,
            CompareOptions { dont_limit_moves: true, ..Default::default() },
        );
        for change in &script {
            let Some(counterpart) = change.moved else { continue };
            match change.status {
                ChangeStatus::Added => prop_assert_eq!(old[counterpart], change.value),
                ChangeStatus::Deleted => prop_assert_eq!(new[counterpart], change.value),
                ChangeStatus::Retained => prop_assert!(false, "retained entries never move"),
            }
            let linked = script.iter().any(|other| {
                other.status != change.status
                    && other.index == Some(counterpart)
                    && other.moved == change.index
            });
            prop_assert!(linked, "move links are symmetric");
        }
    }

    /// Property: sparse output drops retained entries and nothing else
    #[test]
    fn sparse_drops_only_retained(old in values(), new in values()) {
        let full = compare_arrays(&old, &new, CompareOptions::default());
        let sparse = compare_arrays(&old, &new, CompareOptions { sparse: true, ..Default::default() });
        let expected: Vec<_> = full
            .into_iter()
            .filter(|c| c.status != ChangeStatus::Retained)
            .collect();
        prop_assert_eq!(sparse, expected);
    }

    /// Property: comparing an array with itself changes nothing
    #[test]
    fn identity_is_all_retained(items in values()) {
        let script = compare_arrays(&items, &items, CompareOptions::default());
        prop_assert_eq!(script.len(), items.len());
        prop_assert!(script.iter().all(|c| c.status == ChangeStatus::Retained));
    }
}

// ============================================================================
// Fixed cases
// ============================================================================

#[test]
fn rotation_reports_single_move() {
    let script = compare_arrays(&[1, 2, 3, 4], &[2, 3, 4, 1], CompareOptions::default());
    let moved: Vec<_> = script
        .iter()
        .filter(|c| c.moved.is_some())
        .map(|c| (c.status, c.value, c.index, c.moved))
        .collect();
    assert_eq!(
        moved,
        vec![
            (ChangeStatus::Deleted, 1, Some(0), Some(3)),
            (ChangeStatus::Added, 1, Some(3), Some(0)),
        ]
    );
}

#[test]
fn works_with_non_copy_values() {
    let old = vec!["alpha".to_string(), "beta".to_string()];
    let new = vec!["beta".to_string(), "gamma".to_string()];
    let script = compare_arrays(&old, &new, CompareOptions { sparse: true, ..Default::default() });
    assert_eq!(
        script,
        vec![
            ArrayChange::deleted("alpha".to_string(), 0),
            ArrayChange::added("gamma".to_string(), 1),
        ]
    );
}
