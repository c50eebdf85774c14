//! Merging of adjacent transfer instructions.
//!
//! Two neighbouring transfers merge when they target the same head (or neither has
//! committed to one), move the same components, and agree on multi-channel
//! eligibility. The last condition keeps a merge from promoting or demoting a
//! transfer's `can_multi` flag. A merged transfer runs its sets in order and may
//! share tips between them, subject to each policy's reuse limit.

use super::transfer::TransferInstruction;
use std::collections::BTreeSet;

fn components(transfer: &TransferInstruction) -> BTreeSet<&str> {
    transfer.params().map(|p| p.component.as_str()).collect()
}

fn width(transfer: &TransferInstruction) -> Option<usize> {
    transfer.sets.first().map(Vec::len)
}

/// Whether `next` can be appended to `prev`.
pub fn compatible(prev: &TransferInstruction, next: &TransferInstruction) -> bool {
    prev.head == next.head
        && width(prev) == width(next)
        && prev.can_multi() == next.can_multi()
        && components(prev) == components(next)
}

/// Merge each transfer into its predecessor where [`compatible`].
pub fn merge_adjacent(transfers: Vec<TransferInstruction>) -> Vec<TransferInstruction> {
    let before = transfers.len();
    let mut merged: Vec<TransferInstruction> = Vec::with_capacity(before);
    for transfer in transfers {
        let joins = merged.last().is_some_and(|prev| compatible(prev, &transfer));
        if joins {
            if let Some(prev) = merged.last_mut() {
                prev.sets.extend(transfer.sets);
            }
        } else {
            merged.push(transfer);
        }
    }
    if merged.len() < before {
        tracing::debug!("merged {} transfers into {}", before, merged.len());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::transfer::TransferParams;
    use crate::labware::{WellCoords, WellRef};
    use crate::policy::Policy;
    use crate::volume::Volume;

    fn params(component: &str, can_multi: bool) -> TransferParams {
        TransferParams {
            request_id: "r".into(),
            component: component.into(),
            liquid_class: "water".into(),
            source: WellRef::new("src", WellCoords::new(0, 0)),
            source_position: "position_4".into(),
            source_plate_type: "pcrplate".into(),
            destination: WellRef::new("dst", WellCoords::new(1, 0)),
            dest_position: "position_8".into(),
            dest_plate_type: "pcrplate".into(),
            volume: Volume::ul(10.0),
            result: None,
            policy: Policy {
                can_multi,
                ..Policy::default()
            },
        }
    }

    fn transfer(component: &str, can_multi: bool) -> TransferInstruction {
        TransferInstruction::single(vec![Some(params(component, can_multi))], None)
    }

    #[test]
    fn test_same_component_merges() {
        let merged = merge_adjacent(vec![transfer("water", true), transfer("water", true)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].sets.len(), 2);
    }

    #[test]
    fn test_eligibility_is_preserved() {
        let inputs = vec![
            transfer("water", true),
            transfer("water", false),
            transfer("water", false),
        ];
        let flags: Vec<bool> = inputs.iter().map(TransferInstruction::can_multi).collect();
        let merged = merge_adjacent(inputs);
        assert_eq!(merged.len(), 2);
        assert!(merged[0].can_multi());
        assert!(!merged[1].can_multi());
        assert_eq!(flags, vec![true, false, false]);
    }

    #[test]
    fn test_different_components_or_heads_stay_apart() {
        let mut pinned = transfer("water", true);
        pinned.head = Some(1);
        let merged = merge_adjacent(vec![
            transfer("water", true),
            transfer("dye", true),
            pinned,
        ]);
        assert_eq!(merged.len(), 3);
    }
}
