//! Physical tip inventory: picking up clean tips and discarding dirty ones.
//!
//! Tip acquisition walks the tip-box positions in preference order. When no box can
//! serve the requested channel layout the search is retried a bounded number of times:
//!
//! 1. one refresh pass over the boxes already on deck (depleted boxes are restored
//!    only when `refresh_depleted_tip_boxes` is set),
//! 2. up to `max_tip_box_allocations` new boxes from the deck inventory, each placed
//!    at the first free tip position,
//!
//! after which the request fails.

use crate::config::PlannerSettings;
use crate::deck::Deck;
use crate::error::{PlanError, PlanResult};
use crate::labware::WellCoords;
use std::collections::BTreeMap;

/// Tips picked up for one tip type.
#[derive(Debug, Clone, PartialEq)]
pub struct TipPickup {
    pub head: usize,
    pub tip_type: String,
    pub position: String,
    pub tip_box_id: String,
    /// Slot taken for each channel of the head.
    pub wells: Vec<Option<WellCoords>>,
    pub mask: Vec<bool>,
}

/// Tips discarded from a head.
#[derive(Debug, Clone, PartialEq)]
pub struct TipDrop {
    pub head: usize,
    pub position: String,
    pub mask: Vec<bool>,
}

/// Search the tip positions for a box of `tip_type` that can serve `mask`.
fn find_in_boxes(
    deck: &Deck,
    tip_type: &str,
    mask: &[bool],
    head: usize,
) -> PlanResult<Option<(String, Vec<Option<WellCoords>>)>> {
    let params = &deck.head(head)?.params;
    for position in &deck.preferences.tips {
        let Some(tip_box) = deck.tip_box_at(position) else {
            continue;
        };
        if tip_box.tip.tip_type != tip_type {
            continue;
        }
        if let Some(wells) = tip_box.find_tips(mask, params.orientation, params.independent) {
            return Ok(Some((position.clone(), wells)));
        }
    }
    Ok(None)
}

/// The refresh pass: restore depleted boxes of `tip_type` when allowed.
fn refresh_boxes(deck: &mut Deck, tip_type: &str, settings: &PlannerSettings) {
    if !settings.refresh_depleted_tip_boxes {
        return;
    }
    let positions = deck.preferences.tips.clone();
    for position in positions {
        if let Some(tip_box) = deck.tip_box_at_mut(&position) {
            if tip_box.tip.tip_type == tip_type && tip_box.is_depleted() {
                tracing::info!("refilling depleted tip box at {}", position);
                tip_box.refill();
            }
        }
    }
}

/// Place a fresh box of `tip_type` from the inventory.
fn allocate_box(deck: &mut Deck, tip_type: &str) -> PlanResult<String> {
    let tip_box = deck.inventory.new_tip_box(tip_type).ok_or_else(|| {
        PlanError::NoTipAvailable(format!("no {tip_type} tips on deck or in inventory"))
    })?;
    let position = deck
        .free_position(&deck.preferences.tips)
        .ok_or_else(|| PlanError::NoDeckSpace(format!("no free position for a {tip_type} box")))?;
    tracing::warn!("adding new {} tip box at {}", tip_type, position);
    deck.add_tip_box(&position, tip_box)?;
    Ok(position)
}

fn acquire(
    deck: &mut Deck,
    head: usize,
    tip_type: &str,
    mask: &[bool],
    settings: &PlannerSettings,
) -> PlanResult<(String, Vec<Option<WellCoords>>)> {
    if let Some(found) = find_in_boxes(deck, tip_type, mask, head)? {
        return Ok(found);
    }
    refresh_boxes(deck, tip_type, settings);
    if let Some(found) = find_in_boxes(deck, tip_type, mask, head)? {
        return Ok(found);
    }
    for _ in 0..settings.max_tip_box_allocations {
        allocate_box(deck, tip_type)?;
        if let Some(found) = find_in_boxes(deck, tip_type, mask, head)? {
            return Ok(found);
        }
    }
    Err(PlanError::NoTipAvailable(format!(
        "no {tip_type} tips fit the channel layout of head {head}"
    )))
}

/// Load clean tips on `head`. `tip_types[i]` names the tip channel `i` needs.
///
/// Channels needing the same tip type are served together so a multi-channel head
/// picks them up in one motion.
pub fn get_clean_tips(
    deck: &mut Deck,
    head: usize,
    tip_types: &[Option<String>],
    settings: &PlannerSettings,
) -> PlanResult<Vec<TipPickup>> {
    let mut subsets: BTreeMap<&str, Vec<bool>> = BTreeMap::new();
    for (channel, tip_type) in tip_types.iter().enumerate() {
        if let Some(tip_type) = tip_type {
            let mask = subsets
                .entry(tip_type.as_str())
                .or_insert_with(|| vec![false; tip_types.len()]);
            mask[channel] = true;
        }
    }

    let mut pickups = Vec::with_capacity(subsets.len());
    for (tip_type, mask) in subsets {
        let (position, wells) = acquire(deck, head, tip_type, &mask, settings)?;
        let slots: Vec<WellCoords> = wells.iter().flatten().copied().collect();
        let (tip_box_id, tip) = {
            let tip_box = deck.tip_box_at_mut(&position).ok_or_else(|| {
                PlanError::Internal(format!("tip box vanished from {position}"))
            })?;
            tip_box.take_tips(&slots)?;
            (tip_box.id.clone(), tip_box.tip.clone())
        };
        deck.head_mut(head)?.load_tips(&mask, &tip);
        tracing::debug!(
            "head {} loaded {} {} tips from {}",
            head,
            slots.len(),
            tip_type,
            position
        );
        pickups.push(TipPickup {
            head,
            tip_type: tip_type.to_string(),
            position,
            tip_box_id,
            wells,
            mask,
        });
    }
    Ok(pickups)
}

/// Discard every tip on `head` into the first tip waste that can take them all.
///
/// Returns `None` when the head carries no tips.
pub fn drop_dirty_tips(deck: &mut Deck, head: usize) -> PlanResult<Option<TipDrop>> {
    let needed = deck.head(head)?.tip_count();
    if needed == 0 {
        return Ok(None);
    }
    let positions = deck.preferences.tip_waste.clone();
    for position in positions {
        if let Some(waste) = deck.tip_waste_at_mut(&position) {
            if waste.can_accept(needed) {
                waste.dispose(needed)?;
                let mask = deck.head_mut(head)?.unload_tips();
                return Ok(Some(TipDrop {
                    head,
                    position,
                    mask,
                }));
            }
        }
    }
    Err(PlanError::NoTipWasteCapacity { needed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    fn settings() -> PlannerSettings {
        PlannerSettings::default()
    }

    #[test]
    fn test_pickup_consumes_tips() {
        let mut deck = catalog::standard_deck();
        let types = vec![Some(catalog::TIP_200.to_string())];
        let pickups = get_clean_tips(&mut deck, 0, &types, &settings()).unwrap();
        assert_eq!(pickups.len(), 1);
        assert_eq!(pickups[0].position, "position_2");
        assert_eq!(deck.tip_box_at("position_2").unwrap().tips_left(), 95);
        assert_eq!(deck.head(0).unwrap().tip_count(), 1);
    }

    #[test]
    fn test_missing_type_allocates_from_inventory() {
        let mut deck = catalog::standard_deck();
        let types = vec![Some(catalog::TIP_20.to_string())];
        let pickups = get_clean_tips(&mut deck, 0, &types, &settings()).unwrap();
        assert_eq!(pickups[0].position, "position_3");
        assert_eq!(deck.tip_box_count(), 2);
    }

    #[test]
    fn test_type_absent_everywhere_fails() {
        let mut deck = catalog::standard_deck();
        let types = vec![Some("Rainin10".to_string())];
        let err = get_clean_tips(&mut deck, 0, &types, &settings()).unwrap_err();
        assert!(matches!(err, PlanError::NoTipAvailable(_)));
    }

    #[test]
    fn test_full_deck_reports_no_space() {
        let mut deck = catalog::standard_deck();
        for pos in ["position_3", "position_7"] {
            deck.add_tip_box(pos, catalog::tip_box(catalog::tip_200())).unwrap();
        }
        let types = vec![Some(catalog::TIP_1000.to_string())];
        let err = get_clean_tips(&mut deck, 0, &types, &settings()).unwrap_err();
        assert!(matches!(err, PlanError::NoDeckSpace(_)));
    }

    #[test]
    fn test_refresh_restores_depleted_box_when_enabled() {
        let mut deck = catalog::standard_deck();
        let all: Vec<WellCoords> = (0..12)
            .flat_map(|x| (0..8).map(move |y| WellCoords::new(x, y)))
            .collect();
        deck.tip_box_at_mut("position_2").unwrap().take_tips(&all).unwrap();
        let mut s = settings();
        s.refresh_depleted_tip_boxes = true;
        let types = vec![Some(catalog::TIP_200.to_string())];
        let pickups = get_clean_tips(&mut deck, 0, &types, &s).unwrap();
        assert_eq!(pickups[0].position, "position_2");
        assert_eq!(deck.tip_box_count(), 1);
    }

    #[test]
    fn test_eight_channel_pickup_takes_a_column() {
        let mut deck = catalog::standard_deck();
        let types = vec![Some(catalog::TIP_200.to_string()); 8];
        let pickups = get_clean_tips(&mut deck, 1, &types, &settings()).unwrap();
        assert!(pickups[0].wells.iter().all(|w| w.map(|c| c.x) == Some(0)));
        assert_eq!(deck.head(1).unwrap().tip_count(), 8);
    }

    #[test]
    fn test_drop_requires_capacity() {
        let mut deck = catalog::standard_deck();
        let types = vec![Some(catalog::TIP_200.to_string()); 8];
        get_clean_tips(&mut deck, 1, &types, &settings()).unwrap();
        deck.tip_waste_at_mut("position_1").unwrap().contents = 695;
        let err = drop_dirty_tips(&mut deck, 1).unwrap_err();
        assert!(matches!(err, PlanError::NoTipWasteCapacity { needed: 8 }));

        deck.tip_waste_at_mut("position_1").unwrap().empty();
        let dropped = drop_dirty_tips(&mut deck, 1).unwrap().unwrap();
        assert_eq!(dropped.mask, vec![true; 8]);
        assert!(drop_dirty_tips(&mut deck, 1).unwrap().is_none());
    }
}
