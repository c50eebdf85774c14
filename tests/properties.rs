//! Property tests for the planning primitives.

use liquid_planner::catalog;
use liquid_planner::hardware::Orientation;
use liquid_planner::instruction::{merge_adjacent, TransferInstruction, TransferParams};
use liquid_planner::planner::{
    group_parallel, match_components, ComponentRequest, MatchOptions, PendingGrid,
    PendingRequest, SourcePool,
};
use liquid_planner::policy::{Condition, PolicyOverrides, PolicyQuery, Rule};
use liquid_planner::volume::split_volume;
use liquid_planner::{Liquid, LiquidType, Policy, RuleSet, Volume, WellCoords, WellRef};
use proptest::prelude::*;
use std::collections::BTreeSet;

const EPS: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn arb_wells(max: usize) -> impl Strategy<Value = BTreeSet<(usize, usize)>> {
    prop::collection::btree_set((0usize..12, 0usize..8), 1..max)
}

fn params(component: &str, can_multi: bool) -> TransferParams {
    TransferParams {
        request_id: "r".into(),
        component: component.into(),
        liquid_class: "water".into(),
        source: WellRef::new("src", WellCoords::new(0, 0)),
        source_position: "position_4".into(),
        source_plate_type: "pcrplate".into(),
        destination: WellRef::new("dst", WellCoords::new(0, 0)),
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

fn rules_in_order(priorities: &[i32], reversed: bool) -> RuleSet {
    let mut rules = RuleSet::default();
    let mut entries: Vec<(String, f64, i32)> = priorities
        .iter()
        .enumerate()
        .map(|(i, p)| (format!("rule_{i}"), 10.0 * (i + 1) as f64, *p))
        .collect();
    if reversed {
        entries.reverse();
    }
    for (name, speed, priority) in entries {
        let overrides = PolicyOverrides {
            aspirate_speed: Some(speed),
            ..Default::default()
        };
        rules
            .add_policy_rule(
                Rule::new(name.clone(), name)
                    .with_priority(priority)
                    .when(Condition::category("LIQUIDCLASS", "water")),
                overrides,
            )
            .unwrap();
    }
    rules
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Split parts are equal, within range and add back up to the input.
    #[test]
    fn split_parts_fit_and_conserve(ul in 1.0f64..2000.0) {
        let (min, max) = (Volume::ul(1.0), Volume::ul(200.0));
        let parts = split_volume(Volume::ul(ul), min, max, EPS).unwrap();
        let expected = ((ul - EPS) / 200.0).ceil().max(1.0) as usize;
        prop_assert_eq!(parts.len(), expected);
        for part in &parts {
            prop_assert!(!part.less_than(min, EPS));
            prop_assert!(!part.greater_than(max, EPS));
            prop_assert!(part.approx_eq(parts[0], EPS));
        }
        let total: Volume = parts.iter().sum();
        prop_assert!(total.approx_eq(Volume::ul(ul), 1e-6 * ul.max(1.0)));
    }

    /// Resolution depends on priorities and names, never on registration order.
    #[test]
    fn resolve_ignores_registration_order(
        priorities in prop::collection::vec(-3i32..3, 1..6),
        volume in 1.0f64..500.0,
    ) {
        let query = PolicyQuery::default()
            .with_liquid_class("water")
            .with_volume(volume);
        let forward = rules_in_order(&priorities, false).resolve(&query);
        let backward = rules_in_order(&priorities, true).resolve(&query);
        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(forward.clone(), rules_in_order(&priorities, false).resolve(&query));
    }

    /// Matched draws cover the request exactly, none is below the minimum volume, and
    /// the pool is debited by the draws plus one carry volume per draw.
    #[test]
    fn matcher_conserves_volume(
        first in 20.0f64..190.0,
        second in 20.0f64..190.0,
        fraction in 0.05f64..1.0,
    ) {
        let mut deck = catalog::standard_deck();
        let mut plate = catalog::pcr_plate_96("src");
        for (x, ul) in [(0, first), (1, second)] {
            plate
                .add_liquid(
                    WellCoords::new(x, 0),
                    Liquid::new("water", LiquidType::Water, Volume::ul(ul)),
                    EPS,
                )
                .unwrap();
        }
        deck.add_plate("position_4", plate).unwrap();

        let opts = MatchOptions {
            multi: 1,
            orientation: Orientation::Vertical,
            independent: true,
            ignore_instances: false,
            carry: Volume::ul(0.5),
            min_volume: Volume::ul(0.5),
            eps: EPS,
        };
        let mut pool = SourcePool::from_deck(&deck, EPS);
        let before = pool.total();
        // Leave room for a carry volume and a minimum stroke per well.
        let ceiling = before.as_ul() - 2.0 * (0.5 + 0.5);
        let want = Volume::ul((ceiling * fraction).max(1.0));
        let request = vec![Some(ComponentRequest::new("water", want))];

        let matched = match_components(&deck, &mut pool, &request, &opts).unwrap();
        for draw in matched.iter().flat_map(|m| m.draws.iter().flatten()) {
            prop_assert!(!draw.volume.less_than(opts.min_volume, EPS));
        }
        let drawn: Volume = matched.iter().map(|m| m.total()).sum();
        let draws: usize = matched.iter().map(|m| m.count()).sum();
        prop_assert!(drawn.approx_eq(want, 1e-3));
        let debited = before - pool.total();
        prop_assert!(debited.approx_eq(want + Volume::ul(0.5) * draws as f64, 1e-3));
    }

    /// Contiguous grouping claims each request at most once, never exceeds the head
    /// width and leaves no gaps inside a group.
    #[test]
    fn contiguous_groups_are_gapless(wells in arb_wells(40)) {
        let mut grid = PendingGrid::new(8, 12);
        for (x, y) in &wells {
            grid.push(
                WellCoords::new(*x, *y),
                PendingRequest { id: format!("{x}:{y}"), volume: Volume::ul(10.0) },
            );
        }
        let groups = group_parallel(&mut grid, 8, Orientation::Vertical, true, EPS);

        let mut seen = BTreeSet::new();
        for group in &groups {
            prop_assert_eq!(group.len(), 8);
            let active: Vec<usize> = group
                .iter()
                .enumerate()
                .filter_map(|(i, id)| id.as_ref().map(|_| i))
                .collect();
            prop_assert!(!active.is_empty());
            let span = active[active.len() - 1] - active[0] + 1;
            prop_assert_eq!(span, active.len());
            for id in group.iter().flatten() {
                prop_assert!(seen.insert(id.clone()), "{} claimed twice", id);
            }
        }
        prop_assert_eq!(seen.len() + grid.len(), wells.len());
    }

    /// Merging keeps every set and never mixes multi-channel eligibility.
    #[test]
    fn merge_preserves_sets_and_eligibility(
        shapes in prop::collection::vec((prop::bool::ANY, prop::bool::ANY), 1..12),
    ) {
        let transfers: Vec<TransferInstruction> = shapes
            .iter()
            .map(|(dye, can_multi)| {
                let component = if *dye { "dye" } else { "water" };
                TransferInstruction::single(vec![Some(params(component, *can_multi))], None)
            })
            .collect();
        let merged = merge_adjacent(transfers);
        let sets: usize = merged.iter().map(|t| t.sets.len()).sum();
        prop_assert_eq!(sets, shapes.len());
        for transfer in &merged {
            let flags: BTreeSet<bool> = transfer.params().map(|p| p.policy.can_multi).collect();
            prop_assert_eq!(flags.len(), 1);
            let components: BTreeSet<&str> =
                transfer.params().map(|p| p.component.as_str()).collect();
            prop_assert_eq!(components.len(), 1);
        }
    }
}
