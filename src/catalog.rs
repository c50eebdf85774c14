//! Built-in hardware and labware definitions.
//!
//! These mirror a common benchtop configuration: Gilson-style tips, a single-channel
//! and an eight-channel head, SBS-format plates and troughs, and a nine-position deck.
//! Scenario files and tests start from [`standard_deck`] and add their own plates.

use crate::deck::{Deck, Inventory, Preferences};
use crate::hardware::{Adaptor, ChannelParams, Head, Orientation, TipSpec};
use crate::labware::{Labware, Plate, Station, TipBox, TipWaste};
use crate::volume::Volume;

pub const TIP_20: &str = "Gilson20";
pub const TIP_200: &str = "Gilson200";
pub const TIP_1000: &str = "Gilson1000";

/// Tips per standard box (8 x 12).
pub const TIPS_PER_BOX: usize = 96;

/// Tip waste capacity in tips.
pub const TIP_WASTE_CAPACITY: usize = 700;

pub fn tip_20() -> TipSpec {
    TipSpec {
        manufacturer: "Gilson".into(),
        ..TipSpec::new(TIP_20, Volume::ul(0.5), Volume::ul(20.0))
    }
}

pub fn tip_200() -> TipSpec {
    TipSpec {
        manufacturer: "Gilson".into(),
        ..TipSpec::new(TIP_200, Volume::ul(1.0), Volume::ul(200.0))
    }
}

pub fn tip_1000() -> TipSpec {
    TipSpec {
        manufacturer: "Gilson".into(),
        ..TipSpec::new(TIP_1000, Volume::ul(100.0), Volume::ul(1000.0))
    }
}

/// Look up a catalog tip by type name.
pub fn tip_by_type(tip_type: &str) -> Option<TipSpec> {
    match tip_type {
        TIP_20 => Some(tip_20()),
        TIP_200 => Some(tip_200()),
        TIP_1000 => Some(tip_1000()),
        _ => None,
    }
}

pub fn single_channel_head() -> Head {
    Head::new(
        "single",
        ChannelParams {
            name: "P1000 single".into(),
            min_volume: Volume::ul(0.5),
            max_volume: Volume::ul(1000.0),
            min_rate: 0.1,
            max_rate: 500.0,
            multi: 1,
            independent: false,
            orientation: Orientation::Vertical,
        },
    )
    .with_adaptor(Adaptor {
        name: "DF30".into(),
        manufacturer: "Gilson".into(),
    })
}

pub fn eight_channel_head() -> Head {
    Head::new(
        "eight",
        ChannelParams {
            name: "P200 8-channel".into(),
            min_volume: Volume::ul(0.5),
            max_volume: Volume::ul(200.0),
            min_rate: 0.1,
            max_rate: 300.0,
            multi: 8,
            independent: false,
            orientation: Orientation::Vertical,
        },
    )
    .with_adaptor(Adaptor {
        name: "DL10".into(),
        manufacturer: "Gilson".into(),
    })
}

pub fn pcr_plate_96(name: &str) -> Plate {
    Plate::new(name, "pcrplate", 8, 12, Volume::ul(200.0), Volume::ul(5.0))
}

pub fn deep_well_96(name: &str) -> Plate {
    Plate::new(name, "deepwell96", 8, 12, Volume::ul(2000.0), Volume::ul(50.0))
}

pub fn plate_384(name: &str) -> Plate {
    Plate::new(name, "greiner384", 16, 24, Volume::ul(100.0), Volume::ul(5.0))
}

/// Single-row trough with twelve channels.
pub fn trough_12(name: &str) -> Plate {
    Plate::new(name, "trough12", 1, 12, Volume::ml(15.0), Volume::ul(500.0))
}

/// Single-well reservoir.
pub fn reservoir(name: &str) -> Plate {
    Plate::new(name, "reservoir", 1, 1, Volume::ml(300.0), Volume::ml(1.0))
}

/// Plate constructor for a catalog type name.
pub fn plate_by_type(plate_type: &str, name: &str) -> Option<Plate> {
    match plate_type {
        "pcrplate" => Some(pcr_plate_96(name)),
        "deepwell96" => Some(deep_well_96(name)),
        "greiner384" => Some(plate_384(name)),
        "trough12" => Some(trough_12(name)),
        "reservoir" => Some(reservoir(name)),
        _ => None,
    }
}

pub fn tip_box(tip: TipSpec) -> TipBox {
    let name = format!("{} box", tip.tip_type);
    TipBox::new(name, tip, 8, 12)
}

pub fn tip_waste() -> TipWaste {
    TipWaste::new("tipwaste", TIP_WASTE_CAPACITY)
}

/// An empty nine-position deck with wash and waste stations, both heads loaded and
/// every catalog tip type stocked in the inventory. Nothing is placed besides the tip
/// waste and the stations.
pub fn bare_deck() -> Deck {
    let mut layout: Vec<String> = (1..=9).map(|i| format!("position_{i}")).collect();
    layout.push("wash".into());
    layout.push("waste".into());

    let mut deck = Deck::new("benchtop", layout);
    deck.model = "nine-position".into();
    deck.add_head(single_channel_head(), true);
    deck.add_head(eight_channel_head(), true);
    deck.tips = vec![tip_20(), tip_200(), tip_1000()];
    deck.preferences = Preferences {
        tips: vec!["position_2".into(), "position_3".into(), "position_7".into()],
        inputs: vec!["position_4".into(), "position_5".into(), "position_6".into()],
        outputs: vec!["position_8".into(), "position_9".into()],
        tip_waste: vec!["position_1".into()],
        wash: vec!["wash".into()],
        waste: vec!["waste".into()],
    };
    deck.inventory = Inventory::new()
        .with_tip_box(tip_box(tip_20()))
        .with_tip_box(tip_box(tip_200()))
        .with_tip_box(tip_box(tip_1000()));

    // Positions come from the layout above, so placement cannot collide.
    let fixed = [
        ("position_1", Labware::TipWaste(tip_waste())),
        ("wash", Labware::Wash(Station::new("wash"))),
        ("waste", Labware::Waste(Station::new("waste"))),
    ];
    for (position, labware) in fixed {
        if let Err(e) = deck.place(position, labware) {
            tracing::error!("standard layout placement failed: {}", e);
        }
    }
    deck
}

/// [`bare_deck`] plus one 200 ul tip box in the first tip position.
pub fn standard_deck() -> Deck {
    let mut deck = bare_deck();
    if let Err(e) = deck.add_tip_box("position_2", tip_box(tip_200())) {
        tracing::error!("standard layout placement failed: {}", e);
    }
    deck
}
