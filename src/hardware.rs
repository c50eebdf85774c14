//! Pipetting hardware descriptors: channels, heads, adaptors and tip types.
//!
//! These are catalog data. A [`Head`] carries mutable state only for the tips it
//! currently holds; everything else is copied along with the deck.

use crate::volume::Volume;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the channels of a multi-channel head are laid out over a plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Channels run down a column (one channel per row).
    #[default]
    Vertical,
    /// Channels run along a row (one channel per column).
    Horizontal,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Vertical => f.write_str("vertical"),
            Orientation::Horizontal => f.write_str("horizontal"),
        }
    }
}

/// Operating envelope of a (possibly multi-) channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub name: String,
    pub min_volume: Volume,
    pub max_volume: Volume,
    /// Plunger flow-rate range in ul/s.
    pub min_rate: f64,
    pub max_rate: f64,
    /// Number of physical tips operated together.
    pub multi: usize,
    /// Whether channels can address non-contiguous wells.
    pub independent: bool,
    pub orientation: Orientation,
}

impl ChannelParams {
    /// True if the tip's volume range lies within this channel's range.
    pub fn accepts_tip(&self, tip: &TipSpec) -> bool {
        tip.min_volume >= self.min_volume && tip.max_volume <= self.max_volume
    }

    /// The effective envelope once `tip` is fitted: the intersection of both ranges.
    pub fn merge_with_tip(&self, tip: &TipSpec) -> ChannelParams {
        ChannelParams {
            min_volume: self.min_volume.max(tip.min_volume),
            max_volume: self.max_volume.min(tip.max_volume),
            ..self.clone()
        }
    }

    /// Clamp a requested flow rate to what the plunger can do.
    ///
    /// Descriptors are loaded from user files, so an inverted range is tolerated:
    /// the maximum wins. NaN bounds are ignored.
    pub fn clamp_rate(&self, rate: f64) -> f64 {
        rate.max(self.min_rate).min(self.max_rate)
    }
}

/// A disposable tip type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipSpec {
    /// Catalog type; tip boxes are matched on this.
    pub tip_type: String,
    #[serde(default)]
    pub manufacturer: String,
    pub min_volume: Volume,
    pub max_volume: Volume,
    #[serde(default)]
    pub filtered: bool,
}

impl TipSpec {
    pub fn new(tip_type: impl Into<String>, min_volume: Volume, max_volume: Volume) -> Self {
        Self {
            tip_type: tip_type.into(),
            manufacturer: String::new(),
            min_volume,
            max_volume,
            filtered: false,
        }
    }
}

/// Mechanical adaptor between head and tips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adaptor {
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
}

/// A pipetting head with its channels and the tips currently fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Head {
    pub name: String,
    pub params: ChannelParams,
    #[serde(default)]
    pub adaptor: Option<Adaptor>,
    /// Tip fitted on each channel, indexed by channel.
    #[serde(default)]
    loaded: Vec<Option<TipSpec>>,
}

impl Head {
    pub fn new(name: impl Into<String>, params: ChannelParams) -> Self {
        let loaded = vec![None; params.multi];
        Self {
            name: name.into(),
            params,
            adaptor: None,
            loaded,
        }
    }

    pub fn with_adaptor(mut self, adaptor: Adaptor) -> Self {
        self.adaptor = Some(adaptor);
        self
    }

    pub fn multi(&self) -> usize {
        self.params.multi
    }

    pub fn loaded_tips(&self) -> &[Option<TipSpec>] {
        &self.loaded
    }

    pub fn tip_count(&self) -> usize {
        self.loaded.iter().filter(|t| t.is_some()).count()
    }

    pub fn has_tips(&self) -> bool {
        self.tip_count() > 0
    }

    /// Fit `tip` to every channel selected by `mask`.
    pub fn load_tips(&mut self, mask: &[bool], tip: &TipSpec) {
        if self.loaded.len() < self.params.multi {
            self.loaded.resize(self.params.multi, None);
        }
        for (slot, on) in self.loaded.iter_mut().zip(mask) {
            if *on {
                *slot = Some(tip.clone());
            }
        }
    }

    /// Remove every fitted tip, returning which channels held one.
    pub fn unload_tips(&mut self) -> Vec<bool> {
        self.loaded
            .iter_mut()
            .map(|slot| slot.take().is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p200() -> ChannelParams {
        ChannelParams {
            name: "P200".into(),
            min_volume: Volume::ul(0.5),
            max_volume: Volume::ul(200.0),
            min_rate: 0.1,
            max_rate: 300.0,
            multi: 8,
            independent: false,
            orientation: Orientation::Vertical,
        }
    }

    #[test]
    fn test_tip_compatibility_and_merge() {
        let ch = p200();
        let small = TipSpec::new("Gilson20", Volume::ul(1.0), Volume::ul(20.0));
        let big = TipSpec::new("Gilson1000", Volume::ul(100.0), Volume::ul(1000.0));
        assert!(ch.accepts_tip(&small));
        assert!(!ch.accepts_tip(&big));
        let merged = ch.merge_with_tip(&small);
        assert_eq!(merged.min_volume, Volume::ul(1.0));
        assert_eq!(merged.max_volume, Volume::ul(20.0));
        assert_eq!(merged.multi, 8);
    }

    #[test]
    fn test_head_load_and_unload() {
        let mut head = Head::new("head0", p200());
        let tip = TipSpec::new("Gilson200", Volume::ul(1.0), Volume::ul(200.0));
        let mut mask = vec![false; 8];
        mask[0] = true;
        mask[3] = true;
        head.load_tips(&mask, &tip);
        assert_eq!(head.tip_count(), 2);
        let dropped = head.unload_tips();
        assert_eq!(dropped, mask);
        assert!(!head.has_tips());
    }

    #[test]
    fn test_clamp_rate() {
        assert_eq!(p200().clamp_rate(1000.0), 300.0);
        assert_eq!(p200().clamp_rate(0.0), 0.1);
    }

    #[test]
    fn test_clamp_rate_with_bad_range() {
        let inverted = ChannelParams {
            min_rate: 50.0,
            max_rate: 5.0,
            ..p200()
        };
        assert_eq!(inverted.clamp_rate(20.0), 5.0);

        let open_top = ChannelParams {
            max_rate: f64::NAN,
            ..p200()
        };
        assert_eq!(open_top.clamp_rate(1000.0), 1000.0);
        assert_eq!(open_top.clamp_rate(0.0), 0.1);
    }
}
