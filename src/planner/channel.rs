//! Channel and tip selection.
//!
//! For each mounted head and each tip type the head accepts, the merged envelope is
//! scored for the requested volume. The score favours a single stroke and, among
//! multi-stroke options, fewer strokes that fill the tip well:
//!
//! ```text
//! n     = ceil(volume / max)
//! score = (1 / n) * (volume / n) / max  +  (1.0 if n == 1)
//! ```
//!
//! A volume below the merged minimum scores zero. The strictly highest score wins, so
//! ties go to the earlier head and then the earlier tip in the deck's catalog.

use crate::deck::Deck;
use crate::error::{PlanError, PlanResult};
use crate::hardware::{ChannelParams, Head, TipSpec};
use crate::volume::Volume;

/// A head and tip pairing selected for a volume.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelChoice {
    /// Index into `Deck::heads`.
    pub head: usize,
    /// Head envelope merged with the tip's.
    pub params: ChannelParams,
    pub tip: TipSpec,
    pub score: f64,
}

/// Fit score of `volume` for a merged channel envelope.
pub fn fit_score(volume: Volume, params: &ChannelParams) -> f64 {
    let max = params.max_volume.as_ul();
    if volume < params.min_volume || max <= 0.0 || volume.as_ul() <= 0.0 {
        return 0.0;
    }
    let n = (volume.as_ul() / max).ceil().max(1.0);
    let part = volume.as_ul() / n;
    let single_bonus = if n <= 1.0 { 1.0 } else { 0.0 };
    (1.0 / n) * (part / max) + single_bonus
}

fn best_choice<'a>(
    volume: Volume,
    deck: &'a Deck,
    heads: impl Iterator<Item = (usize, &'a Head)>,
) -> Option<ChannelChoice> {
    let mut best: Option<ChannelChoice> = None;
    for (idx, head) in heads {
        for tip in deck.tips.iter().filter(|t| head.params.accepts_tip(t)) {
            let params = head.params.merge_with_tip(tip);
            let score = fit_score(volume, &params);
            if score > 0.0 && best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(ChannelChoice {
                    head: idx,
                    params,
                    tip: tip.clone(),
                    score,
                });
            }
        }
    }
    best
}

fn choose_among<'a>(
    volume: Volume,
    deck: &'a Deck,
    heads: impl Iterator<Item = (usize, &'a Head)> + Clone,
    eps: f64,
) -> PlanResult<ChannelChoice> {
    if let Some(choice) = best_choice(volume, deck, heads.clone()) {
        return Ok(choice);
    }
    // Rounding leniency: a volume a hair under the smallest movable volume is treated
    // as that volume.
    if let Some(min) = deck.min_possible_volume() {
        if volume.approx_eq(min, eps) && volume < min {
            tracing::warn!("volume {} rounded up to minimum {}", volume, min);
            if let Some(choice) = best_choice(min, deck, heads) {
                return Ok(choice);
            }
        }
    }
    Err(PlanError::NoTipAvailable(format!(
        "no head/tip combination can move {volume}"
    )))
}

/// Best head and tip over all mounted heads.
pub fn choose_channel(volume: Volume, deck: &Deck, eps: f64) -> PlanResult<ChannelChoice> {
    let heads: Vec<_> = deck.loaded_heads().collect();
    choose_among(volume, deck, heads.into_iter(), eps)
}

/// Best tip for a specific head (used when grouping has already committed to it).
pub fn choose_channel_on_head(
    volume: Volume,
    deck: &Deck,
    head: usize,
    eps: f64,
) -> PlanResult<ChannelChoice> {
    let heads: Vec<_> = deck.loaded_heads().filter(|(i, _)| *i == head).collect();
    if heads.is_empty() {
        return Err(PlanError::Internal(format!("head {head} is not loaded")));
    }
    choose_among(volume, deck, heads.into_iter(), eps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    const EPS: f64 = 1e-4;

    #[test]
    fn test_single_stroke_beats_split() {
        let deck = catalog::standard_deck();
        let choice = choose_channel(Volume::ul(50.0), &deck, EPS).unwrap();
        assert_eq!(choice.tip.tip_type, catalog::TIP_200);
        // Ties between heads go to the first mounted head.
        assert_eq!(choice.head, 0);
    }

    #[test]
    fn test_small_volume_prefers_small_tip() {
        let deck = catalog::standard_deck();
        let choice = choose_channel(Volume::ul(5.0), &deck, EPS).unwrap();
        assert_eq!(choice.tip.tip_type, catalog::TIP_20);
    }

    #[test]
    fn test_large_volume_uses_big_tip() {
        let deck = catalog::standard_deck();
        let choice = choose_channel(Volume::ul(900.0), &deck, EPS).unwrap();
        assert_eq!(choice.tip.tip_type, catalog::TIP_1000);
        assert_eq!(choice.head, 0);
    }

    #[test]
    fn test_fit_score_shape() {
        let params = catalog::single_channel_head()
            .params
            .merge_with_tip(&catalog::tip_200());
        assert_eq!(fit_score(Volume::ul(0.5), &params), 0.0);
        assert!((fit_score(Volume::ul(200.0), &params) - 2.0).abs() < 1e-9);
        // Three strokes of 200: (1/3) * 1.0
        assert!((fit_score(Volume::ul(600.0), &params) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rounding_leniency_at_global_minimum() {
        let deck = catalog::standard_deck();
        let choice = choose_channel(Volume::ul(0.5 - EPS / 2.0), &deck, EPS).unwrap();
        assert_eq!(choice.tip.tip_type, catalog::TIP_20);
        assert!(choose_channel(Volume::ul(0.3), &deck, EPS).is_err());
    }

    #[test]
    fn test_head_restricted_choice() {
        let deck = catalog::standard_deck();
        let choice = choose_channel_on_head(Volume::ul(900.0), &deck, 1, EPS).unwrap();
        assert_eq!(choice.head, 1);
        assert_eq!(choice.tip.tip_type, catalog::TIP_200);
    }
}
